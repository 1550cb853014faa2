//! Sorted cell runs and lookups over a stack of them.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use crate::cell::{newest_first, Cell, CellKey, CellVersion, Column, ColumnName};
use crate::store::{ColumnSelection, RowRange};

pub(crate) type CellMap = BTreeMap<CellKey, Cell>;

/// An immutable, sorted run of cells produced by a flush or a compaction.
#[derive(Debug)]
pub(crate) struct Segment {
    id: u64,
    cells: CellMap,
}

impl Segment {
    pub(crate) fn new(id: u64, cells: CellMap) -> Self {
        Self { id, cells }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn cells(&self) -> &CellMap {
        &self.cells
    }

    pub(crate) fn len(&self) -> usize {
        self.cells.len()
    }
}

/// The smallest byte string sorting after `key`.
fn successor(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    next
}

/// Cells of `column` in `map`, newest first.
pub(crate) fn column_cells<'a>(
    map: &'a CellMap,
    column: &Column,
) -> impl Iterator<Item = &'a Cell> + 'a {
    map.range(CellKey::column_start(column)..=CellKey::column_end(column))
        .map(|(_, cell)| cell)
}

/// Versions of the full-value cells of `column` in `map`.
pub(crate) fn full_versions(map: &CellMap, column: &Column) -> Vec<CellVersion> {
    column_cells(map, column)
        .filter(|c| !c.is_delta)
        .map(Cell::version)
        .collect()
}

/// Groups `map` into columns, each newest first.
pub(crate) fn columns(map: &CellMap) -> Vec<(Column, Vec<Cell>)> {
    let mut out: Vec<(Column, Vec<Cell>)> = Vec::new();
    for (key, cell) in map {
        match out.last_mut() {
            Some((column, cells)) if column.contains(cell) => cells.push(cell.clone()),
            _ => out.push((key.column(), vec![cell.clone()])),
        }
    }
    out
}

/// Distinct columns of `row` at or after `from`, stopping once `within`
/// rejects a key.
fn collect_columns(
    map: &CellMap,
    mut from: CellKey,
    within: impl Fn(&CellKey) -> bool,
    out: &mut BTreeSet<ColumnName>,
) {
    while let Some((key, _)) = map.range(from..).next() {
        if !within(key) {
            break;
        }
        out.insert(ColumnName::new(key.family.clone(), key.qualifier.clone()));
        from = CellKey {
            row: key.row.clone(),
            family: key.family.clone(),
            qualifier: successor(&key.qualifier),
            version: Reverse(CellVersion::new(u64::MAX, u64::MAX)),
        };
    }
}

/// The first `limit` distinct rows of `range` present in `map`.
fn collect_rows(map: &CellMap, range: &RowRange, limit: usize, out: &mut BTreeSet<Vec<u8>>) {
    let mut from = match &range.start {
        Bound::Included(row) => CellKey::row_start(row),
        Bound::Excluded(row) => CellKey::row_start(&successor(row)),
        Bound::Unbounded => CellKey::row_start(&[]),
    };
    let mut found = 0;
    while found < limit {
        let Some((key, _)) = map.range(from..).next() else {
            break;
        };
        if !range.before_end(&key.row) {
            break;
        }
        out.insert(key.row.clone());
        found += 1;
        from = CellKey::row_start(&successor(&key.row));
    }
}

/// A read-only view over the memtable, a frozen memtable and the segments.
///
/// Cell keys are unique across sources, so a column's cells are the union of
/// its cells in every source.
pub(crate) struct View<'a> {
    sources: Vec<&'a CellMap>,
}

impl<'a> View<'a> {
    pub(crate) fn new(sources: impl IntoIterator<Item = &'a CellMap>) -> Self {
        Self {
            sources: sources.into_iter().collect(),
        }
    }

    pub(crate) fn column_cells(&self, column: &Column) -> Vec<Cell> {
        let mut cells: Vec<Cell> = self
            .sources
            .iter()
            .flat_map(|map| column_cells(map, column))
            .cloned()
            .collect();
        cells.sort_by(newest_first);
        cells
    }

    /// Columns of `row` picked by `selection`, in selection order.
    ///
    /// Explicitly listed columns are returned whether or not they exist.
    pub(crate) fn columns(&self, row: &[u8], selection: &ColumnSelection) -> Vec<Column> {
        match selection {
            ColumnSelection::Columns(names) => names.iter().map(|n| n.in_row(row)).collect(),
            ColumnSelection::All => {
                let mut names = BTreeSet::new();
                for map in &self.sources {
                    collect_columns(map, CellKey::row_start(row), |k| k.row == row, &mut names);
                }
                names.into_iter().map(|n| n.in_row(row)).collect()
            }
            ColumnSelection::Families(families) => {
                let mut out = Vec::new();
                for family in families {
                    let mut names = BTreeSet::new();
                    for map in &self.sources {
                        collect_columns(
                            map,
                            CellKey::family_start(row, family),
                            |k| k.row == row && k.family == *family,
                            &mut names,
                        );
                    }
                    out.extend(names.into_iter().map(|n| n.in_row(row)));
                }
                out
            }
        }
    }

    /// The first `limit` rows of `range` with any cell, in key order.
    pub(crate) fn rows(&self, range: &RowRange, limit: usize) -> Vec<Vec<u8>> {
        let mut rows = BTreeSet::new();
        for map in &self.sources {
            collect_rows(map, range, limit, &mut rows);
        }
        rows.into_iter().take(limit).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.sources.iter().map(|m| m.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(cells: &[Cell]) -> CellMap {
        cells.iter().map(|c| (c.key(), c.clone())).collect()
    }

    fn cell(row: &str, family: &str, q: &str, seq: u64) -> Cell {
        Cell::delta(&Column::new(row, family, q), seq, 1).with_sequence(seq)
    }

    #[test]
    fn test_successor() {
        assert_eq!(successor(b"ab"), b"ab\0".to_vec());
        assert!(successor(b"ab").as_slice() > b"ab".as_slice());
        assert!(successor(b"ab").as_slice() < b"ab\x01".as_slice());
    }

    #[test]
    fn test_view_merges_sources() {
        let older = map(&[cell("r", "i", "a", 1), cell("r", "i", "a", 3)]);
        let newer = map(&[cell("r", "i", "a", 2), cell("r", "i", "b", 4)]);
        let view = View::new([&older, &newer]);
        let seqs: Vec<u64> = view
            .column_cells(&Column::new("r", "i", "a"))
            .iter()
            .map(|c| c.sequence)
            .collect();
        assert_eq!(seqs, vec![3, 2, 1]);
        assert_eq!(view.len(), 4);
    }

    #[test]
    fn test_columns_by_selection() {
        let m = map(&[
            cell("r", "i", "b", 1),
            cell("r", "i", "a", 2),
            cell("r", "j", "x", 3),
            cell("r", "i", "a", 4),
            cell("s", "i", "a", 5),
        ]);
        let view = View::new([&m]);
        let names = |cols: Vec<Column>| -> Vec<String> { cols.iter().map(|c| c.to_string()).collect() };

        assert_eq!(
            names(view.columns(b"r", &ColumnSelection::All)),
            vec!["r/i:a", "r/i:b", "r/j:x"]
        );
        assert_eq!(
            names(view.columns(b"r", &ColumnSelection::Families(vec![b"j".to_vec(), b"i".to_vec()]))),
            vec!["r/j:x", "r/i:a", "r/i:b"]
        );
        assert_eq!(
            names(view.columns(b"r", &ColumnSelection::columns([ColumnName::new("z", "z")]))),
            vec!["r/z:z"]
        );
        assert!(view.columns(b"q", &ColumnSelection::All).is_empty());
    }

    #[test]
    fn test_rows_in_range() {
        let a = map(&[cell("a", "i", "x", 1), cell("c", "i", "x", 2), cell("c", "i", "y", 3)]);
        let b = map(&[cell("b", "i", "x", 4), cell("d", "i", "x", 5)]);
        let view = View::new([&a, &b]);

        assert_eq!(view.rows(&RowRange::all(), 10), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
        assert_eq!(view.rows(&RowRange::all(), 2), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(view.rows(&RowRange::new("b", "d"), 10), vec![b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(
            view.rows(&RowRange::all().resume_after("b"), 10),
            vec![b"c".to_vec(), b"d".to_vec()]
        );
    }

    #[test]
    fn test_group_columns() {
        let m = map(&[cell("r", "i", "a", 1), cell("r", "i", "a", 2), cell("r", "i", "b", 3)]);
        let grouped = columns(&m);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].1.len(), 2);
        assert_eq!(grouped[0].1[0].sequence, 2);
        assert!(full_versions(&m, &Column::new("r", "i", "a")).is_empty());
    }
}
