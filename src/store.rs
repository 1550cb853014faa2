//! The store adapter interface.
//!
//! Counters need very little from a store: append immutable cells, list a
//! column's cells newest first, and run a [`StoreExtension`] on reads, flushes
//! and compactions. [`CellStore`] is that contract; [`memory::MemStore`] is an
//! in-process LSM-style implementation of it.
//!
//! [`StoreExtension`]: crate::extension::StoreExtension

pub mod memory;
mod segment;

use std::ops::Bound;
use std::sync::Arc;

use crate::cell::{Cell, CellVersion, Column, ColumnName};
use crate::error::Result;

/// Which columns of a row a read returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ColumnSelection {
    /// Every column of the row.
    #[default]
    All,
    /// Every column under the listed families, in the listed order.
    Families(Vec<Vec<u8>>),
    /// Exactly these columns, in this order.
    Columns(Vec<ColumnName>),
}

impl ColumnSelection {
    pub fn family(family: impl Into<Vec<u8>>) -> Self {
        ColumnSelection::Families(vec![family.into()])
    }

    pub fn columns(columns: impl IntoIterator<Item = ColumnName>) -> Self {
        ColumnSelection::Columns(columns.into_iter().collect())
    }

    /// Returns `true` if a column named `name` is selected.
    pub fn matches(&self, name: &ColumnName) -> bool {
        match self {
            ColumnSelection::All => true,
            ColumnSelection::Families(families) => families.iter().any(|f| *f == name.family),
            ColumnSelection::Columns(columns) => columns.contains(name),
        }
    }
}

/// A range of row keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRange {
    pub start: Bound<Vec<u8>>,
    pub end: Bound<Vec<u8>>,
}

impl Default for RowRange {
    fn default() -> Self {
        Self::all()
    }
}

impl RowRange {
    pub fn all() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    /// Rows in `[start, end)`.
    pub fn new(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self {
            start: Bound::Included(start.into()),
            end: Bound::Excluded(end.into()),
        }
    }

    /// Rows from `start` onwards.
    pub fn starting_at(start: impl Into<Vec<u8>>) -> Self {
        Self {
            start: Bound::Included(start.into()),
            end: Bound::Unbounded,
        }
    }

    /// The same range, restricted to rows after `row`.
    pub fn resume_after(self, row: impl Into<Vec<u8>>) -> Self {
        Self {
            start: Bound::Excluded(row.into()),
            end: self.end,
        }
    }

    pub fn contains(&self, row: &[u8]) -> bool {
        let after_start = match &self.start {
            Bound::Included(s) => row >= s.as_slice(),
            Bound::Excluded(s) => row > s.as_slice(),
            Bound::Unbounded => true,
        };
        after_start && self.before_end(row)
    }

    pub(crate) fn before_end(&self, row: &[u8]) -> bool {
        match &self.end {
            Bound::Included(e) => row <= e.as_slice(),
            Bound::Excluded(e) => row < e.as_slice(),
            Bound::Unbounded => true,
        }
    }
}

/// The cells returned for one row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowCells {
    pub row: Vec<u8>,
    pub cells: Vec<Cell>,
}

impl RowCells {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// An append-only cell store with extension hooks.
///
/// Implementations must be safe to share between threads. `get` and `scan`
/// run the store's read hook on every column they return, so with an
/// [`IncrementHandler`](crate::extension::IncrementHandler) installed they
/// yield one materialized cell per column. `read_column` bypasses the hook.
pub trait CellStore: Send + Sync {
    /// A timestamp for writes that did not pin one.
    fn next_timestamp(&self) -> u64;

    /// Appends `cell`, assigning its sequence number.
    fn append(&self, cell: Cell) -> Result<CellVersion>;

    /// Raw cells of one column, newest first.
    fn read_column(&self, column: &Column) -> Result<Vec<Cell>>;

    /// The selected columns of `row`.
    fn get(&self, row: &[u8], selection: &ColumnSelection) -> Result<RowCells>;

    /// Up to `limit` rows of `range`, in key order.
    ///
    /// One entry is returned per row that has any cell, even if none of its
    /// columns is selected; such entries carry no cells. A batch shorter than
    /// `limit` means the range is exhausted.
    fn scan(
        &self,
        range: &RowRange,
        selection: &ColumnSelection,
        limit: usize,
    ) -> Result<Vec<RowCells>>;
}

impl<S: CellStore + ?Sized> CellStore for Arc<S> {
    fn next_timestamp(&self) -> u64 {
        (**self).next_timestamp()
    }

    fn append(&self, cell: Cell) -> Result<CellVersion> {
        (**self).append(cell)
    }

    fn read_column(&self, column: &Column) -> Result<Vec<Cell>> {
        (**self).read_column(column)
    }

    fn get(&self, row: &[u8], selection: &ColumnSelection) -> Result<RowCells> {
        (**self).get(row, selection)
    }

    fn scan(
        &self,
        range: &RowRange,
        selection: &ColumnSelection,
        limit: usize,
    ) -> Result<Vec<RowCells>> {
        (**self).scan(range, selection, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_matches() {
        let a = ColumnName::new("i", "a");
        let b = ColumnName::new("j", "b");
        assert!(ColumnSelection::All.matches(&a));
        assert!(ColumnSelection::family("i").matches(&a));
        assert!(!ColumnSelection::family("i").matches(&b));
        let sel = ColumnSelection::columns([b.clone()]);
        assert!(sel.matches(&b));
        assert!(!sel.matches(&a));
    }

    #[test]
    fn test_range_contains() {
        let range = RowRange::new("b", "d");
        assert!(!range.contains(b"a"));
        assert!(range.contains(b"b"));
        assert!(range.contains(b"c\xff"));
        assert!(!range.contains(b"d"));
        assert!(RowRange::all().contains(b""));
    }

    #[test]
    fn test_resume_after() {
        let range = RowRange::new("b", "d").resume_after("b");
        assert!(!range.contains(b"b"));
        assert!(range.contains(b"b\0"));
        assert!(!range.contains(b"d"));
        assert!(RowRange::starting_at("x").contains(b"zzz"));
    }
}
