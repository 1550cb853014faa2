//! The cell model shared by writers, the aggregators and the store.
//!
//! A [`Cell`] is one physical value stored under a row, a column family and a
//! qualifier. Counters never update a cell in place: every increment is a new
//! delta cell and every overwrite is a new full-value cell. Within a column,
//! cells are ordered newest first by `(timestamp, sequence)`:
//!
//! ```text
//!   row1 / i:a
//!   ┌──────────────┬──────────┬───────┬────────┐
//!   │ timestamp    │ sequence │ kind  │ value  │
//!   ├──────────────┼──────────┼───────┼────────┤
//!   │ 9            │ 14       │ delta │ +1     │  ◄── newest
//!   │ 8            │ 12       │ delta │ +1     │
//!   │ 7            │ 11       │ full  │ 5      │  ◄── chain boundary
//!   │ 3            │ 3        │ delta │ +1     │  (shadowed)
//!   └──────────────┴──────────┴───────┴────────┘
//!                          materialized value = 7
//! ```
//!
//! Values, deltas included, are signed 64-bit integers stored as eight
//! big-endian bytes.

use std::cmp::{Ordering, Reverse};
use std::fmt::{self, Display};

use crate::error::{Error, Result};

/// Width of an encoded counter value.
pub const VALUE_LEN: usize = std::mem::size_of::<i64>();

/// Encodes a counter value as eight big-endian bytes.
#[inline]
pub fn encode_i64(value: i64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// Decodes a counter value, rejecting payloads that are not exactly eight bytes.
///
/// ```rust
/// use sommatori::cell::{decode_i64, encode_i64};
///
/// assert_eq!(decode_i64(&encode_i64(-42)).unwrap(), -42);
/// assert!(decode_i64(b"abc").is_err());
/// ```
#[inline]
pub fn decode_i64(bytes: &[u8]) -> Result<i64> {
    let raw: [u8; VALUE_LEN] = bytes
        .try_into()
        .map_err(|_| Error::Encoding { len: bytes.len() })?;
    Ok(i64::from_be_bytes(raw))
}

/// Whether a cell carries an increment or an absolute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CellKind {
    /// An increment, folded into the newer end of the column.
    Delta,
    /// An ordinary overwrite; terminates delta aggregation.
    Full,
}

/// The position of a cell inside its column.
///
/// Versions are totally ordered: a larger version is newer. The sequence
/// number is assigned by the store on append and keeps two cells written at
/// the same timestamp distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellVersion {
    pub timestamp: u64,
    pub sequence: u64,
}

impl CellVersion {
    pub const fn new(timestamp: u64, sequence: u64) -> Self {
        Self {
            timestamp,
            sequence,
        }
    }
}

impl Display for CellVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.timestamp, self.sequence)
    }
}

/// A column inside a row: family plus qualifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ColumnName {
    pub family: Vec<u8>,
    pub qualifier: Vec<u8>,
}

impl ColumnName {
    pub fn new(family: impl Into<Vec<u8>>, qualifier: impl Into<Vec<u8>>) -> Self {
        Self {
            family: family.into(),
            qualifier: qualifier.into(),
        }
    }

    /// Qualifies this name with a row.
    pub fn in_row(&self, row: impl Into<Vec<u8>>) -> Column {
        Column {
            row: row.into(),
            family: self.family.clone(),
            qualifier: self.qualifier.clone(),
        }
    }
}

impl Display for ColumnName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            String::from_utf8_lossy(&self.family),
            String::from_utf8_lossy(&self.qualifier)
        )
    }
}

/// The unit of aggregation: row, family and qualifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Column {
    pub row: Vec<u8>,
    pub family: Vec<u8>,
    pub qualifier: Vec<u8>,
}

impl Column {
    pub fn new(
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
        }
    }

    pub fn name(&self) -> ColumnName {
        ColumnName::new(self.family.clone(), self.qualifier.clone())
    }

    /// Returns `true` if `cell` belongs to this column.
    pub fn contains(&self, cell: &Cell) -> bool {
        self.row == cell.row && self.family == cell.family && self.qualifier == cell.qualifier
    }
}

impl Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}:{}",
            String::from_utf8_lossy(&self.row),
            String::from_utf8_lossy(&self.family),
            String::from_utf8_lossy(&self.qualifier)
        )
    }
}

/// A single stored value.
///
/// Cells are immutable once appended. `sequence` is zero until the store
/// assigns one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cell {
    pub row: Vec<u8>,
    pub family: Vec<u8>,
    pub qualifier: Vec<u8>,
    pub timestamp: u64,
    pub value: Vec<u8>,
    pub is_delta: bool,
    pub sequence: u64,
}

impl Cell {
    /// Builds a delta cell carrying `delta`.
    pub fn delta(column: &Column, timestamp: u64, delta: i64) -> Self {
        Self::with_kind(column, timestamp, encode_i64(delta), CellKind::Delta)
    }

    /// Builds a full-value cell carrying `value`.
    pub fn full(column: &Column, timestamp: u64, value: i64) -> Self {
        Self::with_kind(column, timestamp, encode_i64(value), CellKind::Full)
    }

    pub(crate) fn with_kind(column: &Column, timestamp: u64, value: Vec<u8>, kind: CellKind) -> Self {
        Self {
            row: column.row.clone(),
            family: column.family.clone(),
            qualifier: column.qualifier.clone(),
            timestamp,
            value,
            is_delta: kind == CellKind::Delta,
            sequence: 0,
        }
    }

    pub fn with_sequence(self, sequence: u64) -> Self {
        Self { sequence, ..self }
    }

    pub fn kind(&self) -> CellKind {
        if self.is_delta {
            CellKind::Delta
        } else {
            CellKind::Full
        }
    }

    pub fn version(&self) -> CellVersion {
        CellVersion::new(self.timestamp, self.sequence)
    }

    pub fn column(&self) -> Column {
        Column::new(self.row.clone(), self.family.clone(), self.qualifier.clone())
    }

    pub fn column_name(&self) -> ColumnName {
        ColumnName::new(self.family.clone(), self.qualifier.clone())
    }

    /// Decodes the value as a counter.
    pub fn as_i64(&self) -> Result<i64> {
        decode_i64(&self.value)
    }

    pub fn key(&self) -> CellKey {
        CellKey {
            row: self.row.clone(),
            family: self.family.clone(),
            qualifier: self.qualifier.clone(),
            version: Reverse(self.version()),
        }
    }
}

/// Sort key of a stored cell: `(row, family, qualifier, version DESC)`.
///
/// Iterating a `BTreeMap<CellKey, _>` yields each column's cells newest
/// first, columns in lexicographic order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub row: Vec<u8>,
    pub family: Vec<u8>,
    pub qualifier: Vec<u8>,
    pub version: Reverse<CellVersion>,
}

impl CellKey {
    /// The smallest key of `column` (its newest possible cell).
    pub fn column_start(column: &Column) -> Self {
        Self {
            row: column.row.clone(),
            family: column.family.clone(),
            qualifier: column.qualifier.clone(),
            version: Reverse(CellVersion::new(u64::MAX, u64::MAX)),
        }
    }

    /// The largest key of `column` (its oldest possible cell).
    pub fn column_end(column: &Column) -> Self {
        Self {
            row: column.row.clone(),
            family: column.family.clone(),
            qualifier: column.qualifier.clone(),
            version: Reverse(CellVersion::new(0, 0)),
        }
    }

    /// The smallest key of any cell in `row`.
    pub fn row_start(row: &[u8]) -> Self {
        Self {
            row: row.to_vec(),
            family: Vec::new(),
            qualifier: Vec::new(),
            version: Reverse(CellVersion::new(u64::MAX, u64::MAX)),
        }
    }

    /// The smallest key of any cell in `row` under `family`.
    pub fn family_start(row: &[u8], family: &[u8]) -> Self {
        Self {
            row: row.to_vec(),
            family: family.to_vec(),
            qualifier: Vec::new(),
            version: Reverse(CellVersion::new(u64::MAX, u64::MAX)),
        }
    }

    pub fn same_column(&self, other: &CellKey) -> bool {
        self.row == other.row && self.family == other.family && self.qualifier == other.qualifier
    }

    pub fn column(&self) -> Column {
        Column::new(self.row.clone(), self.family.clone(), self.qualifier.clone())
    }
}

/// Orders cells of a single column newest first.
pub fn newest_first(a: &Cell, b: &Cell) -> Ordering {
    b.version().cmp(&a.version())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn col(row: &str, q: &str) -> Column {
        Column::new(row, "i", q)
    }

    #[test]
    fn test_encode_decode() {
        assert_eq!(decode_i64(&encode_i64(0)).unwrap(), 0);
        assert_eq!(decode_i64(&encode_i64(i64::MIN)).unwrap(), i64::MIN);
        assert_eq!(encode_i64(5), vec![0, 0, 0, 0, 0, 0, 0, 5]);
    }

    #[test]
    fn test_decode_rejects_wrong_width() {
        match decode_i64(&[1, 2, 3]) {
            Err(Error::Encoding { len }) => assert_eq!(len, 3),
            other => panic!("unexpected {other:?}"),
        }
        assert!(decode_i64(&[0; 9]).is_err());
        assert!(decode_i64(&[]).is_err());
    }

    #[test]
    fn test_cell_kind() {
        let c = col("r", "a");
        assert_eq!(Cell::delta(&c, 1, 1).kind(), CellKind::Delta);
        assert_eq!(Cell::full(&c, 1, 1).kind(), CellKind::Full);
        assert_eq!(Cell::full(&c, 1, 7).as_i64().unwrap(), 7);
    }

    #[test]
    fn test_version_order() {
        assert!(CellVersion::new(2, 0) > CellVersion::new(1, 9));
        assert!(CellVersion::new(2, 5) > CellVersion::new(2, 4));
    }

    #[test]
    fn test_key_orders_newest_first_within_column() {
        let a = col("r", "a");
        let b = col("r", "b");
        let mut map = BTreeMap::new();
        for cell in [
            Cell::delta(&a, 1, 1).with_sequence(1),
            Cell::delta(&a, 3, 1).with_sequence(2),
            Cell::delta(&b, 2, 1).with_sequence(3),
            Cell::delta(&a, 3, 1).with_sequence(4),
        ] {
            map.insert(cell.key(), cell);
        }
        let order: Vec<(Vec<u8>, u64, u64)> = map
            .values()
            .map(|c| (c.qualifier.clone(), c.timestamp, c.sequence))
            .collect();
        assert_eq!(
            order,
            vec![
                (b"a".to_vec(), 3, 4),
                (b"a".to_vec(), 3, 2),
                (b"a".to_vec(), 1, 1),
                (b"b".to_vec(), 2, 3),
            ]
        );
    }

    #[test]
    fn test_column_bounds_enclose_column() {
        let a = col("r", "a");
        let key = Cell::delta(&a, 42, 1).with_sequence(7).key();
        assert!(CellKey::column_start(&a) <= key);
        assert!(key <= CellKey::column_end(&a));
        assert!(CellKey::row_start(b"r") <= CellKey::column_start(&a));
        assert!(CellKey::family_start(b"r", b"i") <= CellKey::column_start(&a));
    }

    #[test]
    fn test_display() {
        let c = col("row1", "a");
        assert_eq!(c.to_string(), "row1/i:a");
        assert_eq!(c.name().to_string(), "i:a");
        assert_eq!(CellVersion::new(3, 9).to_string(), "3#9");
    }

    #[test]
    fn test_equal_timestamps_stay_distinct() {
        let a = col("r", "a");
        let x = Cell::delta(&a, 5, 1).with_sequence(1);
        let y = Cell::delta(&a, 5, 1).with_sequence(2);
        assert_ne!(x.key(), y.key());
        assert_eq!(newest_first(&y, &x), Ordering::Less);
    }
}
