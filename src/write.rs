//! Write tagging: turning increments and overwrites into cells.
//!
//! A [`Mutation`] describes one write to one column. It is tagged either as a
//! delta (an increment by N) or as a full value (an ordinary overwrite) and
//! becomes exactly one [`Cell`]. Nothing here touches the store and writers
//! never coordinate: two threads incrementing the same column produce two
//! independent cells that readers later sum.
//!
//! ```rust
//! use sommatori::write::Mutation;
//!
//! let cell = Mutation::increment("row1", "i", "hits", 3)
//!     .at(10)
//!     .into_cell(0)
//!     .unwrap();
//! assert!(cell.is_delta);
//! assert_eq!(cell.timestamp, 10);
//! assert_eq!(cell.as_i64().unwrap(), 3);
//! ```

use crate::cell::{decode_i64, encode_i64, Cell, CellKind, Column};
use crate::error::Result;

/// A tagged write to a single column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    column: Column,
    kind: CellKind,
    value: Vec<u8>,
    timestamp: Option<u64>,
}

impl Mutation {
    /// An increment of `column` by `delta`.
    pub fn increment(
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        delta: i64,
    ) -> Self {
        Self {
            column: Column::new(row, family, qualifier),
            kind: CellKind::Delta,
            value: encode_i64(delta),
            timestamp: None,
        }
    }

    /// An overwrite of `column` with `value`.
    pub fn put(
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        value: i64,
    ) -> Self {
        Self {
            column: Column::new(row, family, qualifier),
            kind: CellKind::Full,
            value: encode_i64(value),
            timestamp: None,
        }
    }

    /// An increment whose payload is supplied already encoded.
    ///
    /// Fails with [`Error::Encoding`](crate::Error::Encoding) unless the
    /// payload is an 8-byte big-endian integer.
    pub fn delta_bytes(
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        payload: &[u8],
    ) -> Result<Self> {
        decode_i64(payload)?;
        Ok(Self {
            column: Column::new(row, family, qualifier),
            kind: CellKind::Delta,
            value: payload.to_vec(),
            timestamp: None,
        })
    }

    /// An overwrite whose payload is supplied already encoded.
    pub fn put_bytes(
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        payload: &[u8],
    ) -> Result<Self> {
        decode_i64(payload)?;
        Ok(Self {
            column: Column::new(row, family, qualifier),
            kind: CellKind::Full,
            value: payload.to_vec(),
            timestamp: None,
        })
    }

    /// Pins the write to a caller-supplied timestamp.
    pub fn at(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn column(&self) -> &Column {
        &self.column
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn is_delta(&self) -> bool {
        self.kind == CellKind::Delta
    }

    /// The caller-supplied timestamp, if any.
    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    /// Produces the cell for this write.
    ///
    /// `assigned` is used when the caller did not pin a timestamp. The
    /// payload is validated again so that a cell with an undecodable value
    /// never reaches the store.
    pub fn into_cell(self, assigned: u64) -> Result<Cell> {
        decode_i64(&self.value)?;
        let timestamp = self.timestamp.unwrap_or(assigned);
        Ok(Cell::with_kind(&self.column, timestamp, self.value, self.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_increment_is_delta() {
        let m = Mutation::increment("r", "i", "a", -4);
        assert!(m.is_delta());
        let cell = m.into_cell(99).unwrap();
        assert!(cell.is_delta);
        assert_eq!(cell.timestamp, 99);
        assert_eq!(cell.as_i64().unwrap(), -4);
        assert_eq!(cell.sequence, 0);
    }

    #[test]
    fn test_put_is_full() {
        let cell = Mutation::put("r", "i", "a", 5).into_cell(1).unwrap();
        assert!(!cell.is_delta);
        assert_eq!(cell.kind(), CellKind::Full);
        assert_eq!(cell.as_i64().unwrap(), 5);
    }

    #[test]
    fn test_caller_timestamp_wins() {
        let cell = Mutation::increment("r", "i", "a", 1)
            .at(7)
            .into_cell(1_000)
            .unwrap();
        assert_eq!(cell.timestamp, 7);
    }

    #[test]
    fn test_delta_bytes_validates_payload() {
        assert!(Mutation::delta_bytes("r", "i", "a", &3i64.to_be_bytes()).is_ok());
        match Mutation::delta_bytes("r", "i", "a", b"three") {
            Err(Error::Encoding { len }) => assert_eq!(len, 5),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_put_bytes_validates_payload() {
        assert!(Mutation::put_bytes("r", "i", "a", &[0u8; 4]).is_err());
        let cell = Mutation::put_bytes("r", "i", "a", &10i64.to_be_bytes())
            .unwrap()
            .into_cell(1)
            .unwrap();
        assert_eq!(cell.as_i64().unwrap(), 10);
    }

    #[test]
    fn test_column() {
        let m = Mutation::increment("row", "fam", "q", 1);
        assert_eq!(m.column(), &Column::new("row", "fam", "q"));
        assert_eq!(m.timestamp(), None);
    }
}
