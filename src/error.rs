//! Error type shared by writers, aggregators and store adapters.
//!
//! Only writes and store operations surface these errors to callers. Reads
//! degrade to a best-effort sum instead of failing, and compaction falls back
//! to passing a column's cells through unchanged.

use thiserror::Error;

use crate::cell::CellVersion;

/// Errors raised by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A payload is not a 64-bit big-endian counter value.
    #[error("encoding error: expected an 8-byte counter value, got {len} bytes")]
    Encoding { len: usize },

    /// A merge would have spanned a full-value cell, or a full-value write
    /// would land inside an already merged run.
    #[error("aggregation boundary violation in column {column} at {version}")]
    AggregationBoundaryViolation { column: String, version: CellVersion },

    /// The store adapter cannot serve the request.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Returns `true` for errors that originate in the store adapter.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
