//! Tunables for the aggregators and the reference store.
//!
//! ```rust
//! use sommatori::config::{ClockKind, Config};
//!
//! let config = Config::new()
//!     .with_memtable_flush_cells(1024)
//!     .with_max_delta_chain(32)
//!     .with_clock(ClockKind::Logical);
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{Error, Result};

/// Where store-assigned timestamps come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ClockKind {
    /// Milliseconds since the Unix epoch, never going backwards.
    #[default]
    Wall,
    /// A counter starting at 1, strictly increasing.
    Logical,
}

/// Configuration shared by [`IncrementHandler`](crate::extension::IncrementHandler)
/// and [`MemStore`](crate::store::memory::MemStore).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Flush the memtable once it holds this many cells.
    pub memtable_flush_cells: usize,
    /// Compact once more than this many segments exist.
    pub max_segments: usize,
    /// Longest delta chain tolerated before a compaction is forced; 0 disables.
    pub max_delta_chain: usize,
    /// Rows fetched per round trip by scanners.
    pub scan_batch_rows: usize,
    /// Whether flushes fold delta runs on their way to a segment.
    pub aggregate_on_flush: bool,
    pub clock: ClockKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memtable_flush_cells: 4096,
            max_segments: 8,
            max_delta_chain: 256,
            scan_batch_rows: 128,
            aggregate_on_flush: true,
            clock: ClockKind::Wall,
        }
    }
}

impl Config {
    /// The defaults: wall clock, 4096-cell memtable, 8 segments, chains of 256.
    ///
    /// # Examples
    ///
    /// ```
    /// use sommatori::config::{ClockKind, Config};
    ///
    /// let config = Config::new();
    /// assert_eq!(config.clock, ClockKind::Wall);
    /// assert_eq!(config.max_delta_chain, 256);
    /// assert!(config.aggregate_on_flush);
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the memtable size that triggers a flush.
    ///
    /// # Examples
    ///
    /// ```
    /// use sommatori::config::Config;
    ///
    /// assert!(Config::new().with_memtable_flush_cells(64).validate().is_ok());
    /// assert!(Config::new().with_memtable_flush_cells(0).validate().is_err());
    /// ```
    pub fn with_memtable_flush_cells(mut self, cells: usize) -> Self {
        self.memtable_flush_cells = cells;
        self
    }

    /// Sets the segment count above which an append triggers compaction.
    /// Clamped to at least 1.
    pub fn with_max_segments(mut self, segments: usize) -> Self {
        self.max_segments = segments.max(1);
        self
    }

    /// Sets the delta-chain length that forces a compaction.
    ///
    /// # Examples
    ///
    /// ```
    /// use sommatori::config::Config;
    ///
    /// // never force compactions
    /// let config = Config::new().with_max_delta_chain(0);
    /// assert_eq!(config.max_delta_chain, 0);
    /// ```
    pub fn with_max_delta_chain(mut self, length: usize) -> Self {
        self.max_delta_chain = length;
        self
    }

    /// Rows per scan round trip; 0 fails validation.
    pub fn with_scan_batch_rows(mut self, rows: usize) -> Self {
        self.scan_batch_rows = rows;
        self
    }

    /// Whether flushes fold delta runs; off leaves merging to compaction.
    pub fn with_aggregate_on_flush(mut self, enabled: bool) -> Self {
        self.aggregate_on_flush = enabled;
        self
    }

    /// Picks the timestamp source.
    ///
    /// # Examples
    ///
    /// ```
    /// use sommatori::config::{ClockKind, Config};
    /// use sommatori::store::memory::MemStore;
    /// use sommatori::store::CellStore;
    ///
    /// let store = MemStore::plain(Config::new().with_clock(ClockKind::Logical)).unwrap();
    /// assert_eq!(store.next_timestamp(), 1);
    /// assert_eq!(store.next_timestamp(), 2);
    /// ```
    pub fn with_clock(mut self, clock: ClockKind) -> Self {
        self.clock = clock;
        self
    }

    /// Rejects settings the store cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.memtable_flush_cells == 0 {
            return Err(Error::InvalidConfig(
                "memtable_flush_cells must be at least 1".into(),
            ));
        }
        if self.scan_batch_rows == 0 {
            return Err(Error::InvalidConfig(
                "scan_batch_rows must be at least 1".into(),
            ));
        }
        if self.max_segments == 0 {
            return Err(Error::InvalidConfig("max_segments must be at least 1".into()));
        }
        Ok(())
    }

    /// Parses and validates a JSON configuration; missing fields take defaults.
    #[cfg(feature = "json")]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.clock, ClockKind::Wall);
        assert!(config.aggregate_on_flush);
    }

    #[test]
    fn test_builder() {
        let config = Config::new()
            .with_memtable_flush_cells(10)
            .with_max_segments(0)
            .with_max_delta_chain(0)
            .with_scan_batch_rows(2)
            .with_aggregate_on_flush(false)
            .with_clock(ClockKind::Logical);
        assert_eq!(config.memtable_flush_cells, 10);
        assert_eq!(config.max_segments, 1);
        assert_eq!(config.max_delta_chain, 0);
        assert_eq!(config.scan_batch_rows, 2);
        assert!(!config.aggregate_on_flush);
        assert_eq!(config.clock, ClockKind::Logical);
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let err = Config::new().with_memtable_flush_cells(0).validate();
        assert!(matches!(err, Err(Error::InvalidConfig(_))));
        let err = Config::new().with_scan_batch_rows(0).validate();
        assert!(matches!(err, Err(Error::InvalidConfig(_))));
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_from_json() {
        let config = Config::from_json(r#"{"max_delta_chain": 8, "clock": "logical"}"#).unwrap();
        assert_eq!(config.max_delta_chain, 8);
        assert_eq!(config.clock, ClockKind::Logical);
        assert_eq!(config.memtable_flush_cells, 4096);

        assert!(Config::from_json(r#"{"scan_batch_rows": 0}"#).is_err());
        assert!(Config::from_json("not json").is_err());
    }
}
