//! JSON export of statistics and counter rows.
//!
//! Requires the `json` feature. Output is built from the
//! [`snapshot`](crate::snapshot) types.
//!
//! ```rust,ignore
//! use sommatori::observers::json::JsonObserver;
//!
//! let json = JsonObserver::new()
//!     .wrap_in_snapshot(true)
//!     .include_timestamp(true)
//!     .to_json(stats.counters().into_iter().map(|c| c as _))?;
//! // {"timestamp_ms":1700000000000,"counters":[{"name":"reads_folded","value":12},...]}
//!
//! let rows = JsonObserver::new().rows_to_json(&rows)?;
//! // [{"row":"row1","values":{"i:a":7}},{"row":"row2","values":{"i:a":3,"i:b":10}}]
//!
//! // straight from a scan; a store failure surfaces as `ObserverError::Store`
//! let rows = JsonObserver::new().scan_to_json(table.scan(RowRange::all(), ColumnSelection::All))?;
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use super::Result;
use crate::snapshot::{CounterSnapshot, MetricsSnapshot, RowSnapshot};
use crate::stats::Observable;
use crate::table::CounterRow;

#[derive(Debug, Clone, Default)]
pub struct JsonConfig {
    pub pretty: bool,
    /// Stamp wrapped output with the current time.
    pub include_timestamp: bool,
    /// Emit a [`MetricsSnapshot`] object instead of a bare array.
    pub wrap_in_snapshot: bool,
}

/// Serializes observables and rows to JSON.
#[derive(Debug, Clone, Default)]
pub struct JsonObserver {
    config: JsonConfig,
}

fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl JsonObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: JsonConfig) -> Self {
        Self { config }
    }

    pub fn pretty(mut self, enabled: bool) -> Self {
        self.config.pretty = enabled;
        self
    }

    /// Only has effect together with [`wrap_in_snapshot`](Self::wrap_in_snapshot).
    pub fn include_timestamp(mut self, enabled: bool) -> Self {
        self.config.include_timestamp = enabled;
        self
    }

    pub fn wrap_in_snapshot(mut self, enabled: bool) -> Self {
        self.config.wrap_in_snapshot = enabled;
        self
    }

    pub fn collect<'a>(
        &self,
        counters: impl Iterator<Item = &'a dyn Observable>,
    ) -> Vec<CounterSnapshot> {
        counters.map(CounterSnapshot::from_observable).collect()
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = if self.config.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        Ok(json)
    }

    pub fn to_json<'a>(&self, counters: impl Iterator<Item = &'a dyn Observable>) -> Result<String> {
        let snapshots = self.collect(counters);
        if self.config.wrap_in_snapshot {
            let snapshot = if self.config.include_timestamp {
                MetricsSnapshot::with_timestamp(snapshots, current_timestamp_ms())
            } else {
                MetricsSnapshot::new(snapshots)
            };
            self.encode(&snapshot)
        } else {
            self.encode(&snapshots)
        }
    }

    /// Serializes rows as an array of [`RowSnapshot`]s.
    pub fn rows_to_json(&self, rows: &[CounterRow]) -> Result<String> {
        let rows: Vec<RowSnapshot> = rows.iter().map(RowSnapshot::from).collect();
        self.encode(&rows)
    }

    /// Drains a scan into a JSON array, stopping at the first store error.
    pub fn scan_to_json(
        &self,
        rows: impl Iterator<Item = crate::error::Result<CounterRow>>,
    ) -> Result<String> {
        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(RowSnapshot::from(&row?));
        }
        self.encode(&snapshots)
    }
}
