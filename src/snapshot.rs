//! Serializable captures of statistics and counter rows.
//!
//! Requires the `serde` feature.
//!
//! ```rust,ignore
//! use sommatori::snapshot::{MetricsSnapshot, RowSnapshot};
//!
//! let metrics = MetricsSnapshot::collect(stats.counters().into_iter().map(|c| c as _));
//! let json = serde_json::to_string(&metrics).unwrap();
//!
//! let row = RowSnapshot::from(&table.get_row("row1")?);
//! // {"row":"row1","values":{"i:a":7}}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::stats::{CounterValue, Observable};
use crate::table::CounterRow;

/// One observable at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CounterSnapshot {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    pub value: CounterValue,
}

impl CounterSnapshot {
    pub fn new(name: impl Into<String>, value: CounterValue) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            value,
        }
    }

    pub fn from_observable(counter: &dyn Observable) -> Self {
        Self {
            name: if counter.name().is_empty() {
                "(unnamed)".to_string()
            } else {
                counter.name().to_string()
            },
            labels: counter
                .labels()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            value: counter.value(),
        }
    }
}

/// A point-in-time capture of many observables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    /// Milliseconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
    pub counters: Vec<CounterSnapshot>,
}

impl MetricsSnapshot {
    pub fn new(counters: Vec<CounterSnapshot>) -> Self {
        Self {
            timestamp_ms: None,
            counters,
        }
    }

    pub fn with_timestamp(counters: Vec<CounterSnapshot>, timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms: Some(timestamp_ms),
            counters,
        }
    }

    /// First counter named `name`.
    pub fn get(&self, name: &str) -> Option<&CounterSnapshot> {
        self.counters.iter().find(|c| c.name == name)
    }

    pub fn collect<'a>(counters: impl Iterator<Item = &'a dyn Observable>) -> Self {
        Self::new(counters.map(CounterSnapshot::from_observable).collect())
    }

    pub fn collect_with_timestamp<'a>(
        counters: impl Iterator<Item = &'a dyn Observable>,
        timestamp_ms: u64,
    ) -> Self {
        Self::with_timestamp(
            counters.map(CounterSnapshot::from_observable).collect(),
            timestamp_ms,
        )
    }
}

/// The present counters of one row, keyed by `family:qualifier`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowSnapshot {
    pub row: String,
    pub values: BTreeMap<String, i64>,
}

impl From<&CounterRow> for RowSnapshot {
    fn from(row: &CounterRow) -> Self {
        Self {
            row: String::from_utf8_lossy(&row.row).into_owned(),
            values: row
                .values()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::ColumnName;
    use crate::stats::{AggregationStats, StatCounter};
    use crate::table::MaterializedCounter;

    #[test]
    fn test_from_observable() {
        let counter = StatCounter::new().with_name("reads_folded");
        counter.add(100);
        let snapshot = CounterSnapshot::from_observable(&counter);
        assert_eq!(snapshot.name, "reads_folded");
        assert_eq!(snapshot.value, CounterValue::Unsigned(100));
        assert!(snapshot.labels.is_empty());

        let unnamed = CounterSnapshot::from_observable(&StatCounter::new());
        assert_eq!(unnamed.name, "(unnamed)");
    }

    #[test]
    fn test_labels_are_kept() {
        let counter = MaterializedCounter {
            row: "row1".into(),
            column: ColumnName::new("i", "a"),
            value: -3,
        };
        let snapshot = CounterSnapshot::from_observable(&counter);
        assert_eq!(snapshot.labels.get("qualifier").map(String::as_str), Some("a"));
        assert_eq!(snapshot.value, CounterValue::Signed(-3));
    }

    #[test]
    fn test_collect_stats() {
        let stats = AggregationStats::new();
        stats.deltas_folded.add(12);
        let snapshot = MetricsSnapshot::collect_with_timestamp(
            stats.counters().into_iter().map(|c| c as &dyn Observable),
            1_700_000_000_000,
        );
        assert_eq!(snapshot.counters.len(), 9);
        assert_eq!(
            snapshot.get("deltas_folded").unwrap().value,
            CounterValue::Unsigned(12)
        );
        assert!(snapshot.get("nope").is_none());
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json_round_trip() {
        let snapshot = MetricsSnapshot::with_timestamp(
            vec![CounterSnapshot::new("appends", CounterValue::Unsigned(1))],
            42,
        );
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"{"timestamp_ms":42,"counters":[{"name":"appends","value":1}]}"#);
        let back: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_row_snapshot() {
        let row = CounterRow {
            row: b"row2".to_vec(),
            columns: vec![
                (ColumnName::new("i", "a"), Some(3)),
                (ColumnName::new("i", "b"), None),
            ],
        };
        let json = serde_json::to_string(&RowSnapshot::from(&row)).unwrap();
        assert_eq!(json, r#"{"row":"row2","values":{"i:a":3}}"#);
    }
}
