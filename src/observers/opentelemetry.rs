//! OpenTelemetry export through observable instruments.
//!
//! Requires the `opentelemetry` feature. Each statistic becomes an observable
//! counter whose callback reads the sharded counter during collection, so
//! nothing is pushed from the aggregation or store paths.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sommatori::extension::IncrementHandler;
//! use sommatori::observers::opentelemetry::OtelObserver;
//! use sommatori::store::memory::MemStore;
//!
//! let handler = IncrementHandler::with_config(&config);
//! let stats = Arc::clone(handler.stats());
//! let store = Arc::new(MemStore::new(config, Arc::new(handler))?);
//!
//! let observer = OtelObserver::new("sommatori");
//! observer.register_aggregation(stats)?;
//! observer.register_store(Arc::clone(&store))?;
//! ```

use std::sync::Arc;

use opentelemetry::{global, metrics::Meter, KeyValue};

use super::{OtelError, Result};
use crate::stats::{AggregationStats, CounterValue, MetricKind, Observable};
use crate::store::memory::MemStore;

/// Registers statistics with an OpenTelemetry meter.
pub struct OtelObserver {
    meter: Meter,
    description_prefix: Option<String>,
}

fn attributes(counter: &dyn Observable) -> Vec<KeyValue> {
    counter
        .labels()
        .into_iter()
        .map(|(k, v)| KeyValue::new(k, v))
        .collect()
}

impl OtelObserver {
    /// Uses a meter from the global provider.
    pub fn new(meter_name: &'static str) -> Self {
        Self::with_meter(global::meter(meter_name))
    }

    pub fn with_meter(meter: Meter) -> Self {
        Self {
            meter,
            description_prefix: None,
        }
    }

    pub fn with_description_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.description_prefix = Some(prefix.into());
        self
    }

    fn description(&self, name: &str) -> String {
        match &self.description_prefix {
            Some(prefix) => format!("{prefix}: {name}"),
            None => format!("{name} metric"),
        }
    }

    fn named(counter: &dyn Observable) -> Result<String> {
        if counter.name().is_empty() {
            return Err(OtelError::MetricError("observable must have a name".into()).into());
        }
        Ok(counter.name().to_string())
    }

    /// Registers one instrument whose callback reads `read` on every collection.
    fn observe<F>(&self, name: String, kind: MetricKind, read: F)
    where
        F: Fn() -> Vec<(CounterValue, Vec<KeyValue>)> + Send + Sync + 'static,
    {
        let description = self.description(&name);
        match kind {
            MetricKind::Counter => {
                let _ = self
                    .meter
                    .u64_observable_counter(name)
                    .with_description(description)
                    .with_callback(move |observer| {
                        for (value, attrs) in read() {
                            observer.observe(value.as_u64(), &attrs);
                        }
                    })
                    .build();
            }
            MetricKind::Gauge => {
                let _ = self
                    .meter
                    .i64_observable_gauge(name)
                    .with_description(description)
                    .with_callback(move |observer| {
                        for (value, attrs) in read() {
                            observer.observe(value.as_i64(), &attrs);
                        }
                    })
                    .build();
            }
        }
    }

    /// Registers observables that live for the whole program.
    pub fn register(&self, counters: &[&'static (dyn Observable + Send + Sync)]) -> Result<()> {
        for &counter in counters {
            let name = Self::named(counter)?;
            self.observe(name, counter.metric_kind(), move || {
                vec![(counter.value(), attributes(counter))]
            });
        }
        Ok(())
    }

    /// Registers every aggregation statistic.
    pub fn register_aggregation(&self, stats: Arc<AggregationStats>) -> Result<()> {
        for (i, counter) in stats.counters().into_iter().enumerate() {
            let name = Self::named(counter)?;
            let stats = Arc::clone(&stats);
            self.observe(name, MetricKind::Counter, move || {
                vec![(stats.counters()[i].value(), Vec::new())]
            });
        }
        Ok(())
    }

    /// Registers the store's activity counters.
    pub fn register_store(&self, store: Arc<MemStore>) -> Result<()> {
        for (i, counter) in store.stats().counters().into_iter().enumerate() {
            let name = Self::named(counter)?;
            let store = Arc::clone(&store);
            self.observe(name, MetricKind::Counter, move || {
                vec![(store.stats().counters()[i].value(), Vec::new())]
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::ColumnName;
    use crate::stats::StatCounter;
    use crate::table::MaterializedCounter;

    #[test]
    fn test_description() {
        let observer = OtelObserver::new("test");
        assert_eq!(observer.description("appends"), "appends metric");
        let observer = observer.with_description_prefix("Store");
        assert_eq!(observer.description("appends"), "Store: appends");
    }

    #[test]
    fn test_attributes_from_labels() {
        let counter = MaterializedCounter {
            row: "row1".into(),
            column: ColumnName::new("i", "a"),
            value: 1,
        };
        let attrs = attributes(&counter);
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs[0].key.as_str(), "row");
    }

    #[test]
    fn test_register_unnamed_fails() {
        static UNNAMED: StatCounter = StatCounter::new();
        let observer = OtelObserver::new("test");
        let counters: &[&'static (dyn Observable + Send + Sync)] = &[&UNNAMED];
        assert!(observer.register(counters).is_err());
    }

    #[test]
    fn test_register_stats() {
        static FLUSHES: StatCounter = StatCounter::new().with_name("flushes");
        let observer = OtelObserver::new("test");
        let counters: &[&'static (dyn Observable + Send + Sync)] = &[&FLUSHES];
        assert!(observer.register(counters).is_ok());
        assert!(observer
            .register_aggregation(Arc::new(AggregationStats::new()))
            .is_ok());
    }
}
