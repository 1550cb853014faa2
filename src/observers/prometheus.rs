//! Prometheus exposition of statistics and materialized counters.
//!
//! Requires the `prometheus` feature. Observables are registered into a
//! fresh [`Registry`] on every render and encoded with the official
//! [`TextEncoder`]. Observables sharing a name become one labeled metric
//! family, so every [`MaterializedCounter`](crate::table::MaterializedCounter)
//! of a scan lands under a single `counter_value` gauge:
//!
//! ```text
//! # HELP sommatori_counter_value counter_value metric
//! # TYPE sommatori_counter_value gauge
//! sommatori_counter_value{family="i",qualifier="a",row="row1"} 7
//! sommatori_counter_value{family="i",qualifier="a",row="row2"} 3
//! ```
//!
//! ```rust,ignore
//! use sommatori::observers::prometheus::PrometheusObserver;
//!
//! let observer = PrometheusObserver::new()
//!     .with_namespace("sommatori")
//!     .with_const_label("instance", "localhost:8080")
//!     .with_help("reads_folded", "Columns materialized by reads");
//! let body = observer.render(stats.counters().into_iter().map(|c| c as _))?;
//! ```

use std::collections::{BTreeMap, HashMap};

use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};

use super::{ObserverError, PrometheusError, Result};
use crate::stats::{MetricKind, Observable};

/// Renders observables in the Prometheus text format.
#[derive(Debug, Clone, Default)]
pub struct PrometheusObserver {
    namespace: Option<String>,
    subsystem: Option<String>,
    const_labels: HashMap<String, String>,
    help: HashMap<String, String>,
    kinds: HashMap<String, MetricKind>,
}

struct Family<'a> {
    raw_name: &'a str,
    kind: MetricKind,
    members: Vec<&'a dyn Observable>,
}

impl PrometheusObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix for every metric name, joined with `_`.
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn with_subsystem(mut self, subsystem: &str) -> Self {
        self.subsystem = Some(subsystem.to_string());
        self
    }

    /// A label attached to every metric.
    pub fn with_const_label(mut self, name: &str, value: &str) -> Self {
        self.const_labels
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_help(mut self, name: &str, help: &str) -> Self {
        self.help.insert(name.to_string(), help.to_string());
        self
    }

    /// Overrides the kind an observable reports for itself.
    pub fn with_kind(mut self, name: &str, kind: MetricKind) -> Self {
        self.kinds.insert(name.to_string(), kind);
        self
    }

    /// Maps a name onto `[a-zA-Z_:][a-zA-Z0-9_:]*`.
    fn sanitize_name(name: &str) -> String {
        let mut result: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if result.is_empty() {
            result.push_str("unnamed");
        }
        if result.starts_with(|c: char| c.is_ascii_digit()) {
            result.insert(0, '_');
        }
        result
    }

    fn full_name(&self, name: &str) -> String {
        let sanitized = Self::sanitize_name(name);
        match (&self.namespace, &self.subsystem) {
            (Some(ns), Some(ss)) => format!("{ns}_{ss}_{sanitized}"),
            (Some(ns), None) => format!("{ns}_{sanitized}"),
            (None, Some(ss)) => format!("{ss}_{sanitized}"),
            (None, None) => sanitized,
        }
    }

    fn opts(&self, family: &Family<'_>, full_name: &str) -> Opts {
        let help = self
            .help
            .get(family.raw_name)
            .cloned()
            .unwrap_or_else(|| format!("{} metric", family.raw_name));
        Opts::new(full_name, help).const_labels(self.const_labels.clone())
    }

    /// Groups observables by name, keeping first-seen order.
    fn families<'a>(&self, counters: impl Iterator<Item = &'a dyn Observable>) -> Vec<Family<'a>> {
        let mut families: Vec<Family<'a>> = Vec::new();
        for counter in counters {
            let raw_name = if counter.name().is_empty() {
                "unnamed"
            } else {
                counter.name()
            };
            match families.iter_mut().find(|f| f.raw_name == raw_name) {
                Some(family) => family.members.push(counter),
                None => families.push(Family {
                    raw_name,
                    kind: self
                        .kinds
                        .get(raw_name)
                        .copied()
                        .unwrap_or_else(|| counter.metric_kind()),
                    members: vec![counter],
                }),
            }
        }
        families
    }

    fn register(&self, registry: &Registry, family: &Family<'_>) -> Result<()> {
        let full_name = self.full_name(family.raw_name);
        let opts = self.opts(family, &full_name);

        let labels: Vec<BTreeMap<&'static str, String>> = family
            .members
            .iter()
            .map(|m| m.labels().into_iter().collect())
            .collect();
        let names: Vec<&str> = labels
            .first()
            .map(|l| l.keys().copied().collect())
            .unwrap_or_default();
        if labels.iter().any(|l| !l.keys().copied().eq(names.iter().copied())) {
            return Err(ObserverError::Prometheus(PrometheusError::MetricError(
                format!("{full_name}: members disagree on label names"),
            )));
        }

        match (family.kind, names.is_empty()) {
            (MetricKind::Counter, true) => {
                let counter = IntCounter::with_opts(opts)?;
                for m in &family.members {
                    counter.inc_by(m.value().as_u64());
                }
                registry.register(Box::new(counter))?;
            }
            (MetricKind::Gauge, true) => {
                let gauge = IntGauge::with_opts(opts)?;
                for m in &family.members {
                    gauge.add(m.value().as_i64());
                }
                registry.register(Box::new(gauge))?;
            }
            (MetricKind::Counter, false) => {
                let vec = IntCounterVec::new(opts, &names)?;
                for (m, l) in family.members.iter().zip(&labels) {
                    let values: Vec<&str> = l.values().map(String::as_str).collect();
                    vec.with_label_values(&values).inc_by(m.value().as_u64());
                }
                registry.register(Box::new(vec))?;
            }
            (MetricKind::Gauge, false) => {
                let vec = IntGaugeVec::new(opts, &names)?;
                for (m, l) in family.members.iter().zip(&labels) {
                    let values: Vec<&str> = l.values().map(String::as_str).collect();
                    vec.with_label_values(&values).set(m.value().as_i64());
                }
                registry.register(Box::new(vec))?;
            }
        }
        Ok(())
    }

    /// Renders observables in the text exposition format.
    pub fn render<'a>(&self, counters: impl Iterator<Item = &'a dyn Observable>) -> Result<String> {
        let registry = Registry::new();
        for family in self.families(counters) {
            self.register(&registry, &family)?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(|e| PrometheusError::EncodeError(e.to_string()))?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn render_bytes<'a>(
        &self,
        counters: impl Iterator<Item = &'a dyn Observable>,
    ) -> Result<Vec<u8>> {
        Ok(self.render(counters)?.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::ColumnName;
    use crate::stats::{AggregationStats, StatCounter};
    use crate::table::MaterializedCounter;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(PrometheusObserver::sanitize_name("reads-folded"), "reads_folded");
        assert_eq!(PrometheusObserver::sanitize_name("9lives"), "_9lives");
        assert_eq!(PrometheusObserver::sanitize_name(""), "unnamed");
    }

    #[test]
    fn test_render_stats() {
        let stats = AggregationStats::new();
        stats.deltas_folded.add(42);
        let output = PrometheusObserver::new()
            .with_namespace("sommatori")
            .with_help("deltas_folded", "Delta cells summed by reads")
            .render(stats.counters().into_iter().map(|c| c as &dyn Observable))
            .unwrap();
        assert!(output.contains("# TYPE sommatori_deltas_folded counter"));
        assert!(output.contains("# HELP sommatori_deltas_folded Delta cells summed by reads"));
        assert!(output.contains("sommatori_deltas_folded 42"));
    }

    #[test]
    fn test_materialized_counters_share_a_family() {
        let counters = [
            MaterializedCounter {
                row: "row1".into(),
                column: ColumnName::new("i", "a"),
                value: 7,
            },
            MaterializedCounter {
                row: "row2".into(),
                column: ColumnName::new("i", "a"),
                value: -3,
            },
        ];
        let output = PrometheusObserver::new()
            .render(counters.iter().map(|c| c as &dyn Observable))
            .unwrap();
        assert!(output.contains("# TYPE counter_value gauge"));
        assert!(output.contains(r#"counter_value{family="i",qualifier="a",row="row1"} 7"#));
        assert!(output.contains(r#"counter_value{family="i",qualifier="a",row="row2"} -3"#));
    }

    #[test]
    fn test_const_labels_and_kind_override() {
        let counter = StatCounter::new().with_name("appends");
        counter.add(5);
        let output = PrometheusObserver::new()
            .with_const_label("instance", "test")
            .with_kind("appends", MetricKind::Gauge)
            .render(std::iter::once(&counter as &dyn Observable))
            .unwrap();
        assert!(output.contains("# TYPE appends gauge"));
        assert!(output.contains(r#"appends{instance="test"} 5"#));
    }

    #[test]
    fn test_render_bytes() {
        let counter = StatCounter::new().with_name("flushes");
        let bytes = PrometheusObserver::new()
            .render_bytes(std::iter::once(&counter as &dyn Observable))
            .unwrap();
        assert!(!bytes.is_empty());
    }
}
