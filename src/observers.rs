//! Exporters for statistics and materialized counters.
//!
//! Everything here consumes [`Observable`](crate::stats::Observable): the
//! [`StatCounter`](crate::stats::StatCounter)s of
//! [`AggregationStats`](crate::stats::AggregationStats) and
//! [`StoreStats`](crate::stats::StoreStats), and the
//! [`MaterializedCounter`](crate::table::MaterializedCounter)s of a counter row.
//!
//! | Module | Feature | Output |
//! |--------|---------|--------|
//! | [`table`] | `table` | text tables |
//! | [`json`] | `json` | JSON documents |
//! | [`prometheus`] | `prometheus` | text exposition format |
//! | [`opentelemetry`] | `opentelemetry` | observable instruments |
//!
//! All of them report failures through [`ObserverError`].

mod error;

pub use error::{ObserverError, Result};

#[cfg(feature = "prometheus")]
pub use error::PrometheusError;

#[cfg(feature = "opentelemetry")]
pub use error::OtelError;

#[cfg(feature = "table")]
pub mod table;

#[cfg(feature = "json")]
pub mod json;

#[cfg(feature = "prometheus")]
pub mod prometheus;

#[cfg(feature = "opentelemetry")]
pub mod opentelemetry;
