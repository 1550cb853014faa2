//! # Sommatori - Delta Counters for LSM-Style Stores
//!
//! A Rust library for high-rate counters stored as versioned cells. An
//! increment never reads the current value: it appends a **delta cell**
//! tagged with the amount. Deltas are folded into a total when a column is
//! read, and merged into fewer cells when the store flushes or compacts.
//!
//! ## The Problem
//!
//! A classic read-modify-write increment takes a row lock, reads the current
//! value, adds to it and writes it back. Under heavy concurrent increments on
//! the same counters every writer serializes on that lock, and the write path
//! pays for a read it does not need.
//!
//! ## The Solution: Delta Cells
//!
//! 1. **Blind Writes**: An increment is a plain append of an 8-byte big-endian
//!    delta, tagged as [`CellKind::Delta`](cell::CellKind::Delta). Writers only
//!    contend on the store's append path.
//!
//! 2. **Aggregation on Read**: The [`ReadAggregator`](aggregate::ReadAggregator)
//!    walks a column from newest to oldest, summing deltas until it meets a
//!    full value, and returns a single cell holding the total.
//!
//! 3. **Aggregation on Compaction**: The
//!    [`CompactionAggregator`](aggregate::CompactionAggregator) collapses runs
//!    of consecutive deltas into one delta, never merging across a full value,
//!    so reads stay short without changing any observed total.
//!
//! 4. **Store Adapter**: The [`StoreExtension`](extension::StoreExtension)
//!    trait is where both aggregators hook into a store.
//!    [`MemStore`](store::memory::MemStore) is an in-memory LSM that calls it
//!    on read, flush and compaction.
//!
//! ## Cell Kinds
//!
//! | Kind | Meaning | Read behavior |
//! |------|---------|---------------|
//! | [`Full`](cell::CellKind::Full) | Absolute value | Stops the fold |
//! | [`Delta`](cell::CellKind::Delta) | Signed increment | Added to the total |
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use sommatori::config::Config;
//! use sommatori::store::memory::MemStore;
//! use sommatori::table::CounterTable;
//!
//! let store = Arc::new(MemStore::with_increments(Config::new())?);
//! let table = CounterTable::new(Arc::clone(&store));
//!
//! table.increment("row1", "i", "a", 5)?;
//! table.increment("row1", "i", "a", 2)?;
//! assert_eq!(table.value("row1", "i", "a")?, Some(7));
//!
//! // Reset to an absolute value, then keep counting.
//! table.put("row1", "i", "a", 100)?;
//! table.increment("row1", "i", "a", -1)?;
//!
//! store.flush()?;
//! store.compact()?;
//! assert_eq!(table.value("row1", "i", "a")?, Some(99));
//! # Ok::<(), sommatori::Error>(())
//! ```
//!
//! ## Thread Safety
//!
//! [`MemStore`](store::memory::MemStore) and
//! [`CounterTable`](table::CounterTable) are `Send + Sync`. Many threads may
//! increment the same counters while a
//! [`BackgroundCompactor`](store::memory::BackgroundCompactor) compacts.
//!
//! ## Statistics
//!
//! Aggregators and the store keep sharded [`StatCounter`](stats::StatCounter)s
//! in [`AggregationStats`](stats::AggregationStats) and
//! [`StoreStats`](stats::StoreStats). Both, and every materialized counter of
//! a row, implement [`Observable`](stats::Observable) and can be exported by
//! the observers behind feature flags:
//!
//! | Feature | Module | Description |
//! |---------|--------|-------------|
//! | `table` | [`observers::table`] | Pretty-print as text tables |
//! | `json` | [`observers::json`] | Serialize to JSON |
//! | `prometheus` | [`observers::prometheus`] | Prometheus exposition format |
//! | `opentelemetry` | [`observers::opentelemetry`] | Observable instruments |
//! | `full` | All observers | Enables all observer modules |
//!
//! ```rust,ignore
//! use sommatori::observers::table::TableObserver;
//!
//! let rows: Vec<_> = table.scan(RowRange::all(), ColumnSelection::All).collect::<Result<_, _>>()?;
//! println!("{}", TableObserver::new().render_rows(&rows));
//! ```
//!
//! ## Logging
//!
//! Diagnostics go through [`tracing`]: flushes and compactions at `debug`,
//! degraded reads and aborted merges at `warn`. Install any subscriber to see
//! them.

pub mod aggregate;
pub mod cell;
pub mod config;
pub mod error;
pub mod extension;
pub mod observers;
pub mod stats;
pub mod store;
pub mod table;
pub mod write;

#[cfg(feature = "serde")]
pub mod snapshot;

pub use cell::{Cell, CellKind, CellVersion, Column, ColumnName};
pub use config::Config;
pub use error::{Error, Result};
pub use extension::{IncrementHandler, StoreExtension};
pub use store::memory::MemStore;
pub use store::{CellStore, ColumnSelection, RowRange};
pub use table::{CounterRow, CounterTable};
pub use write::Mutation;
