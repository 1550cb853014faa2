//! Runtime statistics built on sharded atomic counters.
//!
//! The aggregators run on every read and every compaction, often from many
//! threads at once. Every statistic is a [`StatCounter`], sharded per thread
//! so that counting stays off the contended path:
//!
//! ```text
//!                          ┌─────────────────────────────────────┐
//!                          │            StatCounter              │
//!                          ├─────────────────────────────────────┤
//!   Thread 0 ──writes──►   │ [Slot 0] ████████ (CachePadded)     │
//!   Thread 1 ──writes──►   │ [Slot 1] ████████ (CachePadded)     │
//!        ...               │    ...                              │
//!   Thread 63 ─writes──►   │ [Slot 63] ███████ (CachePadded)     │
//!                          └─────────────────────────────────────┘
//!                                          │
//!                                          ▼
//!                                   value() sums
//!                                   all slots on read
//! ```
//!
//! Threads get slots round-robin on first use; slot sharing past 64 threads
//! only costs some contention, never correctness. All updates are
//! `Ordering::Relaxed`.
//!
//! [`Observable`] is the common read interface consumed by the
//! [`observers`](crate::observers).

use atomic_time::AtomicOptionInstant;
use atomic_traits::Atomic;
use crossbeam_utils::CachePadded;
use std::fmt::{self, Debug, Display};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Number of shards per counter.
///
/// A power of two; each slot is cache-line padded, so a counter costs about
/// 4KB (`64 slots × 64 bytes`).
pub(crate) const NUM_COMPONENTS: usize = 64;

static NEXT_SLOT_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// Slot index of the current thread, assigned lazily and stable for the
    /// thread's lifetime.
    pub(crate) static THREAD_SLOT_INDEX: usize = get_next_slot_id();
}

/// Assigns the next slot in `[0, NUM_COMPONENTS)`.
pub fn get_next_slot_id() -> usize {
    NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed) % NUM_COMPONENTS
}

/// The value of an observable, signed or unsigned.
///
/// ```rust
/// use sommatori::stats::CounterValue;
///
/// assert!(CounterValue::Unsigned(0).is_zero());
/// assert_eq!(CounterValue::Signed(-3).to_string(), "-3");
/// assert_eq!(CounterValue::Signed(-3).as_f64(), -3.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum CounterValue {
    Unsigned(u64),
    Signed(i64),
}

impl Display for CounterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterValue::Unsigned(v) => write!(f, "{}", v),
            CounterValue::Signed(v) => write!(f, "{}", v),
        }
    }
}

impl CounterValue {
    pub fn is_zero(&self) -> bool {
        match self {
            CounterValue::Unsigned(v) => *v == 0,
            CounterValue::Signed(v) => *v == 0,
        }
    }

    /// Converts to `i64`; unsigned values above `i64::MAX` wrap.
    pub fn as_i64(&self) -> i64 {
        match self {
            CounterValue::Unsigned(v) => *v as i64,
            CounterValue::Signed(v) => *v,
        }
    }

    /// Converts to `u64`; negative values clamp to zero.
    pub fn as_u64(&self) -> u64 {
        match self {
            CounterValue::Unsigned(v) => *v,
            CounterValue::Signed(v) => (*v).max(0) as u64,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            CounterValue::Unsigned(v) => *v as f64,
            CounterValue::Signed(v) => *v as f64,
        }
    }
}

/// How exporters should present an observable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonically increasing (event counts).
    #[default]
    Counter,
    /// May go up or down (materialized counter values).
    Gauge,
}

/// Anything whose current value can be read and exported.
pub trait Observable: Debug {
    /// Metric name; empty if unnamed.
    fn name(&self) -> &str;

    /// Current value.
    fn value(&self) -> CounterValue;

    fn metric_kind(&self) -> MetricKind {
        MetricKind::Counter
    }

    /// Key-value labels distinguishing observables that share a name.
    fn labels(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }
}

impl Display for dyn Observable + '_ {
    /// Formats as `name:value` if named, or just `value` otherwise.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.name().is_empty() {
            write!(f, "{}:{}", self.name(), self.value())
        } else {
            write!(f, "{}", self.value())
        }
    }
}

/// Access to the current thread's shard of a sharded counter.
pub trait GetComponentCounter {
    type CounterType: Atomic;

    fn get_component_counter(&self) -> &Self::CounterType;
}

/// An unsigned event counter sharded across cache-padded slots.
///
/// ```rust
/// use sommatori::stats::StatCounter;
///
/// let folded = StatCounter::new().with_name("deltas_folded");
/// folded.add(3);
/// folded.incr();
/// assert_eq!(folded.get(), 4);
/// ```
pub struct StatCounter {
    name: &'static str,
    components: [CachePadded<AtomicU64>; NUM_COMPONENTS],
}

impl GetComponentCounter for StatCounter {
    type CounterType = AtomicU64;

    #[inline]
    fn get_component_counter(&self) -> &AtomicU64 {
        THREAD_SLOT_INDEX.with(|idx| &self.components[*idx])
    }
}

impl StatCounter {
    /// An unnamed counter at zero. `const`, so it can back a `static`.
    ///
    /// # Examples
    ///
    /// ```
    /// use sommatori::stats::StatCounter;
    ///
    /// static RETRIES: StatCounter = StatCounter::new().with_name("retries");
    ///
    /// RETRIES.incr();
    /// assert_eq!(RETRIES.get(), 1);
    /// ```
    pub const fn new() -> Self {
        const ZERO: CachePadded<AtomicU64> = CachePadded::new(AtomicU64::new(0));
        StatCounter {
            components: [ZERO; NUM_COMPONENTS],
            name: "",
        }
    }

    /// Sets the name exporters publish the counter under.
    ///
    /// # Examples
    ///
    /// ```
    /// use sommatori::stats::{Observable, StatCounter};
    ///
    /// let counter = StatCounter::new().with_name("flushes");
    /// assert_eq!(counter.name(), "flushes");
    /// assert_eq!((&counter as &dyn Observable).to_string(), "flushes:0");
    /// ```
    pub const fn with_name(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// Adds to the current thread's shard.
    #[inline]
    pub fn add(&self, value: u64) {
        self.get_component_counter()
            .fetch_add(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr(&self) {
        self.add(1);
    }

    /// Sum of all shards.
    #[inline]
    pub fn get(&self) -> u64 {
        self.components
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .fold(0u64, u64::wrapping_add)
    }

    /// Sum of all shards, resetting each to zero.
    ///
    /// Each shard is swapped atomically, but not all shards together: an
    /// update racing with the reset lands in either this total or the next.
    pub fn take(&self) -> u64 {
        self.components
            .iter()
            .map(|slot| slot.swap(0, Ordering::Relaxed))
            .fold(0u64, u64::wrapping_add)
    }
}

impl Default for StatCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Observable for StatCounter {
    fn name(&self) -> &str {
        self.name
    }

    #[inline]
    fn value(&self) -> CounterValue {
        CounterValue::Unsigned(self.get())
    }
}

impl Debug for StatCounter {
    /// Shows the non-zero shards.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.name)?;
        for (i, slot) in self.components.iter().enumerate() {
            let val = slot.load(Ordering::Relaxed);
            if val != 0 {
                write!(f, " [{i}]:{val}")?;
            }
        }
        write!(f, " }}")
    }
}

/// Work done by the read and compaction aggregators.
#[derive(Debug)]
pub struct AggregationStats {
    /// Columns materialized by reads.
    pub reads_folded: StatCounter,
    /// Delta cells summed by reads.
    pub deltas_folded: StatCounter,
    /// Cells skipped by reads because their value did not decode.
    pub degraded_cells: StatCounter,
    /// Reads that folded a chain longer than the configured maximum.
    pub long_chains: StatCounter,
    /// Columns rewritten by flush or compaction.
    pub columns_compacted: StatCounter,
    /// Cells handed to the compaction aggregator.
    pub cells_in: StatCounter,
    /// Cells emitted by the compaction aggregator.
    pub cells_out: StatCounter,
    /// Column merges abandoned because a delta did not decode.
    pub merges_aborted: StatCounter,
    /// Column merges abandoned because a boundary could not be placed.
    pub boundary_violations: StatCounter,
}

impl AggregationStats {
    pub const fn new() -> Self {
        Self {
            reads_folded: StatCounter::new().with_name("reads_folded"),
            deltas_folded: StatCounter::new().with_name("deltas_folded"),
            degraded_cells: StatCounter::new().with_name("degraded_cells"),
            long_chains: StatCounter::new().with_name("long_chain_reads"),
            columns_compacted: StatCounter::new().with_name("columns_compacted"),
            cells_in: StatCounter::new().with_name("compaction_cells_in"),
            cells_out: StatCounter::new().with_name("compaction_cells_out"),
            merges_aborted: StatCounter::new().with_name("merges_aborted"),
            boundary_violations: StatCounter::new().with_name("boundary_violations"),
        }
    }

    /// All counters, in a stable order.
    pub fn counters(&self) -> [&StatCounter; 9] {
        [
            &self.reads_folded,
            &self.deltas_folded,
            &self.degraded_cells,
            &self.long_chains,
            &self.columns_compacted,
            &self.cells_in,
            &self.cells_out,
            &self.merges_aborted,
            &self.boundary_violations,
        ]
    }

    /// Cells removed by compaction so far.
    pub fn cells_reclaimed(&self) -> u64 {
        self.cells_in.get().saturating_sub(self.cells_out.get())
    }
}

impl Default for AggregationStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Activity of a store adapter.
pub struct StoreStats {
    pub appends: StatCounter,
    pub flushes: StatCounter,
    /// Flushes that wrote the frozen memtable unmerged after a racing overwrite.
    pub flush_fallbacks: StatCounter,
    pub compactions: StatCounter,
    /// Compactions triggered by a column reaching the delta-chain limit.
    pub forced_compactions: StatCounter,
    /// Compactions discarded at swap time.
    pub rollbacks: StatCounter,
    last_compaction: AtomicOptionInstant,
}

impl StoreStats {
    /// Zeroed statistics with no compaction recorded.
    ///
    /// # Examples
    ///
    /// ```
    /// use sommatori::stats::StoreStats;
    ///
    /// let stats = StoreStats::new();
    /// assert!(stats.since_last_compaction().is_none());
    /// assert!(stats.counters().iter().all(|c| c.get() == 0));
    /// ```
    pub const fn new() -> Self {
        Self {
            appends: StatCounter::new().with_name("appends"),
            flushes: StatCounter::new().with_name("flushes"),
            flush_fallbacks: StatCounter::new().with_name("flush_fallbacks"),
            compactions: StatCounter::new().with_name("compactions"),
            forced_compactions: StatCounter::new().with_name("forced_compactions"),
            rollbacks: StatCounter::new().with_name("compaction_rollbacks"),
            last_compaction: AtomicOptionInstant::none(),
        }
    }

    /// All counters, in a stable order.
    pub fn counters(&self) -> [&StatCounter; 6] {
        [
            &self.appends,
            &self.flushes,
            &self.flush_fallbacks,
            &self.compactions,
            &self.forced_compactions,
            &self.rollbacks,
        ]
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.incr();
        self.last_compaction
            .store(Some(Instant::now()), Ordering::Relaxed);
    }

    /// Time since the last completed compaction, if any.
    pub fn since_last_compaction(&self) -> Option<Duration> {
        self.last_compaction
            .load(Ordering::Relaxed)
            .map(|at| at.elapsed())
    }
}

impl Debug for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreStats")
            .field("appends", &self.appends.get())
            .field("flushes", &self.flushes.get())
            .field("flush_fallbacks", &self.flush_fallbacks.get())
            .field("compactions", &self.compactions.get())
            .field("forced_compactions", &self.forced_compactions.get())
            .field("rollbacks", &self.rollbacks.get())
            .field("since_last_compaction", &self.since_last_compaction())
            .finish()
    }
}

impl Default for StoreStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new() {
        let counter = StatCounter::new();
        assert_eq!(counter.get(), 0);
        assert_eq!(counter.name(), "");
    }

    #[test]
    fn test_add_and_take() {
        let counter = StatCounter::new().with_name("x");
        counter.add(5);
        counter.incr();
        assert_eq!(counter.value(), CounterValue::Unsigned(6));
        assert_eq!(counter.take(), 6);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_multiple_threads() {
        let counter = Arc::new(StatCounter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        c.incr();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.get(), 8000);
    }

    #[test]
    fn test_dyn_format() {
        let counter = StatCounter::new().with_name("flushes");
        counter.add(2);
        assert_eq!(format!("{}", &counter as &dyn Observable), "flushes:2");
        let unnamed = StatCounter::new();
        assert_eq!(format!("{}", &unnamed as &dyn Observable), "0");
    }

    #[test]
    fn test_debug_shows_non_zero_slots() {
        let counter = StatCounter::new().with_name("c");
        counter.add(3);
        let s = format!("{:?}", counter);
        assert!(s.starts_with("c{"));
        assert!(s.contains(":3"));
        assert!(s.ends_with("}"));
    }

    #[test]
    fn test_aggregation_stats_names_are_unique() {
        let stats = AggregationStats::new();
        let mut names: Vec<&str> = stats.counters().iter().map(|c| c.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 9);
    }

    #[test]
    fn test_cells_reclaimed() {
        let stats = AggregationStats::new();
        stats.cells_in.add(10);
        stats.cells_out.add(3);
        assert_eq!(stats.cells_reclaimed(), 7);
    }

    #[test]
    fn test_store_stats_last_compaction() {
        let stats = StoreStats::new();
        assert!(stats.since_last_compaction().is_none());
        stats.record_compaction();
        assert_eq!(stats.compactions.get(), 1);
        assert!(stats.since_last_compaction().is_some());
    }

    #[test]
    fn test_counter_value_conversions() {
        assert_eq!(CounterValue::Signed(-1).as_u64(), 0);
        assert_eq!(CounterValue::Unsigned(7).as_i64(), 7);
        assert!(!CounterValue::Signed(-1).is_zero());
    }
}
