//! An in-process LSM-style [`CellStore`].
//!
//! Cells land in a sorted memtable. Once it is full it is frozen and written
//! out as an immutable segment, passing through the extension's flush hook on
//! the way. Compaction merges every segment into one through the compaction
//! hook. Reads see the union of the memtable, a frozen memtable still being
//! flushed and all segments, and run the read hook on every column.
//!
//! ```text
//!   append ──► memtable ──flush──► segment 0 ┐
//!                                  segment 1 ├──compact──► segment 0'
//!                                  segment 2 ┘
//! ```
//!
//! Flush and compaction rewrite their input without holding the store lock,
//! so writers are never blocked by a merge. A full-value write that races
//! with a merge is checked for at swap time: a merged run spanning it means
//! the flush falls back to its unmerged input and the compaction is
//! discarded. Once a merge is swapped in, a full-value write whose
//! caller-chosen timestamp falls inside a merged run is rejected with
//! [`Error::AggregationBoundaryViolation`]: the deltas it would have split are
//! already one cell.
//!
//! ```rust
//! use sommatori::cell::Column;
//! use sommatori::config::{ClockKind, Config};
//! use sommatori::store::memory::MemStore;
//! use sommatori::store::CellStore;
//! use sommatori::write::Mutation;
//!
//! let store = MemStore::with_increments(Config::new().with_clock(ClockKind::Logical)).unwrap();
//! for _ in 0..3 {
//!     let ts = store.next_timestamp();
//!     store.append(Mutation::increment("row1", "i", "a", 1).into_cell(ts).unwrap()).unwrap();
//! }
//! store.compact().unwrap();
//!
//! let raw = store.read_column(&Column::new("row1", "i", "a")).unwrap();
//! assert_eq!(raw.len(), 1);
//! assert_eq!(raw[0].as_i64().unwrap(), 3);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::aggregate::{CompactionRequest, CompactionScope};
use crate::cell::{Cell, CellVersion, Column};
use crate::config::{ClockKind, Config};
use crate::error::{Error, Result};
use crate::extension::{IncrementHandler, PassThrough, StoreExtension};
use crate::stats::StoreStats;
use crate::store::segment::{self, CellMap, Segment, View};
use crate::store::{CellStore, ColumnSelection, RowCells, RowRange};

struct Clock {
    kind: ClockKind,
    last: AtomicU64,
}

impl Clock {
    fn new(kind: ClockKind) -> Self {
        Self {
            kind,
            last: AtomicU64::new(0),
        }
    }

    fn now(&self) -> u64 {
        match self.kind {
            ClockKind::Logical => self.last.fetch_add(1, Ordering::Relaxed) + 1,
            ClockKind::Wall => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                self.last.fetch_max(now, Ordering::Relaxed).max(now)
            }
        }
    }
}

#[derive(Default)]
struct Inner {
    memtable: CellMap,
    frozen: Option<Arc<CellMap>>,
    segments: Vec<Arc<Segment>>,
    chain_lengths: HashMap<Column, usize>,
    /// Version spans `(oldest, newest)` folded into single cells, per column.
    merged: HashMap<Column, Vec<(CellVersion, CellVersion)>>,
}

impl Inner {
    fn view(&self) -> View<'_> {
        View::new(
            std::iter::once(&self.memtable)
                .chain(self.frozen.as_deref())
                .chain(self.segments.iter().map(|s| s.cells())),
        )
    }

    fn record_merges(&mut self, rewrites: &[Rewrite]) {
        for rw in rewrites {
            for (mut from, mut to) in rw.merged_spans() {
                let spans = self.merged.entry(rw.column.clone()).or_default();
                spans.retain(|&(f, t)| {
                    let overlaps = f <= to && from <= t;
                    if overlaps {
                        from = from.min(f);
                        to = to.max(t);
                    }
                    !overlaps
                });
                spans.push((from, to));
            }
        }
    }

    /// The merged span a full-value cell at `version` would split, if any.
    fn merged_span_around(
        &self,
        column: &Column,
        version: CellVersion,
    ) -> Option<(CellVersion, CellVersion)> {
        self.merged
            .get(column)?
            .iter()
            .find(|&&(from, to)| from < version && version < to)
            .copied()
    }

    /// Spans entirely below a full-value cell can no longer be read through.
    fn forget_merges_below(&mut self, column: &Column, version: CellVersion) {
        if let Some(spans) = self.merged.get_mut(column) {
            spans.retain(|&(_, to)| to > version);
            if spans.is_empty() {
                self.merged.remove(column);
            }
        }
    }
}

/// What a rewrite did to one column, kept to validate the swap.
struct Rewrite {
    column: Column,
    /// Input versions, oldest first.
    inputs: Vec<CellVersion>,
    outputs: Vec<CellVersion>,
}

impl Rewrite {
    /// Whether a full-value cell at `boundary` would sit inside a merged run.
    ///
    /// The input cell just below the boundary must survive as-is; if it was
    /// folded into a newer cell, the run spans the boundary.
    fn crosses(&self, boundary: CellVersion) -> bool {
        let below = self.inputs.partition_point(|v| *v < boundary);
        below > 0 && !self.outputs.contains(&self.inputs[below - 1])
    }

    /// Spans `(oldest, newest)` of the runs folded into one output cell.
    fn merged_spans(&self) -> Vec<(CellVersion, CellVersion)> {
        let mut spans = Vec::new();
        let mut oldest = None;
        for &version in &self.inputs {
            if self.outputs.contains(&version) {
                if let Some(from) = oldest.take() {
                    spans.push((from, version));
                }
            } else if oldest.is_none() {
                oldest = Some(version);
            }
        }
        spans
    }

    fn crossed_by(&self, memtable: &CellMap) -> bool {
        segment::full_versions(memtable, &self.column)
            .into_iter()
            .any(|b| self.crosses(b))
    }
}

/// Result of [`MemStore::flush`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    pub cells_in: usize,
    pub cells_out: usize,
    /// The merged cells were discarded for a racing overwrite.
    pub fell_back: bool,
}

/// Result of [`MemStore::compact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Another flush or compaction was running.
    Skipped,
    /// A racing overwrite invalidated the merge; segments are unchanged.
    RolledBack,
    Completed {
        segments: usize,
        cells_before: usize,
        cells_after: usize,
    },
}

/// An in-memory, thread-safe cell store with flush and compaction.
pub struct MemStore {
    config: Config,
    extension: Arc<dyn StoreExtension>,
    inner: RwLock<Inner>,
    maintenance: Mutex<()>,
    clock: Clock,
    sequence: AtomicU64,
    full_writes: AtomicU64,
    segment_ids: AtomicU64,
    available: AtomicBool,
    stats: StoreStats,
}

impl std::fmt::Debug for MemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("MemStore")
            .field("memtable", &inner.memtable.len())
            .field(
                "segments",
                &inner
                    .segments
                    .iter()
                    .map(|s| (s.id(), s.len()))
                    .collect::<Vec<_>>(),
            )
            .field("available", &self.is_available())
            .field("stats", &self.stats)
            .finish()
    }
}

impl MemStore {
    /// A store running `extension` on every read, flush and compaction.
    ///
    /// Fails with [`Error::InvalidConfig`] if `config` does not validate.
    pub fn new(config: Config, extension: Arc<dyn StoreExtension>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            clock: Clock::new(config.clock),
            config,
            extension,
            inner: RwLock::new(Inner::default()),
            maintenance: Mutex::new(()),
            sequence: AtomicU64::new(0),
            full_writes: AtomicU64::new(0),
            segment_ids: AtomicU64::new(0),
            available: AtomicBool::new(true),
            stats: StoreStats::new(),
        })
    }

    /// A store that folds delta chains on read, flush and compaction.
    pub fn with_increments(config: Config) -> Result<Self> {
        let handler = IncrementHandler::with_config(&config);
        Self::new(config, Arc::new(handler))
    }

    /// A store with no extension installed.
    pub fn plain(config: Config) -> Result<Self> {
        Self::new(config, Arc::new(PassThrough))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn extension(&self) -> &Arc<dyn StoreExtension> {
        &self.extension
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Takes the store offline or back online; offline stores fail every call.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
        info!(available, "store availability changed");
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn segment_count(&self) -> usize {
        self.inner.read().segments.len()
    }

    pub fn memtable_len(&self) -> usize {
        self.inner.read().memtable.len()
    }

    /// Physical cells held, across memtable and segments.
    pub fn cell_count(&self) -> usize {
        self.inner.read().view().len()
    }

    /// Whether a compaction would change anything.
    pub fn needs_compaction(&self) -> bool {
        let inner = self.inner.read();
        inner.segments.len() > 1 || (!inner.segments.is_empty() && !inner.memtable.is_empty())
    }

    fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(Error::StoreUnavailable("memory store is offline".into()))
        }
    }

    /// Writes the memtable out as a new segment.
    ///
    /// # Examples
    ///
    /// ```
    /// use sommatori::config::Config;
    /// use sommatori::store::memory::MemStore;
    /// use sommatori::table::CounterTable;
    ///
    /// let table = CounterTable::new(MemStore::with_increments(Config::new()).unwrap());
    /// for _ in 0..4 {
    ///     table.increment("row", "i", "a", 1).unwrap();
    /// }
    /// let outcome = table.store().flush().unwrap();
    /// assert_eq!((outcome.cells_in, outcome.cells_out), (4, 1));
    /// assert_eq!(table.store().segment_count(), 1);
    /// ```
    pub fn flush(&self) -> Result<FlushOutcome> {
        let _guard = self.maintenance.lock();
        self.flush_locked()
    }

    /// Merges every segment, and the memtable, into a single segment.
    ///
    /// Blocks while another flush or compaction is running.
    ///
    /// # Examples
    ///
    /// ```
    /// use sommatori::config::Config;
    /// use sommatori::store::memory::{CompactionOutcome, MemStore};
    /// use sommatori::table::CounterTable;
    ///
    /// let table = CounterTable::new(MemStore::with_increments(Config::new()).unwrap());
    /// table.increment("row", "i", "a", 1).unwrap();
    /// table.store().flush().unwrap();
    /// table.increment("row", "i", "a", 1).unwrap();
    /// table.store().flush().unwrap();
    ///
    /// let outcome = table.store().compact().unwrap();
    /// assert!(matches!(outcome, CompactionOutcome::Completed { segments: 2, .. }));
    /// assert_eq!(table.value("row", "i", "a").unwrap(), Some(2));
    /// ```
    pub fn compact(&self) -> Result<CompactionOutcome> {
        let _guard = self.maintenance.lock();
        self.compact_locked()
    }

    /// Like [`compact`](Self::compact), but returns
    /// [`CompactionOutcome::Skipped`] instead of waiting.
    pub fn try_compact(&self) -> Result<CompactionOutcome> {
        match self.maintenance.try_lock() {
            Some(_guard) => self.compact_locked(),
            None => Ok(CompactionOutcome::Skipped),
        }
    }

    fn rewrite(
        &self,
        input: &CellMap,
        scope: CompactionScope,
        boundaries: impl Fn(&Column) -> Vec<CellVersion>,
    ) -> (CellMap, Vec<Rewrite>) {
        let mut output = CellMap::new();
        let mut rewrites = Vec::new();

        for (column, cells) in segment::columns(input) {
            let request = CompactionRequest::new(scope).with_boundaries(boundaries(&column));
            let rewritten = match scope {
                CompactionScope::Flush => {
                    self.extension
                        .before_flush(&column, cells.clone(), &request)
                }
                CompactionScope::Major => {
                    self.extension
                        .before_compact(&column, cells.clone(), &request)
                }
            };

            let cells = if rewritten.iter().all(|c| column.contains(c)) {
                if rewritten.len() != cells.len() {
                    rewrites.push(Rewrite {
                        column: column.clone(),
                        inputs: cells.iter().rev().map(Cell::version).collect(),
                        outputs: rewritten.iter().map(Cell::version).collect(),
                    });
                }
                rewritten
            } else {
                warn!(%column, "extension returned cells of another column, keeping input");
                cells
            };
            output.extend(cells.into_iter().map(|c| (c.key(), c)));
        }
        (output, rewrites)
    }

    fn flush_locked(&self) -> Result<FlushOutcome> {
        self.ensure_available()?;

        let (frozen, segments, generation) = {
            let mut inner = self.inner.write();
            if inner.memtable.is_empty() {
                return Ok(FlushOutcome::default());
            }
            let frozen = Arc::new(std::mem::take(&mut inner.memtable));
            inner.frozen = Some(Arc::clone(&frozen));
            (
                frozen,
                inner.segments.clone(),
                self.full_writes.load(Ordering::Acquire),
            )
        };

        let started = Instant::now();
        let (merged, rewrites) = if self.config.aggregate_on_flush {
            self.rewrite(&frozen, CompactionScope::Flush, |column| {
                segments
                    .iter()
                    .flat_map(|s| segment::full_versions(s.cells(), column))
                    .collect()
            })
        } else {
            (frozen.as_ref().clone(), Vec::new())
        };

        let mut inner = self.inner.write();
        let raced = self.full_writes.load(Ordering::Acquire) != generation;
        let fell_back = raced && rewrites.iter().any(|rw| rw.crossed_by(&inner.memtable));
        let cells = if fell_back {
            self.stats.flush_fallbacks.incr();
            warn!("overwrite raced with flush, writing segment unmerged");
            frozen.as_ref().clone()
        } else {
            inner.record_merges(&rewrites);
            merged
        };

        let outcome = FlushOutcome {
            cells_in: frozen.len(),
            cells_out: cells.len(),
            fell_back,
        };
        let id = self.segment_ids.fetch_add(1, Ordering::Relaxed);
        inner.segments.push(Arc::new(Segment::new(id, cells)));
        inner.frozen = None;
        drop(inner);

        self.stats.flushes.incr();
        debug!(
            segment = id,
            cells_in = outcome.cells_in,
            cells_out = outcome.cells_out,
            elapsed = ?started.elapsed(),
            "memtable flushed"
        );
        Ok(outcome)
    }

    fn compact_locked(&self) -> Result<CompactionOutcome> {
        self.flush_locked()?;

        let (segments, generation, boundaries) = {
            let inner = self.inner.read();
            let mut boundaries: HashMap<Column, Vec<CellVersion>> = HashMap::new();
            for cell in inner.memtable.values().filter(|c| !c.is_delta) {
                boundaries.entry(cell.column()).or_default().push(cell.version());
            }
            (
                inner.segments.clone(),
                self.full_writes.load(Ordering::Acquire),
                boundaries,
            )
        };
        if segments.is_empty() {
            return Ok(CompactionOutcome::Completed {
                segments: 0,
                cells_before: 0,
                cells_after: 0,
            });
        }

        let started = Instant::now();
        let mut input = CellMap::new();
        for s in &segments {
            input.extend(s.cells().iter().map(|(k, c)| (k.clone(), c.clone())));
        }
        let cells_before = input.len();
        let (merged, rewrites) = self.rewrite(&input, CompactionScope::Major, |column| {
            boundaries.get(column).cloned().unwrap_or_default()
        });
        drop(input);

        let mut inner = self.inner.write();
        let raced = self.full_writes.load(Ordering::Acquire) != generation;
        if raced && rewrites.iter().any(|rw| rw.crossed_by(&inner.memtable)) {
            drop(inner);
            self.stats.rollbacks.incr();
            warn!(segments = segments.len(), "overwrite raced with compaction, rolled back");
            return Ok(CompactionOutcome::RolledBack);
        }

        let cells_after = merged.len();
        let id = self.segment_ids.fetch_add(1, Ordering::Relaxed);
        let replaced = segments.len();
        let newer = inner.segments.split_off(replaced);
        inner.segments = std::iter::once(Arc::new(Segment::new(id, merged)))
            .chain(newer)
            .collect();
        inner.chain_lengths.clear();
        inner.record_merges(&rewrites);
        drop(inner);

        self.stats.record_compaction();
        info!(
            segment = id,
            replaced,
            cells_before,
            cells_after,
            elapsed = ?started.elapsed(),
            "compaction finished"
        );
        Ok(CompactionOutcome::Completed {
            segments: replaced,
            cells_before,
            cells_after,
        })
    }

    fn after_append(&self, column: &Column, flush_due: bool, chain_due: bool) {
        if chain_due {
            match self.try_compact() {
                Ok(CompactionOutcome::Completed { .. }) => self.stats.forced_compactions.incr(),
                Ok(outcome) => {
                    // re-arm: the next attempt waits for another full chain
                    self.inner.write().chain_lengths.remove(column);
                    debug!(%column, ?outcome, "forced compaction did not run");
                }
                Err(err) => {
                    self.inner.write().chain_lengths.remove(column);
                    warn!(error = %err, "forced compaction failed");
                }
            }
            return;
        }
        if !flush_due {
            return;
        }
        let Some(_guard) = self.maintenance.try_lock() else {
            return;
        };
        let result = self.flush_locked().and_then(|_| {
            if self.segment_count() > self.config.max_segments {
                self.compact_locked().map(|_| ())
            } else {
                Ok(())
            }
        });
        if let Err(err) = result {
            warn!(error = %err, "background maintenance after append failed");
        }
    }

    fn materialize(&self, columns: Vec<(Column, Vec<Cell>)>) -> Vec<Cell> {
        columns
            .into_iter()
            .filter(|(_, cells)| !cells.is_empty())
            .flat_map(|(column, cells)| self.extension.before_read(&column, cells))
            .collect()
    }
}

impl CellStore for MemStore {
    fn next_timestamp(&self) -> u64 {
        self.clock.now()
    }

    fn append(&self, cell: Cell) -> Result<CellVersion> {
        self.ensure_available()?;

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let cell = cell.with_sequence(sequence);
        let version = cell.version();
        let column = cell.column();
        let is_delta = cell.is_delta;

        let (flush_due, chain_due) = {
            let mut inner = self.inner.write();
            if !is_delta {
                if let Some((from, to)) = inner.merged_span_around(&column, version) {
                    warn!(%column, %version, %from, %to, "overwrite falls inside a merged delta run");
                    return Err(Error::AggregationBoundaryViolation {
                        column: column.to_string(),
                        version,
                    });
                }
                inner.forget_merges_below(&column, version);
            }
            let chain = inner.chain_lengths.entry(column.clone()).or_default();
            if is_delta {
                *chain += 1;
            } else {
                *chain = 0;
                self.full_writes.fetch_add(1, Ordering::AcqRel);
            }
            let chain_due = self.config.max_delta_chain > 0 && *chain >= self.config.max_delta_chain;
            inner.memtable.insert(cell.key(), cell);
            (inner.memtable.len() >= self.config.memtable_flush_cells, chain_due)
        };
        self.stats.appends.incr();

        if chain_due {
            debug!(%version, "delta chain limit reached, forcing compaction");
        }
        self.after_append(&column, flush_due, chain_due);
        Ok(version)
    }

    fn read_column(&self, column: &Column) -> Result<Vec<Cell>> {
        self.ensure_available()?;
        Ok(self.inner.read().view().column_cells(column))
    }

    fn get(&self, row: &[u8], selection: &ColumnSelection) -> Result<RowCells> {
        self.ensure_available()?;
        let columns: Vec<(Column, Vec<Cell>)> = {
            let inner = self.inner.read();
            let view = inner.view();
            view.columns(row, selection)
                .into_iter()
                .map(|column| {
                    let cells = view.column_cells(&column);
                    (column, cells)
                })
                .collect()
        };
        Ok(RowCells {
            row: row.to_vec(),
            cells: self.materialize(columns),
        })
    }

    fn scan(
        &self,
        range: &RowRange,
        selection: &ColumnSelection,
        limit: usize,
    ) -> Result<Vec<RowCells>> {
        self.ensure_available()?;
        let rows: Vec<(Vec<u8>, Vec<(Column, Vec<Cell>)>)> = {
            let inner = self.inner.read();
            let view = inner.view();
            view.rows(range, limit)
                .into_iter()
                .map(|row| {
                    let columns = view
                        .columns(&row, selection)
                        .into_iter()
                        .map(|column| {
                            let cells = view.column_cells(&column);
                            (column, cells)
                        })
                        .collect();
                    (row, columns)
                })
                .collect()
        };
        Ok(rows
            .into_iter()
            .map(|(row, columns)| RowCells {
                row,
                cells: self.materialize(columns),
            })
            .collect())
    }
}

/// Periodically compacts a [`MemStore`] from a background thread.
///
/// Holds only a weak reference, so the store can be dropped while the
/// compactor runs. Stops when dropped.
pub struct BackgroundCompactor {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundCompactor {
    /// Starts a thread that tries a compaction every `interval`.
    pub fn spawn(store: &Arc<MemStore>, interval: Duration) -> std::io::Result<Self> {
        let weak: Weak<MemStore> = Arc::downgrade(store);
        let stop = Arc::new(AtomicBool::new(false));
        let stopped = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("sommatori-compactor".into())
            .spawn(move || {
                debug!(?interval, "background compactor started");
                loop {
                    thread::park_timeout(interval);
                    if stopped.load(Ordering::Acquire) {
                        break;
                    }
                    let Some(store) = weak.upgrade() else {
                        break;
                    };
                    if !store.is_available() || !store.needs_compaction() {
                        continue;
                    }
                    match store.try_compact() {
                        Ok(outcome) => debug!(?outcome, "background compaction"),
                        Err(err) => warn!(error = %err, "background compaction failed"),
                    }
                }
                debug!("background compactor stopped");
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for BackgroundCompactor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}
