//! Hooks a store runs on its read, flush and compaction paths.
//!
//! A [`StoreExtension`] sees one column at a time and may rewrite its cells.
//! [`IncrementHandler`] is the extension that gives delta cells their meaning:
//! reads see one materialized value per column, and flushes and compactions
//! shrink delta chains.
//!
//! ```rust
//! use sommatori::cell::{Cell, Column};
//! use sommatori::extension::{IncrementHandler, StoreExtension};
//!
//! let handler = IncrementHandler::new();
//! let col = Column::new("row1", "i", "a");
//! let cells = vec![
//!     Cell::delta(&col, 2, 1).with_sequence(2),
//!     Cell::delta(&col, 1, 1).with_sequence(1),
//! ];
//! let read = handler.before_read(&col, cells);
//! assert_eq!(read.len(), 1);
//! assert_eq!(read[0].as_i64().unwrap(), 2);
//! ```

use std::sync::Arc;

use crate::aggregate::{CompactionAggregator, CompactionRequest, ReadAggregator};
use crate::cell::{Cell, Column};
use crate::config::Config;
use crate::stats::AggregationStats;

/// Per-column hooks on a store's internal paths.
///
/// Every hook receives the raw cells of one column, newest first, and returns
/// the cells to use in their place. Hooks must not fail; an implementation
/// that cannot process a column returns its input.
pub trait StoreExtension: Send + Sync {
    /// Runs before cells are returned by a point read or a scan.
    fn before_read(&self, column: &Column, cells: Vec<Cell>) -> Vec<Cell>;

    /// Runs before a frozen memtable is written out as a segment.
    fn before_flush(
        &self,
        column: &Column,
        cells: Vec<Cell>,
        request: &CompactionRequest,
    ) -> Vec<Cell> {
        self.before_compact(column, cells, request)
    }

    /// Runs before merged segments replace their inputs.
    fn before_compact(
        &self,
        column: &Column,
        cells: Vec<Cell>,
        request: &CompactionRequest,
    ) -> Vec<Cell>;
}

/// Leaves every column untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl StoreExtension for PassThrough {
    fn before_read(&self, _column: &Column, cells: Vec<Cell>) -> Vec<Cell> {
        cells
    }

    fn before_compact(
        &self,
        _column: &Column,
        cells: Vec<Cell>,
        _request: &CompactionRequest,
    ) -> Vec<Cell> {
        cells
    }
}

/// Folds delta chains on read and merges delta runs on flush and compaction.
#[derive(Debug, Clone)]
pub struct IncrementHandler {
    read: ReadAggregator,
    compact: CompactionAggregator,
    stats: Arc<AggregationStats>,
}

impl Default for IncrementHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl IncrementHandler {
    pub fn new() -> Self {
        Self::with_stats(Arc::new(AggregationStats::new()))
    }

    /// Shares `stats` with the caller, e.g. to register it with an exporter.
    pub fn with_stats(stats: Arc<AggregationStats>) -> Self {
        Self {
            read: ReadAggregator::new(Arc::clone(&stats)),
            compact: CompactionAggregator::new(Arc::clone(&stats)),
            stats,
        }
    }

    pub fn with_config(config: &Config) -> Self {
        Self::new().with_max_delta_chain(config.max_delta_chain)
    }

    /// Reads folding more than `length` deltas are reported; 0 disables.
    pub fn with_max_delta_chain(mut self, length: usize) -> Self {
        self.read = self.read.with_max_delta_chain(length);
        self
    }

    pub fn stats(&self) -> &Arc<AggregationStats> {
        &self.stats
    }
}

impl StoreExtension for IncrementHandler {
    fn before_read(&self, _column: &Column, cells: Vec<Cell>) -> Vec<Cell> {
        self.read.fold(&cells).into_iter().collect()
    }

    fn before_compact(
        &self,
        column: &Column,
        cells: Vec<Cell>,
        request: &CompactionRequest,
    ) -> Vec<Cell> {
        self.compact.compact(column, cells, request)
    }
}

impl<E: StoreExtension + ?Sized> StoreExtension for Arc<E> {
    fn before_read(&self, column: &Column, cells: Vec<Cell>) -> Vec<Cell> {
        (**self).before_read(column, cells)
    }

    fn before_flush(
        &self,
        column: &Column,
        cells: Vec<Cell>,
        request: &CompactionRequest,
    ) -> Vec<Cell> {
        (**self).before_flush(column, cells, request)
    }

    fn before_compact(
        &self,
        column: &Column,
        cells: Vec<Cell>,
        request: &CompactionRequest,
    ) -> Vec<Cell> {
        (**self).before_compact(column, cells, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::CompactionScope;

    fn chain(col: &Column) -> Vec<Cell> {
        vec![
            Cell::delta(col, 5, 1).with_sequence(5),
            Cell::delta(col, 4, 1).with_sequence(4),
            Cell::full(col, 3, 5).with_sequence(3),
            Cell::delta(col, 2, 1).with_sequence(2),
            Cell::delta(col, 1, 1).with_sequence(1),
        ]
    }

    #[test]
    fn test_pass_through() {
        let col = Column::new("r", "i", "a");
        let cells = chain(&col);
        assert_eq!(PassThrough.before_read(&col, cells.clone()), cells);
        let req = CompactionRequest::new(CompactionScope::Flush);
        assert_eq!(PassThrough.before_flush(&col, cells.clone(), &req), cells);
    }

    #[test]
    fn test_handler_read() {
        let col = Column::new("r", "i", "a");
        let handler = IncrementHandler::new();
        let out = handler.before_read(&col, chain(&col));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_i64().unwrap(), 7);
        assert!(!out[0].is_delta);
        assert!(handler.before_read(&col, Vec::new()).is_empty());
        assert_eq!(handler.stats().reads_folded.get(), 1);
    }

    #[test]
    fn test_handler_flush_defaults_to_compact() {
        let col = Column::new("r", "i", "a");
        let handler = IncrementHandler::new();
        let req = CompactionRequest::new(CompactionScope::Flush);
        let out = handler.before_flush(&col, chain(&col), &req);
        let values: Vec<(bool, i64)> = out
            .iter()
            .map(|c| (c.is_delta, c.as_i64().unwrap()))
            .collect();
        assert_eq!(values, vec![(true, 2), (false, 5), (true, 2)]);
        assert_eq!(handler.stats().cells_reclaimed(), 2);
    }

    #[test]
    fn test_shared_stats() {
        let stats = Arc::new(AggregationStats::new());
        let handler: Arc<dyn StoreExtension> = Arc::new(IncrementHandler::with_stats(Arc::clone(&stats)));
        let col = Column::new("r", "i", "a");
        handler.before_read(&col, chain(&col));
        assert_eq!(stats.deltas_folded.get(), 2);
    }
}
