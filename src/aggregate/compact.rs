//! Compaction-side merging of delta runs.
//!
//! A column's cells are walked oldest to newest. Maximal runs of consecutive
//! deltas collapse into one delta cell carrying the run's sum and the version
//! of its newest member; full-value cells pass through and close the current
//! run. The output stays a valid input for the read aggregator and for later
//! compactions, so merging is idempotent.
//!
//! ```text
//!   input (newest first)          output (newest first)
//!   ts=9  delta +1  ─┐
//!   ts=8  delta +1  ─┴──────────► ts=9  delta +2
//!   ts=7  full   5  ────────────► ts=7  full   5
//!   ts=3  delta +1  ─┐
//!   ts=2  delta +4  ─┴──────────► ts=3  delta +5
//! ```

use std::sync::Arc;

use tracing::{trace, warn};

use crate::cell::{encode_i64, Cell, CellVersion, Column};
use crate::error::{Error, Result};
use crate::stats::AggregationStats;

/// What triggered a rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CompactionScope {
    /// A memtable on its way to becoming a segment.
    #[default]
    Flush,
    /// All segments merged into one.
    Major,
}

/// Context handed to the compaction hook for one column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionRequest {
    pub scope: CompactionScope,
    /// Versions of full-value cells of the column that live outside the
    /// rewritten input. A run never spans one.
    pub boundaries: Vec<CellVersion>,
}

impl CompactionRequest {
    pub fn new(scope: CompactionScope) -> Self {
        Self {
            scope,
            boundaries: Vec::new(),
        }
    }

    pub fn with_boundaries(mut self, boundaries: Vec<CellVersion>) -> Self {
        self.boundaries = boundaries;
        self
    }
}

#[derive(Default)]
struct Run {
    newest: Option<Cell>,
    sum: i64,
    len: usize,
}

impl Run {
    fn push(&mut self, cell: &Cell, delta: i64) {
        self.sum = self.sum.wrapping_add(delta);
        self.len += 1;
        self.newest = Some(cell.clone());
    }

    fn close(&mut self, out: &mut Vec<Cell>) {
        let len = std::mem::take(&mut self.len);
        let sum = std::mem::take(&mut self.sum);
        match self.newest.take() {
            Some(cell) if len == 1 => out.push(cell),
            Some(cell) => out.push(Cell {
                value: encode_i64(sum),
                ..cell
            }),
            None => {}
        }
    }
}

fn violation(column: &Column, version: CellVersion) -> Error {
    Error::AggregationBoundaryViolation {
        column: column.to_string(),
        version,
    }
}

/// Merges the delta runs of one column.
///
/// `cells` must belong to `column` and be strictly newest first; anything
/// else is reported as an [`Error::AggregationBoundaryViolation`]. A delta
/// that does not decode fails the merge with [`Error::Encoding`]. `boundaries`
/// close runs exactly like full-value cells in the input do.
pub fn merge_column(
    column: &Column,
    cells: &[Cell],
    boundaries: &[CellVersion],
) -> Result<Vec<Cell>> {
    if let Some(stray) = cells.iter().find(|c| !column.contains(c)) {
        return Err(violation(column, stray.version()));
    }
    if let Some(pair) = cells.windows(2).find(|w| w[0].version() <= w[1].version()) {
        return Err(violation(column, pair[1].version()));
    }

    let mut boundaries = boundaries.to_vec();
    boundaries.sort_unstable();
    let mut pending = boundaries.into_iter().peekable();

    let mut out = Vec::with_capacity(cells.len());
    let mut run = Run::default();

    for cell in cells.iter().rev() {
        let version = cell.version();
        let mut crossed = false;
        while pending.next_if(|b| *b < version).is_some() {
            crossed = true;
        }
        if crossed {
            run.close(&mut out);
        }

        if cell.is_delta {
            run.push(cell, cell.as_i64()?);
        } else {
            run.close(&mut out);
            out.push(cell.clone());
        }
    }
    run.close(&mut out);

    out.reverse();
    Ok(out)
}

/// Rewrites columns during flush and compaction.
///
/// Never fails: when a column cannot be merged safely its cells are returned
/// unchanged and the event is logged and counted.
#[derive(Debug, Clone)]
pub struct CompactionAggregator {
    stats: Arc<AggregationStats>,
}

impl CompactionAggregator {
    pub fn new(stats: Arc<AggregationStats>) -> Self {
        Self { stats }
    }

    pub fn stats(&self) -> &Arc<AggregationStats> {
        &self.stats
    }

    pub fn compact(
        &self,
        column: &Column,
        cells: Vec<Cell>,
        request: &CompactionRequest,
    ) -> Vec<Cell> {
        self.stats.cells_in.add(cells.len() as u64);

        match merge_column(column, &cells, &request.boundaries) {
            Ok(merged) => {
                self.stats.cells_out.add(merged.len() as u64);
                if merged.len() < cells.len() {
                    self.stats.columns_compacted.incr();
                    trace!(
                        %column,
                        scope = ?request.scope,
                        before = cells.len(),
                        after = merged.len(),
                        "delta runs merged"
                    );
                }
                merged
            }
            Err(err) => {
                match err {
                    Error::AggregationBoundaryViolation { .. } => {
                        self.stats.boundary_violations.incr()
                    }
                    _ => self.stats.merges_aborted.incr(),
                }
                warn!(%column, scope = ?request.scope, error = %err, "column left unmerged");
                self.stats.cells_out.add(cells.len() as u64);
                cells
            }
        }
    }
}
