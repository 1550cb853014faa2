//! Read-side folding of a column's delta chain.
//!
//! ```rust
//! use sommatori::aggregate::fold_column;
//! use sommatori::cell::{Cell, Column};
//!
//! let col = Column::new("row1", "i", "a");
//! // newest first: +1, +1, overwrite 5, +1 (shadowed)
//! let cells = vec![
//!     Cell::delta(&col, 9, 1),
//!     Cell::delta(&col, 8, 1),
//!     Cell::full(&col, 7, 5),
//!     Cell::delta(&col, 3, 1),
//! ];
//! let folded = fold_column(&cells).unwrap();
//! assert_eq!(folded.cell.as_i64().unwrap(), 7);
//! assert_eq!(folded.cell.timestamp, 9);
//! assert!(!folded.cell.is_delta);
//! ```

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cell::{encode_i64, Cell};
use crate::stats::AggregationStats;

/// Result of folding one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folded {
    /// The materialized full-value cell.
    pub cell: Cell,
    /// Delta cells summed.
    pub deltas: usize,
    /// Cells skipped because their value did not decode.
    pub degraded: usize,
    /// Whether a full-value cell terminated the chain.
    pub bounded: bool,
}

/// Folds the newest-first cells of one column into a single value.
///
/// Consecutive deltas are summed from the newest end; the first full-value
/// cell is added once and ends the walk. Undecodable deltas are skipped and an
/// undecodable full-value cell still ends the walk, contributing nothing.
/// Returns `None` for a column without cells. The sum wraps on overflow.
pub fn fold_column(cells: &[Cell]) -> Option<Folded> {
    let newest = cells.first()?;
    let mut sum = 0i64;
    let mut deltas = 0;
    let mut degraded = 0;
    let mut bounded = false;

    for cell in cells {
        match (cell.is_delta, cell.as_i64()) {
            (true, Ok(delta)) => {
                sum = sum.wrapping_add(delta);
                deltas += 1;
            }
            (true, Err(_)) => degraded += 1,
            (false, Ok(value)) => {
                sum = sum.wrapping_add(value);
                bounded = true;
                break;
            }
            (false, Err(_)) => {
                degraded += 1;
                bounded = true;
                break;
            }
        }
    }

    Some(Folded {
        cell: Cell {
            row: newest.row.clone(),
            family: newest.family.clone(),
            qualifier: newest.qualifier.clone(),
            timestamp: newest.timestamp,
            value: encode_i64(sum),
            is_delta: false,
            sequence: newest.sequence,
        },
        deltas,
        degraded,
        bounded,
    })
}

/// Intercepts reads and replaces raw cells with materialized values.
///
/// Reads never fail because of aggregation: degraded cells are logged and
/// counted, and the caller gets the best-effort sum.
#[derive(Debug, Clone)]
pub struct ReadAggregator {
    stats: Arc<AggregationStats>,
    max_delta_chain: usize,
}

impl ReadAggregator {
    pub fn new(stats: Arc<AggregationStats>) -> Self {
        Self {
            stats,
            max_delta_chain: 0,
        }
    }

    /// Chains longer than `length` are reported as long-chain reads; 0 disables.
    pub fn with_max_delta_chain(mut self, length: usize) -> Self {
        self.max_delta_chain = length;
        self
    }

    pub fn stats(&self) -> &Arc<AggregationStats> {
        &self.stats
    }

    /// Materializes one column; `None` if it has no cells.
    pub fn fold(&self, cells: &[Cell]) -> Option<Cell> {
        let folded = fold_column(cells)?;
        self.stats.reads_folded.incr();
        self.stats.deltas_folded.add(folded.deltas as u64);

        if folded.degraded > 0 {
            self.stats.degraded_cells.add(folded.degraded as u64);
            warn!(
                column = %folded.cell.column(),
                skipped = folded.degraded,
                "undecodable cells skipped while folding"
            );
        }

        if self.max_delta_chain > 0 && folded.deltas > self.max_delta_chain {
            self.stats.long_chains.incr();
            debug!(
                column = %folded.cell.column(),
                deltas = folded.deltas,
                limit = self.max_delta_chain,
                "long delta chain"
            );
        }

        Some(folded.cell)
    }
}
