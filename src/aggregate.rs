//! Folding delta chains into values.
//!
//! Two aggregators share the same arithmetic but differ in what they may do
//! with the result:
//!
//! | Aggregator | Runs on | Output | Mutates the store |
//! |------------|---------|--------|-------------------|
//! | [`ReadAggregator`] | every point read and scan | one full-value cell per column | no |
//! | [`CompactionAggregator`] | flush and compaction | fewer cells, runs merged into delta cells | yes, via the store's segment swap |
//!
//! Both treat a full-value cell as a hard boundary. The read side stops at
//! the first one; the compaction side never merges across one, whether it
//! sits in its input or (as a [`CompactionRequest`] boundary) elsewhere in
//! the store.

mod compact;
mod read;

pub use compact::{merge_column, CompactionAggregator, CompactionRequest, CompactionScope};
pub use read::{fold_column, Folded, ReadAggregator};
