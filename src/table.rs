//! Counter reads and writes over any [`CellStore`].
//!
//! [`CounterTable`] is the client-facing surface: it tags writes, asks the
//! store for timestamps, and decodes the materialized cells that come back
//! from reads and scans.
//!
//! ```rust
//! use sommatori::cell::ColumnName;
//! use sommatori::config::{ClockKind, Config};
//! use sommatori::store::memory::MemStore;
//! use sommatori::table::CounterTable;
//!
//! let store = MemStore::with_increments(Config::new().with_clock(ClockKind::Logical)).unwrap();
//! let table = CounterTable::new(store);
//!
//! table.increment("row1", "i", "hits", 1).unwrap();
//! table.increment("row1", "i", "hits", 1).unwrap();
//! table.put("row1", "i", "misses", 10).unwrap();
//!
//! let row = table.get_row("row1").unwrap();
//! assert_eq!(row.get("i", "hits"), Some(2));
//! assert_eq!(row.get("i", "misses"), Some(10));
//! ```

use std::collections::VecDeque;

use tracing::warn;

use crate::cell::{CellVersion, ColumnName};
use crate::config::Config;
use crate::error::Result;
use crate::stats::{CounterValue, MetricKind, Observable};
use crate::store::{CellStore, ColumnSelection, RowCells, RowRange};
use crate::write::Mutation;

/// Rows fetched per scan round trip unless configured otherwise.
pub const DEFAULT_SCAN_BATCH_ROWS: usize = 128;

/// Materialized counters of one row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CounterRow {
    pub row: Vec<u8>,
    /// Columns in request order; `None` when a requested column has no cells.
    pub columns: Vec<(ColumnName, Option<i64>)>,
}

impl CounterRow {
    pub fn get(&self, family: impl AsRef<[u8]>, qualifier: impl AsRef<[u8]>) -> Option<i64> {
        let (family, qualifier) = (family.as_ref(), qualifier.as_ref());
        self.columns
            .iter()
            .find(|(name, _)| name.family == family && name.qualifier == qualifier)
            .and_then(|(_, value)| *value)
    }

    /// Present columns and their values.
    pub fn values(&self) -> impl Iterator<Item = (&ColumnName, i64)> {
        self.columns
            .iter()
            .filter_map(|(name, value)| value.map(|v| (name, v)))
    }

    /// Returns `true` if no column has a value.
    pub fn is_empty(&self) -> bool {
        self.values().next().is_none()
    }

    /// The present values as exportable gauges.
    pub fn counters(&self) -> Vec<MaterializedCounter> {
        self.values()
            .map(|(name, value)| MaterializedCounter {
                row: String::from_utf8_lossy(&self.row).into_owned(),
                column: name.clone(),
                value,
            })
            .collect()
    }
}

/// One materialized counter value, exportable through the observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedCounter {
    pub row: String,
    pub column: ColumnName,
    pub value: i64,
}

impl Observable for MaterializedCounter {
    fn name(&self) -> &str {
        "counter_value"
    }

    fn value(&self) -> CounterValue {
        CounterValue::Signed(self.value)
    }

    fn metric_kind(&self) -> MetricKind {
        MetricKind::Gauge
    }

    fn labels(&self) -> Vec<(&'static str, String)> {
        vec![
            ("row", self.row.clone()),
            ("family", String::from_utf8_lossy(&self.column.family).into_owned()),
            ("qualifier", String::from_utf8_lossy(&self.column.qualifier).into_owned()),
        ]
    }
}

/// Decodes the cells a store returned for one row.
///
/// With explicit columns the result follows the requested order and holds
/// `None` for columns without cells; otherwise it lists the columns present.
fn decode_row(cells: RowCells, selection: &ColumnSelection) -> CounterRow {
    let mut present: Vec<(ColumnName, Option<i64>)> = Vec::new();
    for cell in &cells.cells {
        let name = cell.column_name();
        if present.iter().any(|(n, _)| *n == name) {
            continue;
        }
        let value = match cell.as_i64() {
            Ok(v) => Some(v),
            Err(err) => {
                warn!(column = %cell.column(), error = %err, "unreadable counter value");
                None
            }
        };
        present.push((name, value));
    }

    let columns = match selection {
        ColumnSelection::Columns(names) => names
            .iter()
            .map(|name| {
                let value = present
                    .iter()
                    .find(|(n, _)| n == name)
                    .and_then(|(_, v)| *v);
                (name.clone(), value)
            })
            .collect(),
        _ => present,
    };
    CounterRow {
        row: cells.row,
        columns,
    }
}

/// Counter operations over a cell store.
#[derive(Debug)]
pub struct CounterTable<S> {
    store: S,
    batch_rows: usize,
}

impl<S: CellStore> CounterTable<S> {
    /// A table scanning in batches of [`DEFAULT_SCAN_BATCH_ROWS`].
    ///
    /// # Examples
    ///
    /// ```
    /// use sommatori::config::Config;
    /// use sommatori::store::memory::MemStore;
    /// use sommatori::table::CounterTable;
    ///
    /// let table = CounterTable::new(MemStore::with_increments(Config::new()).unwrap());
    /// assert_eq!(table.value("row", "i", "a").unwrap(), None);
    /// ```
    pub fn new(store: S) -> Self {
        Self {
            store,
            batch_rows: DEFAULT_SCAN_BATCH_ROWS,
        }
    }

    /// A table scanning in batches of `config.scan_batch_rows`.
    pub fn with_config(store: S, config: &Config) -> Self {
        Self::new(store).with_scan_batch_rows(config.scan_batch_rows)
    }

    /// Rows per scan round trip; at least 1.
    pub fn with_scan_batch_rows(mut self, rows: usize) -> Self {
        self.batch_rows = rows.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Writes one tagged mutation, stamping it if it carries no timestamp.
    pub fn apply(&self, mutation: Mutation) -> Result<CellVersion> {
        let assigned = match mutation.timestamp() {
            Some(ts) => ts,
            None => self.store.next_timestamp(),
        };
        self.store.append(mutation.into_cell(assigned)?)
    }

    /// Adds `delta` to a counter without reading it.
    ///
    /// # Examples
    ///
    /// ```
    /// use sommatori::config::Config;
    /// use sommatori::store::memory::MemStore;
    /// use sommatori::table::CounterTable;
    ///
    /// let table = CounterTable::new(MemStore::with_increments(Config::new()).unwrap());
    /// table.increment("row", "i", "a", 5).unwrap();
    /// table.increment("row", "i", "a", -2).unwrap();
    /// assert_eq!(table.value("row", "i", "a").unwrap(), Some(3));
    /// ```
    pub fn increment(
        &self,
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        delta: i64,
    ) -> Result<CellVersion> {
        self.apply(Mutation::increment(row, family, qualifier, delta))
    }

    /// Like [`increment`](Self::increment), at a caller-chosen timestamp.
    ///
    /// Increments sharing a timestamp all count.
    ///
    /// # Examples
    ///
    /// ```
    /// use sommatori::config::{ClockKind, Config};
    /// use sommatori::store::memory::MemStore;
    /// use sommatori::table::CounterTable;
    ///
    /// let store = MemStore::with_increments(Config::new().with_clock(ClockKind::Logical)).unwrap();
    /// let table = CounterTable::new(store);
    /// table.increment_at("row", "i", "a", 1, 7).unwrap();
    /// table.increment_at("row", "i", "a", 1, 7).unwrap();
    /// assert_eq!(table.value("row", "i", "a").unwrap(), Some(2));
    /// ```
    pub fn increment_at(
        &self,
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        delta: i64,
        timestamp: u64,
    ) -> Result<CellVersion> {
        self.apply(Mutation::increment(row, family, qualifier, delta).at(timestamp))
    }

    /// Overwrites a counter; older increments stop counting.
    pub fn put(
        &self,
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        value: i64,
    ) -> Result<CellVersion> {
        self.apply(Mutation::put(row, family, qualifier, value))
    }

    /// Like [`put`](Self::put), at a caller-chosen timestamp.
    ///
    /// Fails with [`Error::AggregationBoundaryViolation`] when `timestamp`
    /// falls inside a run of increments the store has already merged.
    ///
    /// [`Error::AggregationBoundaryViolation`]: crate::error::Error::AggregationBoundaryViolation
    ///
    /// # Examples
    ///
    /// ```
    /// use sommatori::config::{ClockKind, Config};
    /// use sommatori::store::memory::MemStore;
    /// use sommatori::table::CounterTable;
    ///
    /// let store = MemStore::with_increments(Config::new().with_clock(ClockKind::Logical)).unwrap();
    /// let table = CounterTable::new(store);
    /// table.increment_at("row", "i", "a", 1, 10).unwrap();
    /// table.put_at("row", "i", "a", 100, 5).unwrap();
    /// assert_eq!(table.value("row", "i", "a").unwrap(), Some(101));
    /// ```
    pub fn put_at(
        &self,
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        value: i64,
        timestamp: u64,
    ) -> Result<CellVersion> {
        self.apply(Mutation::put(row, family, qualifier, value).at(timestamp))
    }

    /// The listed columns of `row`; every column if `columns` is empty.
    pub fn get(&self, row: impl AsRef<[u8]>, columns: &[ColumnName]) -> Result<CounterRow> {
        let selection = if columns.is_empty() {
            ColumnSelection::All
        } else {
            ColumnSelection::Columns(columns.to_vec())
        };
        self.select(row, &selection)
    }

    /// Every column of `row`.
    pub fn get_row(&self, row: impl AsRef<[u8]>) -> Result<CounterRow> {
        self.select(row, &ColumnSelection::All)
    }

    pub fn select(&self, row: impl AsRef<[u8]>, selection: &ColumnSelection) -> Result<CounterRow> {
        let cells = self.store.get(row.as_ref(), selection)?;
        Ok(decode_row(cells, selection))
    }

    /// A single counter, `None` if it was never written.
    pub fn value(
        &self,
        row: impl AsRef<[u8]>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
    ) -> Result<Option<i64>> {
        let name = ColumnName::new(family, qualifier);
        let row = self.get(row, std::slice::from_ref(&name))?;
        Ok(row.columns.first().and_then(|(_, v)| *v))
    }

    /// Lazily iterates the rows of `range` that hold selected counters.
    pub fn scan(&self, range: RowRange, selection: ColumnSelection) -> CounterScanner<'_, S> {
        CounterScanner {
            table: self,
            range,
            selection,
            buffer: VecDeque::new(),
            fetched_up_to: None,
            last_returned: None,
            exhausted: false,
        }
    }
}

/// Iterator over a row range, fetching in batches.
///
/// Yields `Err` once if the store fails and then stops; the scan can be
/// resumed from [`resume_key`](Self::resume_key).
pub struct CounterScanner<'a, S> {
    table: &'a CounterTable<S>,
    range: RowRange,
    selection: ColumnSelection,
    buffer: VecDeque<CounterRow>,
    fetched_up_to: Option<Vec<u8>>,
    last_returned: Option<Vec<u8>>,
    exhausted: bool,
}

impl<S: CellStore> CounterScanner<'_, S> {
    /// The last row returned; resume with `range.resume_after(key)`.
    pub fn resume_key(&self) -> Option<&[u8]> {
        self.last_returned.as_deref()
    }

    fn fill(&mut self) -> Result<()> {
        let range = match &self.fetched_up_to {
            Some(row) => self.range.clone().resume_after(row.clone()),
            None => self.range.clone(),
        };
        let batch = self.table.batch_rows;
        let rows = self.table.store.scan(&range, &self.selection, batch)?;

        if rows.len() < batch {
            self.exhausted = true;
        }
        match rows.last() {
            Some(last) => self.fetched_up_to = Some(last.row.clone()),
            None => self.exhausted = true,
        }
        self.buffer.extend(
            rows.into_iter()
                .map(|cells| decode_row(cells, &self.selection))
                .filter(|row| !row.is_empty()),
        );
        Ok(())
    }
}

impl<S: CellStore> Iterator for CounterScanner<'_, S> {
    type Item = Result<CounterRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                self.last_returned = Some(row.row.clone());
                return Some(Ok(row));
            }
            if self.exhausted {
                return None;
            }
            if let Err(err) = self.fill() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
    }
}
