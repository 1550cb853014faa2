//! Pretty-printing statistics and counter rows with `tabled`.
//!
//! Requires the `table` feature.
//!
//! ```rust,ignore
//! use sommatori::observers::table::{TableObserver, TableStyle};
//!
//! let observer = TableObserver::new().with_style(TableStyle::Rounded);
//! println!("{}", observer.render(stats.counters().into_iter().map(|c| c as _)));
//! // ╭──────────────────┬────────┬───────╮
//! // │ Name             │ Labels │ Value │
//! // ├──────────────────┼────────┼───────┤
//! // │ reads_folded     │        │ 1000  │
//! // │ deltas_folded    │        │ 5230  │
//! // ╰──────────────────┴────────┴───────╯
//!
//! println!("{}", observer.render_rows(&rows));
//! // ╭──────┬─────┬─────╮
//! // │ Row  │ i:a │ i:b │
//! // ├──────┼─────┼─────┤
//! // │ row1 │ 7   │     │
//! // │ row2 │ 3   │ 10  │
//! // ╰──────┴─────┴─────╯
//! ```

use std::collections::BTreeSet;

use tabled::{builder::Builder, settings::Style, Table, Tabled};

use crate::cell::ColumnName;
use crate::stats::Observable;
use crate::table::CounterRow;

/// Border styles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TableStyle {
    Ascii,
    #[default]
    Rounded,
    Sharp,
    Modern,
    Markdown,
    Blank,
}

/// Separator between name and value in compact mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompactSeparator {
    /// `name: value`
    #[default]
    Colon,
    /// `name = value`
    Equals,
    /// `name → value`
    Arrow,
}

impl CompactSeparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompactSeparator::Colon => ": ",
            CompactSeparator::Equals => " = ",
            CompactSeparator::Arrow => " → ",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableConfig {
    pub style: TableStyle,
    pub show_header: bool,
    pub title: Option<String>,
    /// Render observables as a grid of `name: value` cells.
    pub compact: bool,
    /// Cells per line in compact mode.
    pub columns: usize,
    pub separator: CompactSeparator,
    /// Text for columns a row does not have.
    pub missing: String,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            style: TableStyle::default(),
            show_header: true,
            title: None,
            compact: false,
            columns: 1,
            separator: CompactSeparator::default(),
            missing: String::new(),
        }
    }
}

#[derive(Tabled)]
struct MetricLine {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Labels")]
    labels: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn display_name(counter: &dyn Observable) -> String {
    if counter.name().is_empty() {
        "(unnamed)".to_string()
    } else {
        counter.name().to_string()
    }
}

fn display_labels(counter: &dyn Observable) -> String {
    counter
        .labels()
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Renders observables and counter rows as text tables.
#[derive(Debug, Clone, Default)]
pub struct TableObserver {
    config: TableConfig,
}

impl TableObserver {
    /// A rounded table with a header row.
    ///
    /// # Examples
    ///
    /// ```
    /// use sommatori::observers::table::TableObserver;
    /// use sommatori::stats::{Observable, StatCounter};
    ///
    /// let appends = StatCounter::new().with_name("appends");
    /// appends.add(3);
    /// let output = TableObserver::new().render(std::iter::once(&appends as &dyn Observable));
    /// assert!(output.contains("appends"));
    /// assert!(output.contains('3'));
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TableConfig) -> Self {
        Self { config }
    }

    /// Sets the border style.
    ///
    /// # Examples
    ///
    /// ```
    /// use sommatori::observers::table::{TableObserver, TableStyle};
    /// use sommatori::stats::{Observable, StatCounter};
    ///
    /// let flushes = StatCounter::new().with_name("flushes");
    /// let output = TableObserver::new()
    ///     .with_style(TableStyle::Markdown)
    ///     .render(std::iter::once(&flushes as &dyn Observable));
    /// assert!(output.lines().all(|line| line.starts_with('|')));
    /// ```
    pub fn with_style(mut self, style: TableStyle) -> Self {
        self.config.style = style;
        self
    }

    /// Shows or hides the `Name | Labels | Value` header row.
    pub fn with_header(mut self, show: bool) -> Self {
        self.config.show_header = show;
        self
    }

    /// A line printed above the table.
    ///
    /// # Examples
    ///
    /// ```
    /// use sommatori::observers::table::TableObserver;
    /// use sommatori::stats::{Observable, StatCounter};
    ///
    /// let reads = StatCounter::new().with_name("reads");
    /// let output = TableObserver::new()
    ///     .with_title("Read path")
    ///     .render(std::iter::once(&reads as &dyn Observable));
    /// assert!(output.starts_with("Read path\n"));
    /// ```
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.config.title = Some(title.into());
        self
    }

    /// Renders observables as a grid of `name: value` cells.
    ///
    /// # Examples
    ///
    /// ```
    /// use sommatori::observers::table::{CompactSeparator, TableObserver};
    /// use sommatori::stats::{Observable, StatCounter};
    ///
    /// let hits = StatCounter::new().with_name("hits");
    /// hits.add(2);
    /// let output = TableObserver::new()
    ///     .compact(true)
    ///     .separator(CompactSeparator::Equals)
    ///     .render(std::iter::once(&hits as &dyn Observable));
    /// assert!(output.contains("hits = 2"));
    /// ```
    pub fn compact(mut self, enabled: bool) -> Self {
        self.config.compact = enabled;
        self
    }

    /// Cells per line in compact mode; at least 1.
    pub fn columns(mut self, count: usize) -> Self {
        self.config.columns = count.max(1);
        self
    }

    /// Separator between name and value in compact mode.
    pub fn separator(mut self, sep: CompactSeparator) -> Self {
        self.config.separator = sep;
        self
    }

    /// Placeholder for counters a row does not have; empty by default.
    pub fn missing(mut self, placeholder: impl Into<String>) -> Self {
        self.config.missing = placeholder.into();
        self
    }

    fn apply_style(&self, table: &mut Table) {
        match self.config.style {
            TableStyle::Ascii => table.with(Style::ascii()),
            TableStyle::Rounded => table.with(Style::rounded()),
            TableStyle::Sharp => table.with(Style::sharp()),
            TableStyle::Modern => table.with(Style::modern()),
            TableStyle::Markdown => table.with(Style::markdown()),
            TableStyle::Blank => table.with(Style::blank()),
        };
    }

    fn finish(&self, mut table: Table, has_header: bool) -> String {
        self.apply_style(&mut table);
        if has_header && !self.config.show_header {
            table.with(tabled::settings::Remove::row(
                tabled::settings::object::Rows::first(),
            ));
        }
        match &self.config.title {
            Some(title) => format!("{title}\n{table}"),
            None => table.to_string(),
        }
    }

    /// Renders observables, one per line or as a compact grid.
    pub fn render<'a>(&self, counters: impl Iterator<Item = &'a dyn Observable>) -> String {
        if self.config.compact {
            return self.render_compact(counters);
        }
        let lines: Vec<MetricLine> = counters
            .map(|c| MetricLine {
                name: display_name(c),
                labels: display_labels(c),
                value: c.value().to_string(),
            })
            .collect();
        self.finish(Table::new(&lines), true)
    }

    fn render_compact<'a>(&self, counters: impl Iterator<Item = &'a dyn Observable>) -> String {
        let cells: Vec<String> = counters
            .map(|c| {
                let labels = display_labels(c);
                let name = if labels.is_empty() {
                    display_name(c)
                } else {
                    format!("{}{{{}}}", display_name(c), labels)
                };
                format!("{}{}{}", name, self.config.separator.as_str(), c.value())
            })
            .collect();
        if cells.is_empty() {
            return String::new();
        }

        let cols = self.config.columns;
        let mut builder = Builder::default();
        for chunk in cells.chunks(cols) {
            let mut line = chunk.to_vec();
            line.resize(cols, String::new());
            builder.push_record(line);
        }
        self.finish(builder.build(), false)
    }

    /// Renders rows as a grid: one line per row, one column per counter.
    pub fn render_rows(&self, rows: &[CounterRow]) -> String {
        let names: BTreeSet<&ColumnName> = rows
            .iter()
            .flat_map(|r| r.columns.iter().map(|(name, _)| name))
            .collect();

        let mut builder = Builder::default();
        builder.push_record(
            std::iter::once("Row".to_string()).chain(names.iter().map(|n| n.to_string())),
        );
        for row in rows {
            let mut line = vec![String::from_utf8_lossy(&row.row).into_owned()];
            for name in &names {
                let value = row
                    .columns
                    .iter()
                    .find(|(n, _)| n == *name)
                    .and_then(|(_, v)| *v);
                line.push(match value {
                    Some(v) => v.to_string(),
                    None => self.config.missing.clone(),
                });
            }
            builder.push_record(line);
        }
        self.finish(builder.build(), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{AggregationStats, StatCounter};
    use crate::table::MaterializedCounter;

    #[test]
    fn test_render_stats() {
        let stats = AggregationStats::new();
        stats.reads_folded.add(1000);
        let output = TableObserver::new()
            .render(stats.counters().into_iter().map(|c| c as &dyn Observable));
        assert!(output.contains("Name"));
        assert!(output.contains("reads_folded"));
        assert!(output.contains("1000"));
        assert!(output.contains("boundary_violations"));
    }

    #[test]
    fn test_render_labels() {
        let counter = MaterializedCounter {
            row: "row1".into(),
            column: ColumnName::new("i", "a"),
            value: -7,
        };
        let output = TableObserver::new().render(std::iter::once(&counter as &dyn Observable));
        assert!(output.contains("row=row1,family=i,qualifier=a"));
        assert!(output.contains("-7"));
    }

    #[test]
    fn test_without_header_and_with_title() {
        let counter = StatCounter::new().with_name("appends");
        let output = TableObserver::new()
            .with_header(false)
            .with_title("Store")
            .with_style(TableStyle::Ascii)
            .render(std::iter::once(&counter as &dyn Observable));
        assert!(output.starts_with("Store\n"));
        assert!(!output.contains("Name"));
        assert!(output.contains("appends"));
    }

    #[test]
    fn test_compact_grid() {
        let a = StatCounter::new().with_name("a");
        let b = StatCounter::new().with_name("b");
        let c = StatCounter::new().with_name("c");
        a.add(1);
        let counters: Vec<&dyn Observable> = vec![&a, &b, &c];
        let output = TableObserver::new()
            .compact(true)
            .columns(2)
            .separator(CompactSeparator::Equals)
            .render(counters.into_iter());
        assert!(output.contains("a = 1"));
        assert!(output.contains("c = 0"));
        assert_eq!(TableObserver::new().compact(true).render(std::iter::empty()), "");
    }

    #[test]
    fn test_render_rows() {
        let rows = vec![
            CounterRow {
                row: b"row1".to_vec(),
                columns: vec![(ColumnName::new("i", "a"), Some(7))],
            },
            CounterRow {
                row: b"row2".to_vec(),
                columns: vec![
                    (ColumnName::new("i", "a"), Some(3)),
                    (ColumnName::new("i", "b"), Some(10)),
                ],
            },
        ];
        let output = TableObserver::new()
            .with_style(TableStyle::Markdown)
            .missing("-")
            .render_rows(&rows);
        assert!(output.contains("i:b"));
        let row1 = output.lines().find(|l| l.contains("row1")).unwrap();
        assert!(row1.contains('7'));
        assert!(row1.contains('-'));
    }
}
