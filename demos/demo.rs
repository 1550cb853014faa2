//! Demo application: concurrent increments, background compaction, and
//! the resulting counters and statistics in several formats.
//!
//! Run with:
//! ```bash
//! RUST_LOG=sommatori=debug cargo run --example demo --features demo -- --help
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use sommatori::config::{ClockKind, Config};
use sommatori::extension::IncrementHandler;
use sommatori::observers::json::JsonObserver;
use sommatori::observers::prometheus::PrometheusObserver;
use sommatori::observers::table::{CompactSeparator, TableObserver, TableStyle};
use sommatori::stats::Observable;
use sommatori::store::memory::{BackgroundCompactor, MemStore};
use sommatori::store::{ColumnSelection, RowRange};
use sommatori::table::{CounterRow, CounterTable, MaterializedCounter};
use tracing_subscriber::EnvFilter;

/// Output format.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Pretty table of rows and statistics
    Table,
    /// Compact table of statistics
    Compact,
    /// JSON format
    Json,
    /// Prometheus exposition format
    Prometheus,
}

/// Table style selection.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum StyleChoice {
    Ascii,
    #[default]
    Rounded,
    Sharp,
    Modern,
    Markdown,
    Blank,
}

impl From<StyleChoice> for TableStyle {
    fn from(choice: StyleChoice) -> Self {
        match choice {
            StyleChoice::Ascii => TableStyle::Ascii,
            StyleChoice::Rounded => TableStyle::Rounded,
            StyleChoice::Sharp => TableStyle::Sharp,
            StyleChoice::Modern => TableStyle::Modern,
            StyleChoice::Markdown => TableStyle::Markdown,
            StyleChoice::Blank => TableStyle::Blank,
        }
    }
}

/// Demo application for sommatori - delta counters over an LSM-style store.
///
/// Spawns writer threads that increment counters as delta cells while a
/// background compactor folds them, then prints the counters and the
/// aggregation and store statistics.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Table style (for table/compact formats)
    #[arg(short, long, value_enum, default_value = "rounded")]
    style: StyleChoice,

    /// Number of columns (for compact format)
    #[arg(short, long, default_value = "3")]
    columns: usize,

    /// Pretty print JSON output
    #[arg(long)]
    pretty: bool,

    /// Include timestamp in JSON output
    #[arg(long)]
    timestamp: bool,

    /// Prometheus metric namespace (prefix)
    #[arg(long, default_value = "sommatori")]
    namespace: String,

    /// Prometheus instance label
    #[arg(long)]
    instance: Option<String>,

    /// Writer threads
    #[arg(short, long, default_value = "4")]
    threads: usize,

    /// Increments per thread
    #[arg(short, long, default_value = "10000")]
    increments: usize,

    /// Distinct rows written to
    #[arg(short, long, default_value = "8")]
    rows: usize,

    /// Memtable size that triggers a flush
    #[arg(long, default_value = "1024")]
    flush_cells: usize,

    /// Delta chain length that forces a compaction (0 disables)
    #[arg(long, default_value = "256")]
    max_delta_chain: usize,

    /// Background compaction interval in milliseconds
    #[arg(long, default_value = "50")]
    compact_every: u64,

    /// Use a logical clock instead of wall time
    #[arg(long)]
    logical_clock: bool,
}

fn run_writers(table: &Arc<CounterTable<Arc<MemStore>>>, args: &Args) {
    let mut handles = vec![];

    for t in 0..args.threads {
        let table = Arc::clone(table);
        let (increments, rows) = (args.increments, args.rows.max(1));

        let handle = thread::spawn(move || {
            for j in 0..increments {
                let row = format!("row{:03}", (t + j) % rows);
                if let Err(err) = table.increment(row.as_str(), "hits", "total", 1) {
                    tracing::warn!(error = %err, "increment failed");
                    continue;
                }
                // every tenth hit is also an error
                if j % 10 == 0 {
                    let _ = table.increment(row.as_str(), "hits", "errors", 1);
                }
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        if handle.join().is_err() {
            tracing::error!("writer thread panicked");
        }
    }
}

fn render_output(args: &Args, stats: Vec<&dyn Observable>, rows: &[CounterRow]) -> String {
    match args.format {
        OutputFormat::Table => {
            let observer = TableObserver::new().with_style(args.style.into());
            format!(
                "{}\n\n{}",
                observer.clone().with_title("Counters").render_rows(rows),
                observer.with_title("Statistics").render(stats.into_iter())
            )
        }

        OutputFormat::Compact => TableObserver::new()
            .compact(true)
            .columns(args.columns)
            .separator(CompactSeparator::Equals)
            .with_style(args.style.into())
            .render(stats.into_iter()),

        OutputFormat::Json => {
            let observer = JsonObserver::new()
                .pretty(args.pretty)
                .wrap_in_snapshot(args.timestamp)
                .include_timestamp(args.timestamp);
            let rendered = observer
                .rows_to_json(rows)
                .and_then(|rows| Ok((rows, observer.to_json(stats.into_iter())?)));
            match rendered {
                Ok((rows, stats)) => format!("{rows}\n{stats}"),
                Err(e) => format!("Error: {}", e),
            }
        }

        OutputFormat::Prometheus => {
            let mut observer = PrometheusObserver::new()
                .with_namespace(&args.namespace)
                .with_help("counter_value", "Materialized counter value")
                .with_help("reads_folded", "Columns materialized by reads")
                .with_help("deltas_folded", "Delta cells summed by reads")
                .with_help("appends", "Cells appended to the store");

            if let Some(ref instance) = args.instance {
                observer = observer.with_const_label("instance", instance);
            }

            let materialized: Vec<MaterializedCounter> =
                rows.iter().flat_map(CounterRow::counters).collect();
            observer
                .render(
                    stats
                        .into_iter()
                        .chain(materialized.iter().map(|c| c as &dyn Observable)),
                )
                .unwrap_or_else(|e| format!("Error: {}", e))
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::new()
        .with_memtable_flush_cells(args.flush_cells)
        .with_max_delta_chain(args.max_delta_chain)
        .with_clock(if args.logical_clock {
            ClockKind::Logical
        } else {
            ClockKind::Wall
        });
    let handler = IncrementHandler::with_config(&config);
    let aggregation = Arc::clone(handler.stats());
    let store = Arc::new(MemStore::new(config, Arc::new(handler))?);
    let table = Arc::new(CounterTable::with_config(Arc::clone(&store), store.config()));

    let compactor =
        BackgroundCompactor::spawn(&store, Duration::from_millis(args.compact_every))?;

    eprintln!(
        "Running {} threads × {} increments over {} rows...",
        args.threads, args.increments, args.rows
    );
    run_writers(&table, &args);
    drop(compactor);

    store.flush()?;
    eprintln!(
        "Done: {} segments, {} cells stored.\n",
        store.segment_count(),
        store.cell_count()
    );

    let rows = table
        .scan(RowRange::all(), ColumnSelection::All)
        .collect::<sommatori::Result<Vec<_>>>()?;

    let stats: Vec<&dyn Observable> = aggregation
        .counters()
        .into_iter()
        .chain(store.stats().counters())
        .map(|c| c as &dyn Observable)
        .collect();

    println!("{}", render_output(&args, stats, &rows));
    Ok(())
}
