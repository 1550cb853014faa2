//! OpenTelemetry observer demo.
//!
//! Increments counters through a [`CounterTable`], then exports the
//! aggregation and store statistics via OpenTelemetry's stdout exporter.
//!
//! # Running the example
//!
//! ```bash
//! cargo run --example opentelemetry_demo --features opentelemetry
//! ```

use std::sync::Arc;
use std::time::Duration;

use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::runtime;
use sommatori::config::Config;
use sommatori::extension::IncrementHandler;
use sommatori::observers::opentelemetry::OtelObserver;
use sommatori::stats::{Observable, StatCounter};
use sommatori::store::memory::MemStore;
use sommatori::table::CounterTable;

static DEMO_ROUNDS: StatCounter = StatCounter::new().with_name("demo_rounds");

fn setup_opentelemetry() -> SdkMeterProvider {
    let exporter = opentelemetry_stdout::MetricExporter::default();

    // long interval, collection is driven by force_flush
    let reader = PeriodicReader::builder(exporter, runtime::Tokio)
        .with_interval(Duration::from_secs(60))
        .build();

    let provider = SdkMeterProvider::builder().with_reader(reader).build();

    opentelemetry::global::set_meter_provider(provider.clone());
    provider
}

fn simulate_traffic(table: &CounterTable<Arc<MemStore>>) -> sommatori::Result<()> {
    for i in 0..100 {
        let row = format!("user{}", i % 10);
        table.increment(row.as_str(), "clicks", "total", 1)?;
        if i % 4 == 0 {
            table.increment(row.as_str(), "clicks", "ads", 1)?;
        }
        if i % 25 == 0 {
            table.value(row.as_str(), "clicks", "total")?;
        }
    }
    table.store().flush()?;
    table.store().compact()?;
    DEMO_ROUNDS.incr();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== OpenTelemetry Stdout Demo ===\n");

    let provider = setup_opentelemetry();

    let config = Config::new().with_memtable_flush_cells(64);
    let handler = IncrementHandler::with_config(&config);
    let stats = Arc::clone(handler.stats());
    let store = Arc::new(MemStore::new(config, Arc::new(handler))?);
    let table = CounterTable::new(Arc::clone(&store));

    let observer = OtelObserver::new("sommatori_demo").with_description_prefix("sommatori");
    let counters: &[&'static (dyn Observable + Send + Sync)] = &[&DEMO_ROUNDS];
    observer.register(counters)?;
    observer.register_aggregation(stats)?;
    observer.register_store(Arc::clone(&store))?;
    println!("Registered metrics with OpenTelemetry\n");

    println!("Simulating traffic...\n");
    simulate_traffic(&table)?;

    println!("Flushing metrics to stdout (JSON format):\n");
    provider.force_flush()?;

    println!("\nSimulating more traffic...\n");
    simulate_traffic(&table)?;

    println!("Flushing again:\n");
    provider.force_flush()?;

    provider.shutdown()?;
    println!("\nDone!");
    Ok(())
}
