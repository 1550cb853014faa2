use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use parking_lot::Mutex;
use sommatori::config::{ClockKind, Config};
use sommatori::store::memory::MemStore;
use sommatori::table::CounterTable;

const NUM_THREADS: usize = 8;
const ITERATIONS_PER_THREAD: usize = 10_000;
const ROWS: usize = 16;
const CHAIN_LENGTH: usize = 1_000;

fn config() -> Config {
    Config::new()
        .with_clock(ClockKind::Logical)
        .with_max_delta_chain(0)
}

fn table() -> Arc<CounterTable<Arc<MemStore>>> {
    let store = Arc::new(MemStore::with_increments(config()).unwrap());
    Arc::new(CounterTable::new(store))
}

fn row_key(i: usize) -> String {
    format!("row{}", i % ROWS)
}

fn bench_increment(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter_increment");
    group.sample_size(10);

    group.bench_function(
        BenchmarkId::new(
            "delta cells",
            format!("{}threads x {}iter", NUM_THREADS, ITERATIONS_PER_THREAD),
        ),
        |b| {
            b.iter(|| {
                let table = table();
                let mut handles = vec![];

                for t in 0..NUM_THREADS {
                    let table = Arc::clone(&table);
                    let handle = thread::spawn(move || {
                        for i in 0..ITERATIONS_PER_THREAD {
                            table.increment(row_key(t + i), "i", "a", 1).unwrap();
                        }
                    });
                    handles.push(handle);
                }

                for handle in handles {
                    handle.join().unwrap();
                }

                black_box(table.value("row0", "i", "a").unwrap())
            })
        },
    );

    group.bench_function(
        BenchmarkId::new(
            "locked read-modify-write",
            format!("{}threads x {}iter", NUM_THREADS, ITERATIONS_PER_THREAD),
        ),
        |b| {
            b.iter(|| {
                let table = table();
                let lock = Arc::new(Mutex::new(()));
                let mut handles = vec![];

                for t in 0..NUM_THREADS {
                    let table = Arc::clone(&table);
                    let lock = Arc::clone(&lock);
                    let handle = thread::spawn(move || {
                        for i in 0..ITERATIONS_PER_THREAD {
                            let row = row_key(t + i);
                            let _guard = lock.lock();
                            let current = table.value(&row, "i", "a").unwrap().unwrap_or(0);
                            table.put(row, "i", "a", current + 1).unwrap();
                        }
                    });
                    handles.push(handle);
                }

                for handle in handles {
                    handle.join().unwrap();
                }

                black_box(table.value("row0", "i", "a").unwrap())
            })
        },
    );

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter_read");

    let chained = table();
    let compacted = table();
    for _ in 0..CHAIN_LENGTH {
        chained.increment("row", "i", "a", 1).unwrap();
        compacted.increment("row", "i", "a", 1).unwrap();
    }
    compacted.store().flush().unwrap();
    compacted.store().compact().unwrap();

    group.bench_function(
        BenchmarkId::new("delta chain", format!("{} cells", CHAIN_LENGTH)),
        |b| b.iter(|| black_box(chained.value("row", "i", "a").unwrap())),
    );

    group.bench_function(BenchmarkId::new("compacted", "1 cell"), |b| {
        b.iter(|| black_box(compacted.value("row", "i", "a").unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_increment, bench_read);
criterion_main!(benches);
