use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use ferroid_segment::{
    Allocator, AllocatorConfig, Error, IdStatus, MemoryStore, RetryPolicy, SegmentStore,
};
use std::{
    sync::{Arc, Barrier},
    thread::scope,
    time::Instant,
};

// Number of IDs generated per benchmark iteration (split across threads for
// multi-threaded).
const TOTAL_IDS: usize = 4096;

const TAG: &str = "bench";

fn allocator(store: impl SegmentStore + 'static, step: u64) -> Allocator {
    let allocator = Allocator::builder(store)
        .config(AllocatorConfig {
            default_step: step,
            ..AllocatorConfig::default()
        })
        .background_refresh(false)
        .build()
        .unwrap();
    // Bootstrap the tag so every measured call is served from memory.
    allocator
        .next_id_blocking(TAG, RetryPolicy::default())
        .unwrap();
    allocator
}

/// Issues one ID, spinning through the rare drained-segment window.
#[inline]
fn next_id(allocator: &Allocator) -> u64 {
    loop {
        match allocator.generate_id(TAG) {
            Ok(IdStatus::Ready { id }) => return id,
            Ok(IdStatus::Pending { .. }) | Err(Error::SegmentsExhausted { .. }) => {
                core::hint::spin_loop();
            }
            Err(e) => panic!("allocation failed: {e}"),
        }
    }
}

/// Benchmarks a single caller. `step` controls how often refills happen.
fn bench_sequential(c: &mut Criterion, group_name: &str, allocator: &Allocator) {
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                for _ in 0..TOTAL_IDS {
                    black_box(next_id(allocator));
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// Benchmarks one allocator shared across threads.
fn bench_contended(c: &mut Criterion, group_name: &str, allocator: &Allocator) {
    let mut group = c.benchmark_group(group_name);

    let mut thread_counts = vec![1, 2, 4, 8, 16];
    let cpus = num_cpus::get();
    if !thread_counts.contains(&cpus) {
        thread_counts.push(cpus);
    }

    for thread_count in thread_counts {
        let ids_per_thread = TOTAL_IDS / thread_count;

        group.throughput(Throughput::Elements((ids_per_thread * thread_count) as u64));
        group.bench_function(
            format!("elems/{TOTAL_IDS}/threads/{thread_count}"),
            |b| {
                b.iter_custom(|iters| {
                    let start = Instant::now();

                    for _ in 0..iters {
                        let barrier = Arc::new(Barrier::new(thread_count + 1));
                        scope(|s| {
                            for _ in 0..thread_count {
                                let barrier = Arc::clone(&barrier);
                                s.spawn(move || {
                                    barrier.wait();
                                    for _ in 0..ids_per_thread {
                                        black_box(next_id(allocator));
                                    }
                                });
                            }
                            barrier.wait();
                        });
                    }

                    start.elapsed()
                });
            },
        );
    }

    group.finish();
}

// --- Memory store ---

fn benchmark_memory_sequential_large_step(c: &mut Criterion) {
    let allocator = allocator(MemoryStore::new(), 1_000_000);
    bench_sequential(c, "memory/sequential/step_1000000", &allocator);
}

fn benchmark_memory_sequential_small_step(c: &mut Criterion) {
    // Refills every 1000 IDs.
    let allocator = allocator(MemoryStore::new(), 1000);
    bench_sequential(c, "memory/sequential/step_1000", &allocator);
}

fn benchmark_memory_contended(c: &mut Criterion) {
    let allocator = allocator(MemoryStore::new(), 1_000_000);
    bench_contended(c, "memory/contended/step_1000000", &allocator);
}

fn benchmark_memory_contended_small_step(c: &mut Criterion) {
    let allocator = allocator(MemoryStore::new(), 1000);
    bench_contended(c, "memory/contended/step_1000", &allocator);
}

// --- SQLite store ---

#[cfg(feature = "sqlite")]
fn benchmark_sqlite_sequential_small_step(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = ferroid_segment::SqliteStore::open(dir.path().join("bench.db")).unwrap();
    let allocator = allocator(store, 1000);
    bench_sequential(c, "sqlite/sequential/step_1000", &allocator);
}

#[cfg(feature = "sqlite")]
fn benchmark_sqlite_contended_small_step(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = ferroid_segment::SqliteStore::open(dir.path().join("bench.db")).unwrap();
    let allocator = allocator(store, 1000);
    bench_contended(c, "sqlite/contended/step_1000", &allocator);
}

#[cfg(not(feature = "sqlite"))]
fn benchmark_sqlite_sequential_small_step(_c: &mut Criterion) {}

#[cfg(not(feature = "sqlite"))]
fn benchmark_sqlite_contended_small_step(_c: &mut Criterion) {}

criterion_group!(
    benches,
    benchmark_memory_sequential_large_step,
    benchmark_memory_sequential_small_step,
    benchmark_memory_contended,
    benchmark_memory_contended_small_step,
    benchmark_sqlite_sequential_small_step,
    benchmark_sqlite_contended_small_step,
);
criterion_main!(benches);
