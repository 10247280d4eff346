//! Benchmark for the core allocate/free/iterate path.
//!
//! Measures:
//! - Bump allocation throughput
//! - Single compacting `free()` (tail relocation)
//! - Full txn iteration
//! - Batch remove (`remove_reserve`/`remove_add`/`remove_force`)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tuple_chunks::{CompactingChunks, TxnIter};

const TUPLE_SIZE: usize = 16;

fn filled(n: usize) -> CompactingChunks {
    let mut chunks = CompactingChunks::new(TUPLE_SIZE);
    for _ in 0..n {
        chunks.allocate();
    }
    chunks
}

fn bench_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate");

    for size in [1_000, 10_000, 100_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut chunks = CompactingChunks::new(TUPLE_SIZE);
                for _ in 0..size {
                    black_box(chunks.allocate());
                }
            });
        });
    }

    group.finish();
}

fn bench_free_tail_relocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("free");

    for size in [1_000, 10_000, 100_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || filled(size),
                |mut chunks| {
                    let addr = TxnIter::all(&chunks).next().unwrap();
                    black_box(chunks.free(addr).unwrap());
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_txn_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("txn_iterate");

    for size in [1_000, 10_000, 100_000] {
        let chunks = filled(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &chunks, |b, chunks| {
            b.iter(|| {
                for addr in TxnIter::all(chunks) {
                    black_box(addr);
                }
            });
        });
    }

    group.finish();
}

fn bench_batch_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_remove");
    let batch = 200;

    group.throughput(Throughput::Elements(batch as u64));
    group.bench_function("remove_200_of_10000", |b| {
        b.iter_batched(
            || {
                let chunks = filled(10_000);
                let targets: Vec<*const u8> = TxnIter::all(&chunks).take(batch).collect();
                (chunks, targets)
            },
            |(mut chunks, targets)| {
                chunks.remove_reserve(targets.len()).unwrap();
                for addr in &targets {
                    chunks.remove_add(*addr).unwrap();
                }
                let removed = chunks
                    .remove_force(|pairs| {
                        for &(dst, src) in pairs {
                            unsafe {
                                std::ptr::copy_nonoverlapping(src, dst.cast_mut(), TUPLE_SIZE);
                            }
                        }
                    })
                    .unwrap();
                black_box(removed);
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_allocate,
    bench_free_tail_relocation,
    bench_txn_iteration,
    bench_batch_remove,
);

criterion_main!(benches);
