//! Benchmarks for write batching and tracked reads.
//!
//! Run with: cargo bench -p observable-core --bench batching

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use observable_core::{Runtime, Value};

// =============================================================================
// Writes collapsed into one flush
// =============================================================================

fn bench_batched_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("batching/writes");

    for observers in [1usize, 16, 128] {
        let rt = Runtime::new();
        let cell = rt.observable(0).unwrap();
        for _ in 0..observers {
            let source = cell.clone();
            rt.observe(move || {
                black_box(source.get());
            });
        }

        group.throughput(Throughput::Elements(observers as u64));
        group.bench_with_input(
            BenchmarkId::new("ten_writes_one_flush", observers),
            &(),
            |b, _| {
                b.iter(|| {
                    for _ in 0..10 {
                        cell.update(|n| n.as_i64().unwrap_or(0) + 1);
                    }
                    black_box(rt.flush().unwrap())
                })
            },
        );
    }

    group.finish();
}

// =============================================================================
// Tracked traversal of nested state
// =============================================================================

fn bench_tracked_traversal(c: &mut Criterion) {
    let mut group = c.benchmark_group("batching/traversal");

    for len in [16usize, 256] {
        let rt = Runtime::new();
        let rows = (0..len as i64).map(|i| Value::record([("id", i)]));
        let cell = rt.observable(Value::sequence(rows)).unwrap();

        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("sum_ids", len), &(), |b, _| {
            b.iter(|| {
                let source = cell.clone();
                let handle = rt.observe(move || {
                    let rows = source.get();
                    let total: i64 = rows
                        .reactive()
                        .and_then(|seq| seq.values())
                        .unwrap_or_default()
                        .iter()
                        .filter_map(|row| row.get("id").ok()?.as_i64())
                        .sum();
                    black_box(total);
                });
                handle.dispose();
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_batched_writes, bench_tracked_traversal);
criterion_main!(benches);
