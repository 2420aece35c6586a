//! Benchmarks for paged index writes and reads
//!
//! Covers:
//! - Streaming a one-to-one index to disk
//! - Random and sequential reads with a warm cache and after unload
//! - Address -> id reverse lookup
//! - Inbound index construction
//!
//! Run: cargo bench --bench paged_reads

use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use heapdex::cancel::Silent;
use heapdex::index::streamer::{write_int_index, write_long_index};
use heapdex::index::{InboundWriter, IntIndexReader, LongIndex};
use heapdex::{IndexConfig, IndexReader, One2LongIndex};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn bench_config() -> IndexConfig {
    IndexConfig {
        page_size_int: 4096,
        page_size_long: 2048,
        ..IndexConfig::default()
    }
}

fn class_ids(n: usize) -> Vec<i32> {
    (0..n).map(|i| ((i * 2654435761) % 5000) as i32).collect()
}

fn make_int_index(n: usize) -> (TempDir, IntIndexReader) {
    let dir = TempDir::new().unwrap();
    let reader = write_int_index(&dir.path().join("o2c.index"), &class_ids(n), &bench_config()).unwrap();
    (dir, reader)
}

/// Deterministic pseudo-random positions.
fn probes(n: usize, count: usize) -> Vec<usize> {
    let mut x = 0x9e37_79b9_7f4a_7c15u64;
    (0..count)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            (x % n as u64) as usize
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_write_int(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_int_index");

    for size in [10_000, 100_000, 1_000_000] {
        let values = class_ids(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter_batched(
                || TempDir::new().unwrap(),
                |dir| {
                    write_int_index(&dir.path().join("o2c.index"), black_box(&values), &bench_config())
                        .unwrap();
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_random_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_get");

    for size in [100_000, 1_000_000] {
        let (_dir, reader) = make_int_index(size);
        let positions = probes(size, 1000);
        group.bench_with_input(BenchmarkId::new("warm", size), &size, |b, _| {
            b.iter(|| {
                for &p in &positions {
                    black_box(reader.get(p).unwrap());
                }
            });
        });
        group.bench_with_input(BenchmarkId::new("cold", size), &size, |b, _| {
            b.iter(|| {
                reader.unload();
                for &p in &positions {
                    black_box(reader.get(p).unwrap());
                }
            });
        });
    }

    group.finish();
}

fn bench_sequential_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_scan");

    for size in [100_000, 1_000_000] {
        let (_dir, reader) = make_int_index(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let mut sum = 0i64;
                for v in reader.iter() {
                    sum += v.unwrap() as i64;
                }
                black_box(sum)
            });
        });
    }

    group.finish();
}

fn bench_reverse(c: &mut Criterion) {
    let mut group = c.benchmark_group("reverse");

    for size in [100_000, 1_000_000] {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idx.index");
        let addresses: Vec<i64> = (0..size as i64).map(|i| 0x7f00_0000_0000 + i * 24).collect();
        write_long_index(&path, &addresses, &bench_config()).unwrap();
        let index = LongIndex::open(&path, &bench_config()).unwrap();
        let targets: Vec<i64> = probes(size, 1000).into_iter().map(|p| addresses[p]).collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                for &a in &targets {
                    black_box(index.reverse(a).unwrap());
                }
            });
        });
    }

    group.finish();
}

fn bench_inbound_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("inbound_build");
    group.sample_size(10);

    for size in [10_000, 100_000] {
        let edges: Vec<(usize, usize)> = probes(size, size * 4)
            .into_iter()
            .zip(probes(size, size * 4).into_iter().rev())
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || TempDir::new().unwrap(),
                |dir| {
                    let config = IndexConfig {
                        inbound_bucket_ids: size / 8,
                        ..bench_config()
                    };
                    let path = dir.path().join("inbound.index");
                    let mut writer = InboundWriter::new(size, &path, &config).unwrap();
                    for &(object, referrer) in &edges {
                        writer.log(object, referrer, object % 97 == 0).unwrap();
                    }
                    let mut keys = HashMap::new();
                    let reader = writer.flush(&Silent, &mut keys).unwrap();
                    black_box(reader.size());
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_write_int,
    bench_random_get,
    bench_sequential_scan,
    bench_reverse,
    bench_inbound_build,
);
criterion_main!(benches);
