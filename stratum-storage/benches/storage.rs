//! Benchmarks for the erasure object layer
//!
//! Run with: cargo bench --package stratum-storage --bench storage

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::BTreeMap;
use std::sync::Arc;
use stratum_core::{EngineConfig, StorageUnit};
use stratum_storage::{ErasureObjects, MemoryUnit, SledMetadataStore, StorageConfig};
use tempfile::TempDir;

/// Generate test data of specified size
fn generate_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

fn engine() -> EngineConfig {
    EngineConfig {
        data_blocks: 4,
        parity_blocks: 2,
        block_size: 1024 * 1024,
        ..Default::default()
    }
}

fn memory_objects() -> (Vec<Arc<MemoryUnit>>, ErasureObjects) {
    let config = engine();
    let units: Vec<Arc<MemoryUnit>> = (0..config.total_blocks())
        .map(|i| Arc::new(MemoryUnit::new(format!("mem-{}", i))))
        .collect();
    let objects = ErasureObjects::new(
        units.iter().map(|u| u.clone() as Arc<dyn StorageUnit>).collect(),
        SledMetadataStore::open_temporary().unwrap(),
        config,
    )
    .unwrap();
    (units, objects)
}

fn format_size(size: usize) -> String {
    if size >= 1024 * 1024 {
        format!("{}MB", size / (1024 * 1024))
    } else {
        format!("{}KB", size / 1024)
    }
}

/// Benchmark whole-object puts on memory units
fn bench_put(c: &mut Criterion) {
    let (_units, objects) = memory_objects();
    let mut group = c.benchmark_group("memory_put_object");

    for size in [64 * 1024, 1024 * 1024, 4 * 1024 * 1024] {
        let data = generate_data(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("put", format_size(size)), &data, |b, data| {
            b.iter(|| {
                objects
                    .put_object("bench", "object", &mut black_box(&data[..]), BTreeMap::new())
                    .unwrap()
            })
        });
    }

    group.finish();
}

/// Benchmark full reads, healthy and degraded
fn bench_get(c: &mut Criterion) {
    let (units, objects) = memory_objects();
    let size = 4 * 1024 * 1024;
    let data = generate_data(size);
    objects
        .put_object("bench", "object", &mut &data[..], BTreeMap::new())
        .unwrap();

    let mut group = c.benchmark_group("memory_get_object");
    group.throughput(Throughput::Bytes(size as u64));
    let mut out = Vec::with_capacity(size);

    group.bench_function("healthy", |b| {
        b.iter(|| {
            out.clear();
            objects
                .get_object("bench", "object", 0, size as u64, &mut out)
                .unwrap()
        })
    });

    units[0].set_offline(true);
    units[1].set_offline(true);
    group.bench_function("two_units_offline", |b| {
        b.iter(|| {
            out.clear();
            objects
                .get_object("bench", "object", 0, size as u64, &mut out)
                .unwrap()
        })
    });
    units[0].set_offline(false);
    units[1].set_offline(false);

    group.finish();
}

/// Benchmark puts on directory-backed units
fn bench_posix_put(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let config = StorageConfig::new(temp_dir.path()).with_engine(engine());
    let objects = ErasureObjects::open(&config).unwrap();
    let data = generate_data(1024 * 1024);

    let mut group = c.benchmark_group("posix_put_object");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("put_1MB", |b| {
        b.iter(|| {
            objects
                .put_object("bench", "object", &mut &data[..], BTreeMap::new())
                .unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_put, bench_get, bench_posix_put);
criterion_main!(benches);
