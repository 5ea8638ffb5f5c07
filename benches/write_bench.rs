// Write path benchmarks: ingest, commit and compaction

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use tablestore::config::CompressionType;
use tablestore::operation::ManifestCommittable;
use tablestore::types::{Row, RowKind, Value};
use tablestore::{FileStore, Options};
use tempfile::TempDir;

fn row(i: u64) -> Row {
    Row::new(vec![Value::Int(i as i64), Value::String(format!("value{:08}", i))])
}

fn write_and_commit(store: &FileStore, keys: impl Iterator<Item = u64>, identifier: u64) {
    let mut writer = store.new_writer("", 0).unwrap();
    for k in keys {
        let key = format!("key{:08}", k);
        writer.write(RowKind::Insert, key.as_bytes(), row(k)).unwrap();
    }
    let mut committable = ManifestCommittable::new(identifier);
    committable.add_increment("", 0, writer.prepare_commit(true).unwrap());
    store.new_commit("bench").commit(&committable).unwrap();
}

fn benchmark_sequential_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_write");

    for size in [100u64, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let store = FileStore::open(temp_dir.path(), Options::default()).unwrap();
                write_and_commit(&store, 0..size, 1);
                black_box(&store);
            });
        });
    }

    group.finish();
}

fn benchmark_random_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_write");

    for size in [100u64, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let store = FileStore::open(temp_dir.path(), Options::default()).unwrap();

                use rand::Rng;
                let mut rng = rand::rng();
                let keys: Vec<u64> =
                    (0..size).map(|_| rng.random_range(0..u32::MAX as u64)).collect();
                write_and_commit(&store, keys.into_iter(), 1);

                black_box(&store);
            });
        });
    }

    group.finish();
}

fn benchmark_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");

    // every commit lands on top of a growing snapshot history
    group.bench_function("append_commit_100_rows", |b| {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path(), Options::default()).unwrap();
        let mut writer = store.new_writer("", 0).unwrap();
        let mut identifier = 0u64;

        b.iter(|| {
            identifier += 1;
            for i in 0..100 {
                let key = format!("key{:08}", identifier * 100 + i);
                writer.write(RowKind::Insert, key.as_bytes(), row(i)).unwrap();
            }
            let mut committable = ManifestCommittable::new(identifier);
            committable.add_increment("", 0, writer.prepare_commit(true).unwrap());
            black_box(store.new_commit("bench").commit(&committable).unwrap());
        });
    });

    group.finish();
}

fn benchmark_full_compaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_compaction");
    group.throughput(Throughput::Elements(10_000));

    group.bench_function("overwrite_10000", |b| {
        b.iter(|| {
            let temp_dir = TempDir::new().unwrap();
            let options = Options::default().level0_compaction_trigger(100);
            let store = FileStore::open(temp_dir.path(), options).unwrap();
            let mut writer = store.new_writer("", 0).unwrap();

            // five overlapping runs of the same keys
            for round in 0..5 {
                for i in 0..2000u64 {
                    let key = format!("key{:08}", i);
                    writer.write(RowKind::Insert, key.as_bytes(), row(i + round)).unwrap();
                }
                writer.flush().unwrap();
            }
            writer.compact(true).unwrap();
            black_box(writer.levels().all_files());
        });
    });

    group.finish();
}

fn benchmark_write_with_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_with_compression");

    group.bench_function("no_compression", |b| {
        b.iter(|| {
            let temp_dir = TempDir::new().unwrap();
            let opts = Options::default().compression(CompressionType::None);
            let store = FileStore::open(temp_dir.path(), opts).unwrap();
            write_and_commit(&store, 0..1000, 1);
            black_box(&store);
        });
    });

    #[cfg(feature = "snappy")]
    group.bench_function("snappy_compression", |b| {
        b.iter(|| {
            let temp_dir = TempDir::new().unwrap();
            let opts = Options::default().compression(CompressionType::Snappy);
            let store = FileStore::open(temp_dir.path(), opts).unwrap();
            write_and_commit(&store, 0..1000, 1);
            black_box(&store);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_sequential_write,
    benchmark_random_write,
    benchmark_commit,
    benchmark_full_compaction,
    benchmark_write_with_compression
);
criterion_main!(benches);
