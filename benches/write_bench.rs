// Write performance benchmarks for CaskDb

use caskdb::{IndexType, Options, WriteBatchOptions, DB};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use tempfile::TempDir;

fn benchmark_sequential_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_write");

    for size in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let db = DB::open(Options::default().dir_path(temp_dir.path())).unwrap();

                for i in 0..size {
                    let key = format!("key{:08}", i);
                    let value = format!("value{:08}", i);
                    db.put(key.as_bytes(), value.as_bytes()).unwrap();
                }

                black_box(&db);
            });
        });
    }

    group.finish();
}

fn benchmark_random_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_write");

    for size in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let db = DB::open(Options::default().dir_path(temp_dir.path())).unwrap();

                use rand::Rng;
                let mut rng = rand::rng();

                for _ in 0..size {
                    let key_num: u32 = rng.random();
                    let key = format!("key{:08}", key_num);
                    let value = format!("value{:08}", key_num);
                    db.put(key.as_bytes(), value.as_bytes()).unwrap();
                }

                black_box(&db);
            });
        });
    }

    group.finish();
}

fn benchmark_batch_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_write");

    for batch_size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                b.iter(|| {
                    let temp_dir = TempDir::new().unwrap();
                    let db = DB::open(Options::default().dir_path(temp_dir.path())).unwrap();

                    let batch = db.new_write_batch(WriteBatchOptions::default()).unwrap();
                    for i in 0..batch_size {
                        let key = format!("key{:08}", i);
                        let value = format!("value{:08}", i);
                        batch.put(key.as_bytes(), value.as_bytes()).unwrap();
                    }
                    batch.commit().unwrap();

                    black_box(&db);
                });
            },
        );
    }

    group.finish();
}

fn benchmark_overwrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("overwrite");

    group.throughput(Throughput::Elements(1000));
    group.bench_function("overwrite_1000", |b| {
        // Setup database once for all iterations
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(Options::default().dir_path(temp_dir.path())).unwrap();

        for i in 0..1000 {
            let key = format!("key{:08}", i);
            let value = format!("initial_value{:08}", i);
            db.put(key.as_bytes(), value.as_bytes()).unwrap();
        }

        b.iter(|| {
            for i in 0..1000 {
                let key = format!("key{:08}", i);
                let value = format!("updated_value{:08}", i);
                db.put(key.as_bytes(), value.as_bytes()).unwrap();
            }
            black_box(&db);
        });
    });

    group.finish();
}

fn benchmark_write_by_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_by_index");
    group.throughput(Throughput::Elements(1000));

    for index_type in [IndexType::BTree, IndexType::Art, IndexType::BPlusTree] {
        group.bench_function(BenchmarkId::from_parameter(format!("{:?}", index_type)), |b| {
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let opts = Options::default().dir_path(temp_dir.path()).index_type(index_type);
                let db = DB::open(opts).unwrap();

                for i in 0..1000 {
                    let key = format!("key{:08}", i);
                    let value = vec![b'x'; 100];
                    db.put(key.as_bytes(), &value).unwrap();
                }

                black_box(&db);
            });
        });
    }

    group.finish();
}

fn benchmark_sync_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_writes");
    group.sample_size(10);

    group.bench_function("sync_every_write", |b| {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(Options::default().dir_path(temp_dir.path()).sync_writes(true)).unwrap();
        let mut i = 0u64;

        b.iter(|| {
            let key = format!("key{:08}", i);
            db.put(key.as_bytes(), b"value").unwrap();
            i += 1;
        });
    });

    group.bench_function("sync_every_64kb", |b| {
        let temp_dir = TempDir::new().unwrap();
        let opts = Options::default().dir_path(temp_dir.path()).bytes_per_sync(64 * 1024);
        let db = DB::open(opts).unwrap();
        let mut i = 0u64;

        b.iter(|| {
            let key = format!("key{:08}", i);
            db.put(key.as_bytes(), b"value").unwrap();
            i += 1;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_sequential_write,
    benchmark_random_write,
    benchmark_batch_write,
    benchmark_overwrite,
    benchmark_write_by_index,
    benchmark_sync_writes
);
criterion_main!(benches);
