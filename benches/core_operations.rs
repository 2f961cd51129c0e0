//! Benchmarks for the hot-path store operations: insert, flush, search,
//! and compaction.
//!
//! Run with: `cargo bench`

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use rand::Rng;
use rvf::{Config, SearchOptions, VectorStore};
use tempfile::tempdir;

const DIM: usize = 128;

fn random_vector(rng: &mut impl Rng) -> Vec<f32> {
    (0..DIM).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn seeded_store(count: usize) -> (tempfile::TempDir, VectorStore) {
    let dir = tempdir().unwrap();
    let store = VectorStore::open(dir.path().join("bench.rvf"), Config::new(DIM)).unwrap();
    let mut rng = rand::thread_rng();
    for i in 0..count {
        store.insert(&format!("v{i}"), &random_vector(&mut rng), None).unwrap();
    }
    store.flush().unwrap();
    (dir, store)
}

fn bench_insert(c: &mut Criterion) {
    let mut rng = rand::thread_rng();
    let (_dir, store) = seeded_store(0);

    c.bench_function("insert_single", |b| {
        b.iter_batched(
            || random_vector(&mut rng),
            |vector| {
                store.insert("bench-id", &vector, None).unwrap();
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_flush_batch(c: &mut Criterion) {
    c.bench_function("flush_1k_batch", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let store = VectorStore::open(dir.path().join("bench.rvf"), Config::new(DIM)).unwrap();
                let mut rng = rand::thread_rng();
                for i in 0..1000 {
                    store.insert(&format!("v{i}"), &random_vector(&mut rng), None).unwrap();
                }
                (dir, store)
            },
            |(_dir, store)| {
                store.flush().unwrap();
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_search(c: &mut Criterion) {
    let (_dir, store) = seeded_store(10_000);
    let mut rng = rand::thread_rng();
    let query = random_vector(&mut rng);

    c.bench_function("search_10k_k10", |b| {
        b.iter(|| {
            let results = store.search(&query, 10, SearchOptions::default()).unwrap();
            std::hint::black_box(results);
        });
    });
}

fn bench_compact(c: &mut Criterion) {
    c.bench_function("compact_10k_with_tombstones", |b| {
        b.iter_batched(
            || {
                let (dir, store) = seeded_store(10_000);
                for i in 0..2_000 {
                    store.remove(&format!("v{i}")).unwrap();
                }
                (dir, store)
            },
            |(_dir, store)| {
                let report = store.compact().unwrap();
                std::hint::black_box(report);
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_insert, bench_flush_batch, bench_search, bench_compact);
criterion_main!(benches);
