//! Selection overhead: how long it takes the optimizer to pick and build an
//! index, and how cheap the cached-reuse path is.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use proxim::{Dataset, DistanceRef, Euclidean, KnnIndex, ProximityIndex, QueryFlags, QueryOptimizer};

fn dataset(n: usize, dim: usize) -> Arc<Dataset> {
    let rows: Vec<Vec<f32>> = (0..n)
        .map(|i| {
            (0..dim)
                .map(|d| ((i * 31 + d * 7) % 97) as f32 / 97.0)
                .collect()
        })
        .collect();
    Arc::new(Dataset::from_rows(&rows).unwrap())
}

fn bench_selection(c: &mut Criterion) {
    let ds = dataset(500, 3);
    let dist: DistanceRef = Arc::new(Euclidean);
    let opt = QueryOptimizer::new();

    c.bench_function("select_and_build_knn_500", |b| {
        b.iter(|| {
            let index = opt
                .knn_by_object(&ds, &dist, 10, QueryFlags::NO_CACHE)
                .unwrap();
            std::hint::black_box(index.knn_by_id(0, 10))
        })
    });

    // Build once, then measure the cache-hit path.
    let held = opt.knn_by_object(&ds, &dist, 10, QueryFlags::empty()).unwrap();
    c.bench_function("select_cached_knn_500", |b| {
        b.iter(|| {
            let index = opt
                .knn_by_object(&ds, &dist, 10, QueryFlags::empty())
                .unwrap();
            std::hint::black_box(index.kind())
        })
    });
    drop(held);
}

criterion_group!(benches, bench_selection);
criterion_main!(benches);
