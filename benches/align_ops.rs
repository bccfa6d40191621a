//! Benchmarks for the alignment kernels.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::SeedableRng;

use kg_align::assignment::maximize_similarity;
use kg_align::neighbors::nearest_neighbors;
use kg_align::tensor::Matrix;
use kg_align::tensor::distance::{cosine_similarity, pairwise_l2};

fn bench_matmul(c: &mut Criterion) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let a = Matrix::xavier_uniform(1000, 128, &mut rng);
    let b = Matrix::xavier_uniform(128, 128, &mut rng);

    c.bench_function("matmul_1000x128x128", |bench| {
        bench.iter(|| black_box(a.matmul(&b).unwrap()))
    });
}

fn bench_distances(c: &mut Criterion) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let a = Matrix::xavier_uniform(1000, 128, &mut rng);
    let b = Matrix::xavier_uniform(1000, 128, &mut rng);

    c.bench_function("pairwise_l2_1000x1000", |bench| {
        bench.iter(|| black_box(pairwise_l2(&a, &b).unwrap()))
    });
    c.bench_function("cosine_1000x1000", |bench| {
        bench.iter(|| black_box(cosine_similarity(&a, &b).unwrap()))
    });
}

fn bench_nearest_neighbors(c: &mut Criterion) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let a = Matrix::xavier_uniform(1000, 128, &mut rng);
    let dist = pairwise_l2(&a, &a).unwrap();
    let ids: Vec<usize> = (0..1000).collect();

    c.bench_function("nearest_neighbors_1000_k25", |bench| {
        bench.iter(|| black_box(nearest_neighbors(&dist, &ids, 25)))
    });
}

fn bench_assignment(c: &mut Criterion) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let a = Matrix::xavier_uniform(300, 64, &mut rng);
    let b = Matrix::xavier_uniform(300, 64, &mut rng);
    let sim = cosine_similarity(&a, &b).unwrap();

    c.bench_function("assignment_300x300", |bench| {
        bench.iter(|| black_box(maximize_similarity(&sim).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_matmul,
    bench_distances,
    bench_nearest_neighbors,
    bench_assignment
);
criterion_main!(benches);
