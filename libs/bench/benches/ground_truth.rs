// Brute-force ground truth cost.
//
// Measures one exact top-k query over reference sets of GIST dimension,
// sequential scan vs. the chunked rayon scan the evaluator uses.
//
// To run:
// ```
// cargo bench -p vdbench --bench ground_truth
// ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use vdbench::dataset::GIST_DIM;
use vdbench::ground_truth::{top_k, top_k_parallel};
use vdbench_core::distance::Metric;

fn generate_vectors(rng: &mut ChaCha8Rng, count: usize, dim: usize) -> Vec<Vec<f32>> {
    (0..count)
        .map(|_| (0..dim).map(|_| rng.gen::<f32>()).collect())
        .collect()
}

fn bench_top_k(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let query = generate_vectors(&mut rng, 1, GIST_DIM).remove(0);

    let mut group = c.benchmark_group("ground_truth");
    group.sample_size(10);

    for size in [10_000usize, 50_000] {
        let reference = generate_vectors(&mut rng, size, GIST_DIM);

        group.bench_with_input(
            BenchmarkId::new("sequential", size),
            &reference,
            |b, reference| {
                b.iter(|| {
                    top_k(
                        black_box(&query),
                        100,
                        Metric::Euclidean,
                        reference.iter().enumerate().map(|(i, v)| (i as u64, v.as_slice())),
                    )
                })
            },
        );

        group.bench_with_input(
            BenchmarkId::new("parallel", size),
            &reference,
            |b, reference| {
                b.iter(|| top_k_parallel(reference, black_box(&query), 100, Metric::Euclidean))
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_top_k);
criterion_main!(benches);
