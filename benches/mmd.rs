use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use sbi::mmd::unbiased_mmd_squared;

fn normal_sample(n: usize, d: usize, rng: &mut SmallRng) -> Array2<f64> {
    Array2::from_shape_simple_fn((n, d), || StandardNormal.sample(rng))
}

fn bench_mmd(c: &mut Criterion) {
    let mut rng = SmallRng::seed_from_u64(42);
    let mut group = c.benchmark_group("unbiased_mmd_squared");
    for &n in &[250, 1000] {
        let x = normal_sample(n, 3, &mut rng);
        let y = normal_sample(n, 3, &mut rng);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| unbiased_mmd_squared(black_box(&x), black_box(&y)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_mmd);
criterion_main!(benches);
