use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::time::Duration;
use schur_ba_rs::{Optimizer, OptimizerSettings, RobustKind};

fn project(pose: &[f64], point: &[f64], out: &mut [f64]) {
    let depth = point[2] - pose[2];
    out[0] = pose[3] * (point[0] - pose[0]) / depth;
    out[1] = pose[3] * (point[1] - pose[1]) / depth;
}

struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 11) as f64 / (1u64 << 53) as f64) - 0.5
    }
}

/// Cameras on a line looking at a slab of points; every camera sees every
/// point. Starting values are the truth plus noise.
fn bundle(cameras: usize, points: usize, robust: RobustKind) -> Optimizer {
    let mut rng = Lcg(7);
    let truth_cameras: Vec<[f64; 4]> = (0..cameras)
        .map(|i| [0.5 * i as f64, 0.1 * rng.next(), -5.0, 1.0 + 0.05 * rng.next()])
        .collect();
    let truth_points: Vec<[f64; 3]> = (0..points)
        .map(|_| [4.0 * rng.next(), 4.0 * rng.next(), 2.0 * rng.next()])
        .collect();

    let mut settings = OptimizerSettings::new(4, 3, 2);
    settings.robust = robust;
    let mut optimizer = Optimizer::new(settings, project).unwrap();
    for (id, camera) in truth_cameras.iter().enumerate() {
        let noisy: Vec<f64> = camera.iter().map(|v| v + 0.02 * rng.next()).collect();
        optimizer.add_vertex_type1(id as u64, &noisy, false).unwrap();
    }
    for (id, point) in truth_points.iter().enumerate() {
        let noisy: Vec<f64> = point.iter().map(|v| v + 0.1 * rng.next()).collect();
        optimizer.add_vertex_type2(id as u64, &noisy, false).unwrap();
    }
    let mut edge = 0u64;
    let mut observation = [0.0; 2];
    for (c, camera) in truth_cameras.iter().enumerate() {
        for (p, point) in truth_points.iter().enumerate() {
            project(camera, point, &mut observation);
            optimizer
                .add_edge(edge, c as u64, p as u64, &observation, &[0.01, 0.01])
                .unwrap();
            edge += 1;
        }
    }
    optimizer.initialize().unwrap();
    optimizer
}

fn bench_optimize_small(c: &mut Criterion) {
    c.bench_function("optimize_4x30", |b| {
        b.iter_batched(
            || bundle(4, 30, RobustKind::None),
            |mut optimizer| {
                let stats = optimizer.optimize(50).unwrap();
                black_box(stats);
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_optimize_medium(c: &mut Criterion) {
    c.bench_function("optimize_10x200", |b| {
        b.iter_batched(
            || bundle(10, 200, RobustKind::None),
            |mut optimizer| {
                let stats = optimizer.optimize(50).unwrap();
                black_box(stats);
            },
            BatchSize::LargeInput,
        );
    });
}

fn bench_optimize_huber(c: &mut Criterion) {
    c.bench_function("optimize_10x200_huber", |b| {
        b.iter_batched(
            || bundle(10, 200, RobustKind::Huber { delta: 1.0 }),
            |mut optimizer| {
                let stats = optimizer.optimize(50).unwrap();
                black_box(stats);
            },
            BatchSize::LargeInput,
        );
    });
}

fn bench_linearize(c: &mut Criterion) {
    let mut optimizer = bundle(10, 200, RobustKind::None);
    c.bench_function("linearize_10x200", |b| {
        b.iter(|| {
            let norm = optimizer.linearize().unwrap();
            black_box(norm);
        });
    });
}

fn bench_compute_step(c: &mut Criterion) {
    let mut optimizer = bundle(20, 500, RobustKind::None);
    optimizer.linearize().unwrap();
    let mut lambda = 1e-3;
    c.bench_function("compute_step_20x500", |b| {
        b.iter(|| {
            lambda = if lambda < 1.0 { lambda * 2.0 } else { 1e-3 };
            let step = optimizer.compute_step(lambda).unwrap();
            black_box(&step);
        });
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .sample_size(10)
        .warm_up_time(Duration::from_millis(500))
        .measurement_time(Duration::from_millis(1000));
    targets =
        bench_optimize_small,
        bench_optimize_medium,
        bench_optimize_huber,
        bench_linearize,
        bench_compute_step
}
criterion_main!(benches);
