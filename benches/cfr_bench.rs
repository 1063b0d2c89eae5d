//! Benchmarks for the training engine.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use chance_cfr::cfr::{
    build_synchronizer, ChanceSampler, Game, Solver, TrainerConfig, TrainingData, TrainingStep,
};
use chance_cfr::games::kuhn::KuhnPoker;

fn kuhn_iteration_benchmark(c: &mut Criterion) {
    let game = KuhnPoker::new();
    let tree = game.tree().unwrap();
    let mut data = TrainingData::new(&tree);
    let mut step = TrainingStep::new(&tree);
    let mut sampler = game.sampler(42).unwrap();

    c.bench_function("kuhn_single_iteration", |b| {
        b.iter(|| {
            let sample = sampler.produce();
            let utility = step.run(&mut data, &sample);
            data.record(utility);
            let value = utility[0];
            sampler.recycle(sample);
            black_box(value)
        })
    });
}

fn kuhn_1000_iterations_benchmark(c: &mut Criterion) {
    c.bench_function("kuhn_1000_iterations", |b| {
        b.iter(|| {
            let config = TrainerConfig::default().with_seed(42);
            let mut solver = Solver::new(KuhnPoker::new(), config).unwrap();
            solver.train(black_box(1000)).unwrap().iterations
        })
    });
}

fn synchronizer_benchmark(c: &mut Criterion) {
    let game = KuhnPoker::new();
    let tree = game.tree().unwrap();
    let retry = build_synchronizer(&TrainerConfig::retry(), &tree, game.sampler(42).unwrap()).unwrap();

    c.bench_function("retry_acquire_release", |b| {
        b.iter(|| {
            let sample = retry.acquire().unwrap();
            retry.release(black_box(sample));
        })
    });
    retry.shut_down();
}

fn snapshot_benchmark(c: &mut Criterion) {
    let config = TrainerConfig::default().with_seed(42);
    let mut solver = Solver::new(KuhnPoker::new(), config).unwrap();
    solver.train(10_000).unwrap();
    let data = solver.data().unwrap();

    c.bench_function("kuhn_strategy_snapshot", |b| {
        b.iter(|| black_box(data.strategy_snapshot()))
    });
}

criterion_group!(
    benches,
    kuhn_iteration_benchmark,
    kuhn_1000_iterations_benchmark,
    synchronizer_benchmark,
    snapshot_benchmark
);
criterion_main!(benches);
