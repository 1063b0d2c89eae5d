//! Worker pool driving concurrent training.
//!
//! Each worker loops `acquire -> step -> record -> release` until the
//! synchronizer is shut down. A panic anywhere in that loop is caught at the
//! worker boundary: a sample held by a failed step is released, the failure
//! is recorded and only that worker exits.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::Serialize;

use crate::cfr::config::TrainerConfig;
use crate::cfr::error::{ConfigError, EngineError, EngineResult};
use crate::cfr::sample::ChanceSampler;
use crate::cfr::step::TrainingStep;
use crate::cfr::storage::{Snapshot, TrainingData};
use crate::cfr::sync::{build_synchronizer, ChanceSynchronizer};
use crate::cfr::tree::GameTree;

/// A training thread that stopped because it panicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerFailure {
    /// Worker index. The chance producer reports as the index after the
    /// last worker.
    pub worker: usize,
    /// Panic message.
    pub message: String,
}

/// Owns the worker threads of one training table.
///
/// The scheduler allocates the table itself and never hands out a shared
/// handle to it, so nothing outside can observe the table while workers
/// write it.
pub struct TrainingScheduler {
    tree: Arc<GameTree>,
    data: Arc<TrainingData>,
    synchronizer: Arc<dyn ChanceSynchronizer>,
    workers: Vec<JoinHandle<Option<WorkerFailure>>>,
    producer: Option<JoinHandle<()>>,
}

impl TrainingScheduler {
    /// Scheduler over a fresh table for `tree`, guarded by the synchronizer
    /// `config` selects around `sampler`.
    pub fn new<S>(tree: Arc<GameTree>, config: &TrainerConfig, sampler: S) -> Result<Self, ConfigError>
    where
        S: ChanceSampler + 'static,
    {
        let synchronizer = build_synchronizer(config, &tree, sampler)?;
        // SAFETY: the synchronizer was built over this tree and checked its
        // sampler against the tree's chance domains.
        Ok(unsafe { Self::with_synchronizer(tree, synchronizer) })
    }

    /// Scheduler over a fresh table for `tree`, guarded by a caller-supplied
    /// synchronizer.
    ///
    /// # Safety
    /// `synchronizer` must uphold the [`ChanceSynchronizer`] contract with
    /// respect to `tree`: samples it hands out lie inside `tree`'s chance
    /// domains and outstanding ones share no triple of a bucket that owns
    /// decision points.
    pub unsafe fn with_synchronizer(
        tree: Arc<GameTree>,
        synchronizer: Arc<dyn ChanceSynchronizer>,
    ) -> Self {
        let data = Arc::new(TrainingData::new(&tree));
        Self {
            tree,
            data,
            synchronizer,
            workers: Vec::new(),
            producer: None,
        }
    }

    /// Spawn `workers` training threads, plus the producer thread if the
    /// synchronizer needs one.
    pub fn start(&mut self, workers: usize) -> EngineResult<()> {
        if self.is_running() {
            return Err(EngineError::AlreadyRunning);
        }
        if workers == 0 {
            return Err(ConfigError::NoWorkers.into());
        }
        self.synchronizer.reset();

        if self.synchronizer.needs_background() {
            let synchronizer = Arc::clone(&self.synchronizer);
            let handle = thread::Builder::new()
                .name("cfr-producer".to_string())
                .spawn(move || synchronizer.produce_in_background())
                .map_err(EngineError::Spawn)?;
            self.producer = Some(handle);
        }

        for id in 0..workers {
            let tree = Arc::clone(&self.tree);
            let data = Arc::clone(&self.data);
            let synchronizer = Arc::clone(&self.synchronizer);
            let spawned = thread::Builder::new()
                .name(format!("cfr-worker-{}", id))
                .spawn(move || work(id, &tree, &data, synchronizer.as_ref()));
            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(e) => {
                    self.stop_and_await();
                    return Err(EngineError::Spawn(e));
                }
            }
        }
        log::info!(
            "{:<32}{} workers, {} entries",
            "training started",
            workers,
            self.data.num_entries()
        );
        Ok(())
    }

    /// Shut the synchronizer down and join every thread.
    ///
    /// In-flight steps finish first. Returns the workers that failed.
    pub fn stop_and_await(&mut self) -> Vec<WorkerFailure> {
        self.synchronizer.shut_down();
        let mut failures = Vec::new();
        let workers = self.workers.len();
        for (id, handle) in self.workers.drain(..).enumerate() {
            match handle.join() {
                Ok(Some(failure)) => failures.push(failure),
                Ok(None) => {}
                Err(payload) => failures.push(WorkerFailure {
                    worker: id,
                    message: panic_message(payload.as_ref()),
                }),
            }
        }
        if let Some(producer) = self.producer.take() {
            if let Err(payload) = producer.join() {
                let message = panic_message(payload.as_ref());
                log::error!("chance producer failed: {}", message);
                failures.push(WorkerFailure {
                    worker: workers,
                    message,
                });
            }
        }
        log::info!(
            "{:<32}{} iterations, {} failed workers",
            "training stopped",
            self.data.iterations(),
            failures.len()
        );
        failures
    }

    /// Whether workers were started and not yet awaited.
    pub fn is_running(&self) -> bool {
        !self.workers.is_empty() || self.producer.is_some()
    }

    /// Iteration counter and utility sums; safe while training.
    pub fn snapshot(&self) -> Snapshot {
        self.data.snapshot()
    }

    /// The game tree.
    pub fn tree(&self) -> &GameTree {
        &self.tree
    }

    /// The synchronizer.
    pub fn synchronizer(&self) -> &dyn ChanceSynchronizer {
        self.synchronizer.as_ref()
    }

    /// Read access to the table; refused while workers are live.
    pub fn data(&self) -> EngineResult<&TrainingData> {
        if self.is_running() {
            return Err(EngineError::Running);
        }
        Ok(&self.data)
    }

    /// Exclusive access to the table; refused while workers are live.
    pub fn data_mut(&mut self) -> EngineResult<&mut TrainingData> {
        if self.is_running() {
            return Err(EngineError::Running);
        }
        Arc::get_mut(&mut self.data).ok_or(EngineError::Running)
    }
}

impl Drop for TrainingScheduler {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop_and_await();
        }
    }
}

fn work(
    id: usize,
    tree: &GameTree,
    data: &TrainingData,
    synchronizer: &dyn ChanceSynchronizer,
) -> Option<WorkerFailure> {
    let mut step = TrainingStep::new(tree);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        while let Some(sample) = synchronizer.acquire() {
            let stepped = panic::catch_unwind(AssertUnwindSafe(|| {
                // SAFETY: the synchronizer reserved every triple of `sample`
                // for this thread until it is released below.
                let utility = unsafe { step.run_shared(data, &sample) };
                data.record(utility);
            }));
            synchronizer.release(sample);
            if let Err(payload) = stepped {
                panic::resume_unwind(payload);
            }
        }
    }));
    let payload = outcome.err()?;
    let message = panic_message(payload.as_ref());
    log::error!("worker {} failed: {}", id, message);
    Some(WorkerFailure {
        worker: id,
        message,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::{Duration, Instant};

    use super::*;
    use crate::cfr::config::TrainerConfig;
    use crate::cfr::evaluate::expected_value;
    use crate::cfr::game::Game;
    use crate::cfr::sample::{ChanceSample, DealSampler, UniformSampler};
    use crate::cfr::storage::InfoKey;
    use crate::cfr::sync::testing::{CountingSampler, FailingSampler};
    use crate::cfr::sync::{RetrySynchronizer, SyncStats};
    use crate::cfr::tree::{DecisionPoint, TreeBuilder};
    use crate::games::kuhn::KuhnPoker;

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(60);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for workers");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn kuhn_scheduler(config: &TrainerConfig) -> TrainingScheduler {
        let game = KuhnPoker::new();
        let tree = Arc::new(game.tree().unwrap());
        TrainingScheduler::new(tree, config, game.sampler(11).unwrap()).unwrap()
    }

    fn train_kuhn_concurrently(config: TrainerConfig) {
        let mut scheduler = kuhn_scheduler(&config);
        scheduler.start(4).unwrap();
        wait_until(|| scheduler.snapshot().iterations >= 100_000);
        assert!(scheduler.stop_and_await().is_empty());

        let data = scheduler.data().unwrap();
        assert!(data.values().iter().all(|&v| v.is_finite()));
        let value = expected_value(
            scheduler.tree(),
            data,
            &KuhnPoker::new().chance_outcomes().unwrap(),
        );
        assert!(
            (value[0] + 1.0 / 18.0).abs() < 0.02,
            "game value {} is not near -1/18",
            value[0]
        );
        let stats = scheduler.synchronizer().stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.reserved, 0);
    }

    #[test]
    fn test_concurrent_kuhn_with_retry() {
        train_kuhn_concurrently(TrainerConfig::retry());
    }

    #[test]
    fn test_concurrent_kuhn_with_buffered_producer() {
        train_kuhn_concurrently(TrainerConfig::buffered());
    }

    #[test]
    fn test_lifecycle_errors() {
        let mut scheduler = kuhn_scheduler(&TrainerConfig::retry());
        assert!(matches!(
            scheduler.start(0),
            Err(EngineError::Config(ConfigError::NoWorkers))
        ));
        assert!(!scheduler.is_running());

        scheduler.start(2).unwrap();
        assert!(scheduler.is_running());
        assert!(matches!(scheduler.start(2), Err(EngineError::AlreadyRunning)));
        assert!(matches!(scheduler.data(), Err(EngineError::Running)));
        assert!(matches!(scheduler.data_mut(), Err(EngineError::Running)));
        wait_until(|| scheduler.snapshot().iterations >= 100);
        scheduler.stop_and_await();
        let first_run = scheduler.data().unwrap().iterations();

        // Restart continues on the same table.
        scheduler.start(2).unwrap();
        wait_until(|| scheduler.snapshot().iterations >= first_run + 100);
        assert!(scheduler.stop_and_await().is_empty());
        assert!(scheduler.data_mut().is_ok());
    }

    #[test]
    fn test_panicking_step_stops_only_its_worker() {
        let armed = Arc::new(AtomicBool::new(true));
        let trigger = Arc::clone(&armed);
        let mut builder = TreeBuilder::new(1, 1);
        let leaf = builder.chance(move |sample: &ChanceSample| {
            if trigger.swap(false, Ordering::SeqCst) {
                panic!("boom");
            }
            vec![sample.get(0, 0) as f64]
        });
        let flat = builder.fixed(vec![1.0]);
        let root = builder.decision(DecisionPoint { round: 0, player: 0, index: 0 }, vec![leaf, flat]);
        let tree = Arc::new(builder.build(root, vec![vec![4]]).unwrap());
        let mut scheduler = TrainingScheduler::new(
            tree,
            &TrainerConfig::retry(),
            UniformSampler::new(vec![vec![4]], 2),
        )
        .unwrap();

        scheduler.start(3).unwrap();
        wait_until(|| !armed.load(Ordering::SeqCst) && scheduler.snapshot().iterations >= 2_000);
        let failures = scheduler.stop_and_await();

        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.contains("boom"));
        assert!(failures[0].worker < 3);
        assert_eq!(scheduler.synchronizer().stats().reserved, 0);

        // The surviving workers kept training: leaf utility beats the flat 1.0
        // only for chance index 3, so that entry learns to pick the leaf.
        let data = scheduler.data().unwrap();
        let key = InfoKey { round: 0, player: 0, chance: 3, index: 0 };
        assert!(data.average_strategy(key)[0] > 0.5);
    }

    fn chance_tree(chances: usize) -> Arc<GameTree> {
        let mut builder = TreeBuilder::new(1, 1);
        let leaf = builder.chance(|sample: &ChanceSample| vec![sample.get(0, 0) as f64]);
        let flat = builder.fixed(vec![1.0]);
        let root = builder.decision(DecisionPoint { round: 0, player: 0, index: 0 }, vec![leaf, flat]);
        Arc::new(builder.build(root, vec![vec![chances]]).unwrap())
    }

    #[test]
    fn test_foreign_sampler_rejected() {
        let tree = Arc::new(KuhnPoker::new().tree().unwrap());
        for config in [TrainerConfig::retry(), TrainerConfig::buffered()] {
            let wide = DealSampler::new(vec![vec![4, 4]], 1).unwrap();
            assert!(matches!(
                TrainingScheduler::new(Arc::clone(&tree), &config, wide),
                Err(ConfigError::DomainMismatch { .. })
            ));
        }
    }

    #[test]
    fn test_panicking_sampler_stops_only_its_worker() {
        let sampler = FailingSampler::after(UniformSampler::new(vec![vec![6]], 3), 100);
        let fired = Arc::clone(&sampler.fired);
        let mut scheduler =
            TrainingScheduler::new(chance_tree(6), &TrainerConfig::retry(), sampler).unwrap();

        scheduler.start(3).unwrap();
        wait_until(|| fired.load(Ordering::SeqCst) && scheduler.snapshot().iterations >= 2_000);
        let failures = scheduler.stop_and_await();

        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.contains("sampler failed"));
        assert!(failures[0].worker < 3);
        let stats = scheduler.synchronizer().stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.reserved, 0);
    }

    #[test]
    fn test_panicking_producer_is_reported() {
        let sampler = FailingSampler::after(UniformSampler::new(vec![vec![6]], 3), 100);
        let fired = Arc::clone(&sampler.fired);
        let mut scheduler =
            TrainingScheduler::new(chance_tree(6), &TrainerConfig::buffered(), sampler).unwrap();

        scheduler.start(2).unwrap();
        wait_until(|| fired.load(Ordering::SeqCst) && scheduler.synchronizer().is_shut_down());
        let failures = scheduler.stop_and_await();

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].worker, 2);
        assert!(failures[0].message.contains("sampler failed"));
        let stats = scheduler.synchronizer().stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.reserved, 0);
        assert!(scheduler.data().is_ok());
    }

    /// Retry synchronization that counts how often workers acquire.
    struct Counted {
        inner: RetrySynchronizer<CountingSampler<UniformSampler>>,
        acquired: AtomicU64,
    }

    // SAFETY: every sample comes from the wrapped synchronizer unchanged.
    unsafe impl ChanceSynchronizer for Counted {
        fn acquire(&self) -> Option<ChanceSample> {
            let sample = self.inner.acquire()?;
            self.acquired.fetch_add(1, Ordering::Relaxed);
            Some(sample)
        }

        fn release(&self, sample: ChanceSample) {
            self.inner.release(sample)
        }

        fn shut_down(&self) {
            self.inner.shut_down()
        }

        fn reset(&self) {
            self.inner.reset()
        }

        fn is_shut_down(&self) -> bool {
            self.inner.is_shut_down()
        }

        fn stats(&self) -> SyncStats {
            self.inner.stats()
        }
    }

    #[test]
    fn test_custom_synchronizer() {
        let tree = chance_tree(4);
        let sampler = CountingSampler::new(UniformSampler::new(vec![vec![4]], 8));
        let counted = Arc::new(Counted {
            inner: RetrySynchronizer::new(&tree, sampler, 4, Duration::from_secs(1)),
            acquired: AtomicU64::new(0),
        });
        let sync: Arc<dyn ChanceSynchronizer> = counted.clone();
        // SAFETY: `Counted` forwards a synchronizer built over `tree`.
        let mut scheduler = unsafe { TrainingScheduler::with_synchronizer(tree, sync) };

        scheduler.start(2).unwrap();
        wait_until(|| scheduler.snapshot().iterations >= 500);
        assert!(scheduler.stop_and_await().is_empty());
        assert_eq!(
            counted.acquired.load(Ordering::Relaxed),
            scheduler.data().unwrap().iterations()
        );
    }
}
