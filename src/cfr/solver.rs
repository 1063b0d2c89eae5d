//! High-level training facade.
//!
//! [`Solver`] ties a [`Game`] to its table, a seeded sampler for sequential
//! training and a [`TrainingScheduler`] for concurrent training. Sequential
//! and concurrent runs share the same table and can be interleaved.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cfr::config::{TrainerConfig, TrainingStats};
use crate::cfr::error::{EngineResult, PersistenceError};
use crate::cfr::evaluate::expected_value;
use crate::cfr::game::Game;
use crate::cfr::sample::{ChanceSample, ChanceSampler};
use crate::cfr::scheduler::{TrainingScheduler, WorkerFailure};
use crate::cfr::step::TrainingStep;
use crate::cfr::storage::{InfoSetRecord, Snapshot, StrategyExport, StrategySnapshot, TrainingData};
use crate::cfr::sync::SyncStats;
use crate::cfr::tree::GameTree;

/// Offset between the sequential sampler's seed and the concurrent one's.
const BACKGROUND_SEED_OFFSET: u64 = 0x9E37_79B9_7F4A_7C15;

/// CI can be misleadingly low before entries have been visited enough.
const MIN_ITERATIONS_FOR_CONVERGENCE: u64 = 5_000;

/// The main training driver.
///
/// # Example
/// ```
/// use chance_cfr::cfr::{Solver, TrainerConfig};
/// use chance_cfr::games::kuhn::KuhnPoker;
///
/// let mut solver = Solver::new(KuhnPoker::new(), TrainerConfig::default().with_seed(1)).unwrap();
/// solver.train(1_000).unwrap();
/// assert_eq!(solver.snapshot().iterations, 1_000);
/// ```
pub struct Solver<G: Game> {
    game: G,
    config: TrainerConfig,
    tree: Arc<GameTree>,
    scheduler: TrainingScheduler,
    sampler: G::Sampler,
    stats: TrainingStats,
    run_started: Option<Instant>,
}

impl<G: Game> Solver<G> {
    /// Create a solver for the given game.
    ///
    /// Validates the configuration, the game tree and the game's samplers
    /// against the tree's chance domains, and allocates every
    /// information-set entry up front.
    pub fn new(game: G, config: TrainerConfig) -> EngineResult<Self> {
        config.validate()?;
        let tree = Arc::new(game.tree()?);
        let seed = config.seed.unwrap_or_else(rand::random);
        let mut sampler = game.sampler(seed)?;
        tree.check_sampler(&mut sampler)?;
        let background = game.sampler(seed.wrapping_add(BACKGROUND_SEED_OFFSET))?;
        let scheduler = TrainingScheduler::new(Arc::clone(&tree), &config, background)?;
        let data = scheduler.data()?;
        log::info!(
            "{:<32}{} ({} entries, {} values)",
            "game",
            game.name(),
            data.num_entries(),
            data.num_values()
        );
        let mut stats = TrainingStats::new();
        stats.info_sets = data.num_entries();
        Ok(Self {
            game,
            config,
            tree,
            scheduler,
            sampler,
            stats,
            run_started: None,
        })
    }

    /// Train sequentially on the calling thread.
    ///
    /// Reproducible when the configuration carries a seed.
    pub fn train(&mut self, iterations: u64) -> EngineResult<&TrainingStats> {
        let start_time = Instant::now();
        let mut step = TrainingStep::new(&self.tree);
        let data = self.scheduler.data_mut()?;
        for _ in 0..iterations {
            let sample = self.sampler.produce();
            let utility = step.run(data, &sample);
            data.record(utility);
            self.sampler.recycle(sample);
        }
        self.stats.elapsed_seconds += start_time.elapsed().as_secs_f64();
        self.refresh_stats();
        Ok(&self.stats)
    }

    /// Train sequentially with a callback for progress tracking.
    ///
    /// `callback` runs every `callback_interval` iterations.
    pub fn train_with_callback<F>(
        &mut self,
        iterations: u64,
        callback_interval: u64,
        mut callback: F,
    ) -> EngineResult<&TrainingStats>
    where
        F: FnMut(&TrainingStats),
    {
        let interval = callback_interval.max(1);
        let mut remaining = iterations;
        while remaining > 0 {
            let batch = remaining.min(interval);
            self.train(batch)?;
            remaining -= batch;
            callback(&self.stats);
        }
        Ok(&self.stats)
    }

    /// Train sequentially on a fixed list of samples, in order.
    ///
    /// Every sample is checked against the tree's chance domains before
    /// the first one is trained on.
    pub fn train_on(&mut self, samples: &[ChanceSample]) -> EngineResult<&TrainingStats> {
        for sample in samples {
            self.tree.check_sample(sample)?;
        }
        let start_time = Instant::now();
        let mut step = TrainingStep::new(&self.tree);
        let data = self.scheduler.data_mut()?;
        for sample in samples {
            let utility = step.run(data, sample);
            data.record(utility);
        }
        self.stats.elapsed_seconds += start_time.elapsed().as_secs_f64();
        self.refresh_stats();
        Ok(&self.stats)
    }

    /// Start concurrent training in the background.
    pub fn start(&mut self) -> EngineResult<()> {
        self.scheduler.start(self.config.worker_count())?;
        self.run_started = Some(Instant::now());
        Ok(())
    }

    /// Stop concurrent training and wait for every worker.
    pub fn stop(&mut self) -> Vec<WorkerFailure> {
        let failures = self.scheduler.stop_and_await();
        if let Some(started) = self.run_started.take() {
            self.stats.elapsed_seconds += started.elapsed().as_secs_f64();
        }
        self.refresh_stats();
        failures
    }

    /// Whether concurrent training is running.
    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Train concurrently for a fixed wall-clock duration.
    pub fn train_for(&mut self, duration: Duration) -> EngineResult<Vec<WorkerFailure>> {
        self.train_for_with_callback(duration, Duration::from_millis(250), |_| {})
    }

    /// Train concurrently for `duration`, calling `callback` with the live
    /// counters every `interval`.
    pub fn train_for_with_callback<F>(
        &mut self,
        duration: Duration,
        interval: Duration,
        mut callback: F,
    ) -> EngineResult<Vec<WorkerFailure>>
    where
        F: FnMut(&Snapshot),
    {
        let start_time = Instant::now();
        self.start()?;
        loop {
            let elapsed = start_time.elapsed();
            if elapsed >= duration {
                break;
            }
            std::thread::sleep(interval.min(duration - elapsed));
            callback(&self.scheduler.snapshot());
        }
        let failures = self.stop();
        log::info!(
            "{:<32}{} iterations in {:.2}s",
            "timed run finished",
            self.stats.iterations,
            start_time.elapsed().as_secs_f64()
        );
        Ok(failures)
    }

    /// Train until the Convergence Indicator (CI) reaches the target value.
    ///
    /// CI measures how much average strategies changed during the last
    /// `ci_check_interval` iterations. Lower CI means better convergence:
    /// - CI < 10: bare minimum for a usable solution
    /// - CI ~ 1: close to fully converged
    ///
    /// # Arguments
    /// * `ci_target` - Target CI value to reach
    /// * `ci_check_interval` - How many iterations between CI checks
    /// * `max_iterations` - Maximum iterations before giving up (0 = no limit)
    /// * `callback` - Optional callback for progress updates
    pub fn train_until_converged<F>(
        &mut self,
        ci_target: f64,
        ci_check_interval: u64,
        max_iterations: u64,
        mut callback: Option<F>,
    ) -> EngineResult<ConvergenceResult>
    where
        F: FnMut(&ConvergenceStats),
    {
        let start_time = Instant::now();
        let interval = ci_check_interval.max(1);
        let warmup_iterations = interval.max(1_000);
        let mut snapshot: Option<StrategySnapshot> = None;
        let mut current_ci = f64::INFINITY;

        loop {
            self.train(interval)?;
            let data = self.scheduler.data()?;
            let iteration = data.iterations();

            if iteration >= warmup_iterations {
                if let Some(previous) = &snapshot {
                    current_ci = data.convergence_indicator(previous);
                    self.stats.record_convergence(iteration, current_ci);
                }
                snapshot = Some(data.strategy_snapshot());
            }

            let elapsed = start_time.elapsed().as_secs_f64();
            let progress = ConvergenceStats {
                iteration,
                ci: current_ci,
                info_sets: self.stats.info_sets,
                elapsed_seconds: elapsed,
                iterations_per_second: self.stats.iterations_per_second,
            };
            if let Some(cb) = callback.as_mut() {
                cb(&progress);
            }

            if current_ci <= ci_target && iteration >= MIN_ITERATIONS_FOR_CONVERGENCE {
                log::info!("{:<32}{:.3} at {}", "converged", current_ci, iteration);
                return Ok(ConvergenceResult {
                    converged: true,
                    final_ci: current_ci,
                    iterations: iteration,
                    elapsed_seconds: elapsed,
                });
            }
            if max_iterations > 0 && iteration >= max_iterations {
                return Ok(ConvergenceResult {
                    converged: false,
                    final_ci: current_ci,
                    iterations: iteration,
                    elapsed_seconds: elapsed,
                });
            }
        }
    }

    /// Average strategies of every visited entry, labelled by the game.
    pub fn export_strategies(&self) -> EngineResult<StrategyExport> {
        let data = self.scheduler.data()?;
        let snapshot = data.snapshot();
        let info_sets = data
            .keys()
            .filter_map(|key| {
                let entry = data.entry(key);
                let weight = entry.weight();
                if weight <= 0.0 {
                    return None;
                }
                Some(InfoSetRecord {
                    key,
                    label: self.game.decision_label(key),
                    actions: (0..entry.actions())
                        .map(|a| self.game.action_name(key.point(), a))
                        .collect(),
                    strategy: entry.average_strategy(),
                    weight,
                })
            })
            .collect();
        Ok(StrategyExport {
            game: self.game.name().to_string(),
            iterations: snapshot.iterations,
            average_utility: snapshot.average_utility(),
            info_sets,
        })
    }

    /// Write [`export_strategies`](Self::export_strategies) as pretty JSON.
    pub fn write_strategies(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let export = self.export_strategies()?;
        let file = File::create(path.as_ref()).map_err(PersistenceError::from)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &export)
            .map_err(PersistenceError::from)?;
        log::info!(
            "{:<32}{} ({} info sets)",
            "exported strategies",
            path.as_ref().display(),
            export.info_sets.len()
        );
        Ok(())
    }

    /// Exact expected utility per player under the average strategies, for
    /// games that enumerate their chance outcomes.
    pub fn evaluate(&self) -> EngineResult<Option<Vec<f64>>> {
        let data = self.scheduler.data()?;
        Ok(self
            .game
            .chance_outcomes()
            .map(|outcomes| expected_value(&self.tree, data, &outcomes)))
    }

    /// Save a binary checkpoint of the table.
    pub fn save_to(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        self.scheduler.data()?.save_to_path(path)?;
        Ok(())
    }

    /// Replace the table with a checkpoint written by [`save_to`](Self::save_to).
    pub fn load_from(&mut self, path: impl AsRef<Path>) -> EngineResult<()> {
        self.scheduler.data_mut()?.load_from_path(path)?;
        self.refresh_stats();
        Ok(())
    }

    /// Zero the table and statistics.
    pub fn reset(&mut self) -> EngineResult<()> {
        self.scheduler.data_mut()?.reset();
        let info_sets = self.stats.info_sets;
        self.stats = TrainingStats::new();
        self.stats.info_sets = info_sets;
        Ok(())
    }

    /// Iteration counter and utility sums; safe while training.
    pub fn snapshot(&self) -> Snapshot {
        self.scheduler.snapshot()
    }

    /// Synchronizer counters; safe while training.
    pub fn sync_stats(&self) -> SyncStats {
        self.scheduler.synchronizer().stats()
    }

    /// Read access to the table; refused while training concurrently.
    pub fn data(&self) -> EngineResult<&TrainingData> {
        self.scheduler.data()
    }

    /// Get reference to the game.
    pub fn game(&self) -> &G {
        &self.game
    }

    /// Get reference to the game tree.
    pub fn tree(&self) -> &GameTree {
        &self.tree
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Get current statistics.
    pub fn stats(&self) -> &TrainingStats {
        &self.stats
    }

    fn refresh_stats(&mut self) {
        let snapshot = self.scheduler.snapshot();
        self.stats.iterations = snapshot.iterations;
        self.stats.average_utility = snapshot.average_utility();
        self.stats.update_rate();
    }
}

/// Statistics during convergence-based training.
#[derive(Debug, Clone)]
pub struct ConvergenceStats {
    /// Current iteration count.
    pub iteration: u64,
    /// Current Convergence Indicator value.
    pub ci: f64,
    /// Number of information-set entries.
    pub info_sets: usize,
    /// Elapsed time in seconds.
    pub elapsed_seconds: f64,
    /// Current solve speed.
    pub iterations_per_second: f64,
}

/// Result of convergence-based training.
#[derive(Debug, Clone)]
pub struct ConvergenceResult {
    /// Whether the target CI was reached.
    pub converged: bool,
    /// Final CI value achieved.
    pub final_ci: f64,
    /// Total iterations run.
    pub iterations: u64,
    /// Total elapsed time in seconds.
    pub elapsed_seconds: f64,
}
