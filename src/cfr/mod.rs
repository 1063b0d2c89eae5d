//! Concurrent chance-sampled CFR (Counterfactual Regret Minimization).
//!
//! This module trains strategies for extensive-form games whose chance events
//! can be written as a table of indices, one per (round, player) slot. Every
//! iteration draws one [`ChanceSample`] and walks the whole decision tree
//! under it. Several workers run iterations at once on one shared table.
//!
//! # Overview
//!
//! - [`GameTree`]: immutable arena of decision and terminal nodes, built once
//!   with a [`TreeBuilder`] and validated.
//! - [`TrainingData`]: flat table of regret and strategy-sum accumulators,
//!   one entry per `(round, player, chance, index)`.
//! - [`TrainingStep`]: one regret-matching walk of the tree under a sample.
//! - [`ChanceSynchronizer`]: hands out samples so that no two in-flight
//!   samples touch the same `(round, player, chance)` triple. Two strategies:
//!   [`RetrySynchronizer`] and [`BufferedSynchronizer`].
//! - [`TrainingScheduler`]: worker threads looping
//!   `acquire -> step -> release` until stopped.
//! - [`Solver`]: facade tying a [`Game`] to all of the above.
//!
//! # Usage
//!
//! 1. Implement the [`Game`] trait for your game
//! 2. Create a [`Solver`] with your game and a [`TrainerConfig`]
//! 3. Call `train()` for sequential iterations or `train_for()` for a
//!    concurrent timed run
//! 4. Read strategies with `data()?.average_strategy(key)` or export them
//!
//! # Example
//!
//! ```no_run
//! use chance_cfr::cfr::{Solver, TrainerConfig};
//! use chance_cfr::games::kuhn::KuhnPoker;
//! use std::time::Duration;
//!
//! let config = TrainerConfig::buffered().with_threads(4);
//! let mut solver = Solver::new(KuhnPoker::new(), config)?;
//!
//! // Concurrent training for ten seconds.
//! solver.train_for(Duration::from_secs(10))?;
//!
//! let key = KuhnPoker::key(2, "b").expect("known history");
//! let strategy = solver.data()?.average_strategy(key);
//! println!("King facing a bet: {:?}", strategy);
//! # Ok::<(), chance_cfr::cfr::EngineError>(())
//! ```
//!
//! # Theory
//!
//! **Counterfactual regret**: for the acting player `p` at a decision node,
//! with `π₋ₚ` the product of the other players' reach probabilities:
//! ```text
//! Regret(a) += π₋ₚ · (Value(a) - Value(current_strategy))
//! ```
//!
//! **Regret Matching+**: stored regret is floored at zero after every update
//! and the strategy is proportional to it.
//! ```text
//! Strategy(a) = Regret(a) / sum(Regret(a'))    (uniform if the sum is 0)
//! ```
//!
//! **Average strategy**: strategy sums are weighted by the acting player's
//! own reach, and the normalized sum converges to a Nash equilibrium in
//! two-player zero-sum games.
//!
//! # References
//!
//! - Zinkevich, M., et al. "Regret Minimization in Games with Incomplete Information" (2007)
//! - Lanctot, M., et al. "Monte Carlo Sampling for Regret Minimization in Extensive Games" (2009)
//! - Tammelin, O. "Solving Large Imperfect Information Games Using CFR+" (2014)

mod checkpoint;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod game;
pub mod sample;
pub mod scheduler;
pub mod solver;
pub mod step;
pub mod storage;
pub mod sync;
pub mod tree;

// Re-export main types for convenient access
pub use config::{ConvergencePoint, SynchronizerConfig, TrainerConfig, TrainingStats};
pub use error::{ConfigError, EngineError, EngineResult, PersistenceError, TreeError};
pub use evaluate::{expected_utility, expected_value};
pub use game::Game;
pub use sample::{ChanceSample, ChanceSampler, DealSampler, SequenceSampler, UniformSampler};
pub use scheduler::{TrainingScheduler, WorkerFailure};
pub use solver::{ConvergenceResult, ConvergenceStats, Solver};
pub use step::TrainingStep;
pub use storage::{
    InfoKey, InfoSetEntry, InfoSetRecord, Snapshot, StrategyExport, StrategySnapshot,
    TrainingData,
};
pub use sync::{
    build_synchronizer, BufferedSynchronizer, ChanceSynchronizer, ReservationSet,
    RetrySynchronizer, SyncStats,
};
pub use tree::{Decision, DecisionPoint, GameTree, Node, NodeId, Payout, TreeBuilder};
