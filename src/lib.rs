//! # Chance CFR
//!
//! A concurrent chance-sampled Counterfactual Regret Minimization (CFR)
//! engine for computing Nash equilibrium strategies in extensive-form games.
//!
//! ## Features
//!
//! - **Generic Engine**: Works with any game implementing the `Game` trait
//! - **Chance Sampling**: One Monte-Carlo draw of nature per iteration
//! - **Concurrent Training**: Worker threads share one table, kept apart by a
//!   chance synchronizer (reserve-and-retry or a buffered producer)
//! - **Checkpointing**: Save and resume training data
//! - **Convergence Tracking**: Strategy-change indicator and exact evaluation
//!   for enumerable chance models
//!
//! ## Quick Start
//!
//! ```
//! use chance_cfr::{KuhnPoker, Solver, TrainerConfig};
//!
//! let mut solver = Solver::new(KuhnPoker::new(), TrainerConfig::default().with_seed(7))?;
//! solver.train(1_000)?;
//!
//! let value = solver.evaluate()?.expect("Kuhn poker is enumerable");
//! assert!((value[0] + value[1]).abs() < 1e-9);
//! # Ok::<(), chance_cfr::EngineError>(())
//! ```
//!
//! ## Modules
//!
//! - [`cfr`]: Core training engine
//! - [`games`]: Example game implementations (Kuhn Poker, matching pennies)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Solver (Generic over Game)                 │
//! │  - sequential training     - timed concurrent runs              │
//! │  - convergence tracking    - checkpoints and exports            │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!   ┌──────────────────────────────────────────────────────────┐
//!   │ TrainingScheduler: N workers  acquire → step → release   │
//!   └──────────────────────────────────────────────────────────┘
//!          │                     │                     │
//!          ▼                     ▼                     ▼
//!   ┌─────────────┐      ┌──────────────┐      ┌──────────────┐
//!   │ Chance      │      │ TrainingStep │      │ TrainingData │
//!   │ Synchronizer│      │ (tree walk)  │      │ (flat table) │
//!   └─────────────┘      └──────────────┘      └──────────────┘
//! ```

#![warn(missing_docs)]

/// Chance-sampled CFR training engine.
///
/// This is the core module containing the tree model, the shared table, the
/// synchronizers and the worker pool.
pub mod cfr;

/// Game implementations module.
///
/// Contains example games like Kuhn Poker for testing and validation.
pub mod games;

// Re-export commonly used types at crate root for convenience
pub use cfr::{
    ChanceSample, ChanceSynchronizer, EngineError, EngineResult, Game, GameTree, InfoKey,
    Solver, SynchronizerConfig, TrainerConfig, TrainingData, TrainingStats,
};
pub use games::kuhn::KuhnPoker;
pub use games::pennies::MatchingPennies;
