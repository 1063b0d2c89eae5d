//! Game implementations for the training engine.
//!
//! These games have known equilibria, so they serve as:
//!
//! 1. **Validation**: converged strategies and game values can be checked
//!    against closed-form results.
//!
//! 2. **Examples**: they show how to build a [`GameTree`](crate::cfr::GameTree)
//!    and implement the `Game` trait.
//!
//! 3. **Benchmarks**: small, fixed workloads for performance testing.
//!
//! ## Available Games
//!
//! - [`kuhn`]: Kuhn Poker - a 3-card poker game, value -1/18 for player 1
//! - [`pennies`]: Matching pennies with a hidden first move, value 0
//!
//! ## Adding New Games
//!
//! 1. Create a new module under `src/games/`
//! 2. Build the tree with a `TreeBuilder`, giving every information set a
//!    dense `(round, player, index)` address
//! 3. Describe the chance model with a sampler
//! 4. Add tests that verify expected behavior
//!
//! See the [`kuhn`] module for a complete example.

pub mod kuhn;
pub mod pennies;
