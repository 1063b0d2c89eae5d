//! Game trait definition for the training engine.
//!
//! A game describes itself once, as a validated [`GameTree`] plus a chance
//! model; the engine never asks it anything during training. Labels are only
//! used for exports and reports.

use crate::cfr::error::{ConfigError, TreeError};
use crate::cfr::sample::{ChanceSample, ChanceSampler};
use crate::cfr::storage::InfoKey;
use crate::cfr::tree::{DecisionPoint, GameTree};

/// The main Game trait that defines the interface for any game.
///
/// Implement this trait to train a game with [`Solver`](crate::cfr::Solver).
///
/// # Example
/// ```
/// use chance_cfr::cfr::{
///     ConfigError, DecisionPoint, Game, GameTree, TreeBuilder, TreeError, UniformSampler,
/// };
///
/// /// Player 0 guesses a coin that nobody sees.
/// struct Guess;
///
/// impl Game for Guess {
///     type Sampler = UniformSampler;
///
///     fn name(&self) -> &str {
///         "guess"
///     }
///
///     fn tree(&self) -> Result<GameTree, TreeError> {
///         let mut builder = TreeBuilder::new(1, 1);
///         let heads = builder.chance(|s: &chance_cfr::cfr::ChanceSample| {
///             vec![if s.get(0, 0) == 0 { 1.0 } else { -1.0 }]
///         });
///         let tails = builder.chance(|s: &chance_cfr::cfr::ChanceSample| {
///             vec![if s.get(0, 0) == 1 { 1.0 } else { -1.0 }]
///         });
///         let root = builder.decision(DecisionPoint { round: 0, player: 0, index: 0 }, vec![heads, tails]);
///         builder.build(root, vec![vec![1]])
///     }
///
///     fn sampler(&self, seed: u64) -> Result<UniformSampler, ConfigError> {
///         Ok(UniformSampler::new(vec![vec![1]], seed))
///     }
/// }
///
/// assert_eq!(Guess.tree().unwrap().decision_count(0, 0), 1);
/// ```
pub trait Game {
    /// Chance model used for training.
    type Sampler: ChanceSampler + 'static;

    /// Short name used in logs and exports.
    fn name(&self) -> &str;

    /// Build the decision tree.
    fn tree(&self) -> Result<GameTree, TreeError>;

    /// Create a seeded sampler of the game's chance outcomes.
    fn sampler(&self, seed: u64) -> Result<Self::Sampler, ConfigError>;

    /// Every chance outcome with its probability, when the game is small
    /// enough to enumerate. Enables exact evaluation.
    fn chance_outcomes(&self) -> Option<Vec<(ChanceSample, f64)>> {
        None
    }

    /// Get a human-readable name for an action.
    fn action_name(&self, _point: DecisionPoint, action: usize) -> String {
        format!("a{}", action)
    }

    /// Get a human-readable label for an information-set entry.
    fn decision_label(&self, key: InfoKey) -> String {
        format!(
            "r{}/p{}/c{}/i{}",
            key.round, key.player, key.chance, key.index
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfr::sample::SequenceSampler;
    use crate::cfr::tree::TreeBuilder;

    struct Unlabelled;

    impl Game for Unlabelled {
        type Sampler = SequenceSampler;

        fn name(&self) -> &str {
            "unlabelled"
        }

        fn tree(&self) -> Result<GameTree, TreeError> {
            let mut builder = TreeBuilder::new(1, 1);
            let leaf = builder.fixed(vec![0.0]);
            let root = builder.decision(
                DecisionPoint {
                    round: 0,
                    player: 0,
                    index: 0,
                },
                vec![leaf, leaf],
            );
            builder.build(root, vec![vec![1]])
        }

        fn sampler(&self, _seed: u64) -> Result<SequenceSampler, ConfigError> {
            Ok(SequenceSampler::new(vec![ChanceSample::new(1, 1)]))
        }
    }

    #[test]
    fn test_default_labels() {
        let game = Unlabelled;
        let key = InfoKey {
            round: 1,
            player: 0,
            chance: 4,
            index: 2,
        };
        assert_eq!(game.decision_label(key), "r1/p0/c4/i2");
        assert_eq!(game.action_name(key.point(), 1), "a1");
        assert!(game.chance_outcomes().is_none());
        assert_eq!(game.tree().unwrap().decision_count(0, 0), 1);
    }
}
