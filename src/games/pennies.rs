//! Matching pennies as a sequential game with hidden information.
//!
//! Player 1 shows a coin first, player 2 answers without seeing it. Both
//! player 2 nodes share one information set, so the only equilibrium is for
//! both players to mix 50/50 and the game value is 0.
//!
//! There is no chance: every slot has a domain of one outcome.

use crate::cfr::error::{ConfigError, TreeError};
use crate::cfr::game::Game;
use crate::cfr::sample::{ChanceSample, UniformSampler};
use crate::cfr::tree::{DecisionPoint, GameTree, TreeBuilder};

const SHOWS: DecisionPoint = DecisionPoint {
    round: 0,
    player: 0,
    index: 0,
};

const ANSWERS: DecisionPoint = DecisionPoint {
    round: 0,
    player: 1,
    index: 0,
};

/// Matching pennies game.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchingPennies;

impl MatchingPennies {
    /// Create a new matching pennies game.
    pub fn new() -> Self {
        Self
    }
}

impl Game for MatchingPennies {
    type Sampler = UniformSampler;

    fn name(&self) -> &str {
        "pennies"
    }

    fn tree(&self) -> Result<GameTree, TreeError> {
        let mut b = TreeBuilder::new(1, 2);
        let matched = b.fixed(vec![1.0, -1.0]);
        let mismatched = b.fixed(vec![-1.0, 1.0]);
        let after_heads = b.decision(ANSWERS, vec![matched, mismatched]);
        let after_tails = b.decision(ANSWERS, vec![mismatched, matched]);
        let root = b.decision(SHOWS, vec![after_heads, after_tails]);
        b.build(root, vec![vec![1, 1]])
    }

    fn sampler(&self, seed: u64) -> Result<UniformSampler, ConfigError> {
        Ok(UniformSampler::new(vec![vec![1, 1]], seed))
    }

    fn chance_outcomes(&self) -> Option<Vec<(ChanceSample, f64)>> {
        Some(vec![(ChanceSample::new(1, 2), 1.0)])
    }

    fn action_name(&self, _point: DecisionPoint, action: usize) -> String {
        match action {
            0 => "Heads".to_string(),
            1 => "Tails".to_string(),
            n => n.to_string(),
        }
    }
}
