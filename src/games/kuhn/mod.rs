//! Kuhn Poker implementation for CFR validation.
//!
//! Kuhn Poker is a simplified poker game used to validate CFR implementations
//! because it has a known, mathematically proven Nash equilibrium.
//!
//! ## Game Rules
//!
//! - 3 cards: Jack (0), Queen (1), King (2)
//! - 2 players, each antes 1 chip
//! - Each player receives 1 card (the single chance round)
//! - Player 1 acts first: Pass or Bet (1 chip)
//! - Player 2 responds based on P1's action
//! - Higher card wins at showdown
//!
//! ## Game Tree
//!
//! ```text
//! P1 (round 0, player 0, index 0)
//! ├── Pass
//! │   └── P2 (round 0, player 1, index 0)
//! │       ├── Pass → Showdown (±1)
//! │       └── Bet
//! │           └── P1 (round 0, player 0, index 1)
//! │               ├── Pass → P2 wins 1
//! │               └── Bet → Showdown (±2)
//! └── Bet
//!     └── P2 (round 0, player 1, index 1)
//!         ├── Pass → P1 wins 1
//!         └── Bet → Showdown (±2)
//! ```
//!
//! A player's card is their chance index, so entry `(0, p, card, i)` is the
//! information set "player p holds `card` at decision i".
//!
//! ## Known Nash Equilibrium
//!
//! - **Player 1 with Jack**: Bet with probability α ∈ [0, 1/3]
//! - **Player 1 with Queen**: Always Pass
//! - **Player 1 with King**: Bet with probability 3α
//! - **Player 2 facing Bet with Jack**: Always Fold
//! - **Player 2 facing Bet with Queen**: Call with probability 1/3
//! - **Player 2 facing Bet with King**: Always Call
//!
//! **Expected Value**: Player 1 EV = -1/18 ≈ -0.0556

use std::fmt;

use crate::cfr::error::{ConfigError, TreeError};
use crate::cfr::game::Game;
use crate::cfr::sample::{ChanceSample, DealSampler};
use crate::cfr::storage::InfoKey;
use crate::cfr::tree::{DecisionPoint, GameTree, Payout, TreeBuilder};

/// Number of cards in the deck.
pub const DECK: usize = 3;

/// Actions in Kuhn Poker, by child position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KuhnAction {
    /// Pass (check if no bet, fold if facing bet)
    Pass = 0,
    /// Bet (or call if facing bet)
    Bet = 1,
}

impl KuhnAction {
    /// Action at a child position.
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(KuhnAction::Pass),
            1 => Some(KuhnAction::Bet),
            _ => None,
        }
    }
}

impl fmt::Display for KuhnAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KuhnAction::Pass => write!(f, "Pass"),
            KuhnAction::Bet => write!(f, "Bet"),
        }
    }
}

const fn decision_point(player: usize, index: usize) -> DecisionPoint {
    DecisionPoint {
        round: 0,
        player,
        index,
    }
}

/// Higher card takes `stake` from the other player.
#[derive(Debug, Clone, Copy)]
struct Showdown {
    stake: f64,
}

impl Payout for Showdown {
    fn payout(&self, sample: &ChanceSample, utility: &mut [f64]) {
        let won = if sample.get(0, 0) > sample.get(0, 1) {
            self.stake
        } else {
            -self.stake
        };
        utility[0] = won;
        utility[1] = -won;
    }
}

/// Kuhn Poker game.
#[derive(Debug, Clone, Copy, Default)]
pub struct KuhnPoker;

impl KuhnPoker {
    /// Create a new Kuhn Poker game.
    pub fn new() -> Self {
        Self
    }

    /// Get card name for display.
    pub fn card_name(card: usize) -> &'static str {
        match card {
            0 => "J",
            1 => "Q",
            2 => "K",
            _ => "?",
        }
    }

    /// Public betting history leading to a decision point.
    pub fn history(point: DecisionPoint) -> &'static str {
        match (point.player, point.index) {
            (0, 0) => "",
            (1, 0) => "p",
            (0, 1) => "pb",
            (1, 1) => "b",
            _ => "?",
        }
    }

    /// Decision point reached after a betting history, if any.
    pub fn point(history: &str) -> Option<DecisionPoint> {
        match history {
            "" => Some(decision_point(0, 0)),
            "p" => Some(decision_point(1, 0)),
            "pb" => Some(decision_point(0, 1)),
            "b" => Some(decision_point(1, 1)),
            _ => None,
        }
    }

    /// Entry for a player holding `card` after `history`.
    pub fn key(card: usize, history: &str) -> Option<InfoKey> {
        Self::point(history).map(|point| InfoKey::new(point, card))
    }
}

impl Game for KuhnPoker {
    type Sampler = DealSampler;

    fn name(&self) -> &str {
        "kuhn"
    }

    fn tree(&self) -> Result<GameTree, TreeError> {
        let mut b = TreeBuilder::new(1, 2);
        let showdown_ante = b.chance(Showdown { stake: 1.0 });
        let showdown_bet = b.chance(Showdown { stake: 2.0 });
        let p1_folds = b.fixed(vec![1.0, -1.0]);
        let p0_folds = b.fixed(vec![-1.0, 1.0]);

        let facing_check_raise = b.decision(
            decision_point(0, 1),
            vec![p0_folds, showdown_bet],
        );
        let after_pass = b.decision(
            decision_point(1, 0),
            vec![showdown_ante, facing_check_raise],
        );
        let facing_bet = b.decision(
            decision_point(1, 1),
            vec![p1_folds, showdown_bet],
        );
        let root = b.decision(
            decision_point(0, 0),
            vec![after_pass, facing_bet],
        );
        b.build(root, vec![vec![DECK, DECK]])
    }

    fn sampler(&self, seed: u64) -> Result<DealSampler, ConfigError> {
        DealSampler::new(vec![vec![DECK, DECK]], seed)
    }

    fn chance_outcomes(&self) -> Option<Vec<(ChanceSample, f64)>> {
        let deals = DECK * (DECK - 1);
        let mut outcomes = Vec::with_capacity(deals);
        for first in 0..DECK {
            for second in (0..DECK).filter(|&c| c != first) {
                outcomes.push((
                    ChanceSample::from_rows(&[vec![first, second]]),
                    1.0 / deals as f64,
                ));
            }
        }
        Some(outcomes)
    }

    fn action_name(&self, _point: DecisionPoint, action: usize) -> String {
        KuhnAction::from_index(action).map_or_else(|| action.to_string(), |a| a.to_string())
    }

    fn decision_label(&self, key: InfoKey) -> String {
        format!(
            "{}:{}",
            Self::card_name(key.chance),
            Self::history(key.point())
        )
    }
}
