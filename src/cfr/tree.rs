//! Arena game tree consumed by the training engine.
//!
//! Nodes live in one `Vec` and refer to their children by index, so shared
//! subtrees (imperfect-recall merges, simultaneous-move information sets)
//! are plain DAG edges. An information set is identified structurally by
//! `(round, player, index)`, never by node position.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::cfr::error::{ConfigError, TreeError};
use crate::cfr::sample::{ChanceSample, ChanceSampler};

/// Position of a node in the arena.
pub type NodeId = usize;

/// Terminal utility that depends on nature's draw.
///
/// Called concurrently from every worker with distinct samples, so it must
/// be a pure function of its input.
pub trait Payout: Send + Sync {
    /// Write the utility of every player into `utility`, one slot per player.
    fn payout(&self, sample: &ChanceSample, utility: &mut [f64]);
}

/// Closures returning a fresh vector; convenient for tests and small games.
impl<F> Payout for F
where
    F: Fn(&ChanceSample) -> Vec<f64> + Send + Sync,
{
    fn payout(&self, sample: &ChanceSample, utility: &mut [f64]) {
        utility.copy_from_slice(&self(sample));
    }
}

/// Address of a decision point: a (round, player) bucket and a dense index in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DecisionPoint {
    /// Betting round.
    pub round: usize,
    /// Acting player.
    pub player: usize,
    /// Dense index within the (round, player) bucket.
    pub index: usize,
}

/// A player's choice among the node's children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Information-set address.
    pub point: DecisionPoint,
    /// One child per action.
    pub children: Vec<NodeId>,
}

/// A node of the game tree.
#[derive(Clone)]
pub enum Node {
    /// A player chooses among actions.
    Decision(Decision),
    /// Terminal with a constant utility vector.
    FixedPayout(Vec<f64>),
    /// Terminal whose utility is a function of the chance sample.
    ChancePayout(Arc<dyn Payout>),
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Decision(d) => f.debug_tuple("Decision").field(d).finish(),
            Node::FixedPayout(u) => f.debug_tuple("FixedPayout").field(u).finish(),
            Node::ChancePayout(_) => f.write_str("ChancePayout"),
        }
    }
}

/// Validated, immutable decision tree.
#[derive(Debug, Clone)]
pub struct GameTree {
    nodes: Vec<Node>,
    root: NodeId,
    rounds: usize,
    players: usize,
    chance_sizes: Vec<Vec<usize>>,
    /// `actions[round][player][index]` = action count of that decision point.
    actions: Vec<Vec<Vec<usize>>>,
}

impl GameTree {
    /// The root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Node by arena position.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Number of arena nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of rounds.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Number of players.
    pub fn players(&self) -> usize {
        self.players
    }

    /// Chance domain size of a (round, player) bucket.
    pub fn chance_size(&self, round: usize, player: usize) -> usize {
        self.chance_sizes[round][player]
    }

    /// Full chance domain table.
    pub fn chance_sizes(&self) -> &[Vec<usize>] {
        &self.chance_sizes
    }

    /// Number of decision points in a (round, player) bucket.
    pub fn decision_count(&self, round: usize, player: usize) -> usize {
        self.actions[round][player].len()
    }

    /// Action counts of a bucket, by dense index.
    pub fn bucket_actions(&self, round: usize, player: usize) -> &[usize] {
        &self.actions[round][player]
    }

    /// Action count of a decision point.
    pub fn actions(&self, point: DecisionPoint) -> usize {
        self.actions[point.round][point.player][point.index]
    }

    /// Every decision point in canonical (round, player, index) order.
    pub fn points(&self) -> impl Iterator<Item = DecisionPoint> + '_ {
        self.actions.iter().enumerate().flat_map(|(round, row)| {
            row.iter().enumerate().flat_map(move |(player, bucket)| {
                (0..bucket.len()).map(move |index| DecisionPoint {
                    round,
                    player,
                    index,
                })
            })
        })
    }

    /// Whether `sample` has the tree's shape and every chance index lies
    /// inside its slot's domain.
    pub fn admits(&self, sample: &ChanceSample) -> bool {
        sample.rounds() == self.rounds
            && sample.players() == self.players
            && sample
                .triples()
                .all(|(round, player, chance)| chance < self.chance_sizes[round][player])
    }

    /// [`admits`](Self::admits) as a `Result`.
    pub fn check_sample(&self, sample: &ChanceSample) -> Result<(), ConfigError> {
        if self.admits(sample) {
            Ok(())
        } else {
            Err(ConfigError::SampleOutOfDomain {
                sample: sample.as_slice().to_vec(),
                domains: self.chance_sizes.clone(),
            })
        }
    }

    /// Reject a sampler whose draws may fall outside the chance domains.
    ///
    /// Samplers that report their domain are compared against the tree's;
    /// others have one sample drawn, checked and recycled.
    pub fn check_sampler<S: ChanceSampler + ?Sized>(&self, sampler: &mut S) -> Result<(), ConfigError> {
        if let Some(domain) = sampler.domain() {
            if domain != self.chance_sizes.as_slice() {
                return Err(ConfigError::DomainMismatch {
                    sampler: domain.to_vec(),
                    tree: self.chance_sizes.clone(),
                });
            }
            return Ok(());
        }
        let sample = sampler.produce();
        let checked = self.check_sample(&sample);
        sampler.recycle(sample);
        checked
    }
}

/// Bottom-up builder: children are pushed before the nodes that point at them.
///
/// # Example
/// ```
/// use chance_cfr::cfr::{DecisionPoint, TreeBuilder};
///
/// let mut builder = TreeBuilder::new(1, 2);
/// let win = builder.fixed(vec![1.0, -1.0]);
/// let lose = builder.fixed(vec![-1.0, 1.0]);
/// let root = builder.decision(DecisionPoint { round: 0, player: 0, index: 0 }, vec![win, lose]);
/// let tree = builder.build(root, vec![vec![1, 1]]).unwrap();
/// assert_eq!(tree.decision_count(0, 0), 1);
/// ```
#[derive(Debug, Default)]
pub struct TreeBuilder {
    nodes: Vec<Node>,
    rounds: usize,
    players: usize,
}

impl TreeBuilder {
    /// Builder for a game with the given shape.
    pub fn new(rounds: usize, players: usize) -> Self {
        Self {
            nodes: Vec::new(),
            rounds,
            players,
        }
    }

    /// Push a node and return its id.
    pub fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Push a decision node.
    pub fn decision(&mut self, point: DecisionPoint, children: Vec<NodeId>) -> NodeId {
        self.push(Node::Decision(Decision { point, children }))
    }

    /// Push a constant terminal.
    pub fn fixed(&mut self, utility: Vec<f64>) -> NodeId {
        self.push(Node::FixedPayout(utility))
    }

    /// Push a sample-dependent terminal.
    pub fn chance(&mut self, payout: impl Payout + 'static) -> NodeId {
        self.push(Node::ChancePayout(Arc::new(payout)))
    }

    /// Validate and freeze the tree.
    pub fn build(self, root: NodeId, chance_sizes: Vec<Vec<usize>>) -> Result<GameTree, TreeError> {
        let Self {
            nodes,
            rounds,
            players,
        } = self;
        if nodes.is_empty() {
            return Err(TreeError::Empty);
        }
        if rounds == 0 || players == 0 {
            return Err(TreeError::NoPlayers);
        }
        if root >= nodes.len() {
            return Err(TreeError::DanglingChild {
                node: root,
                child: root,
            });
        }
        if chance_sizes.len() != rounds || chance_sizes.iter().any(|row| row.len() != players) {
            return Err(TreeError::ChanceShape {
                rounds: chance_sizes.len(),
                players: chance_sizes
                    .iter()
                    .map(Vec::len)
                    .find(|&len| len != players)
                    .unwrap_or(players),
                expected_rounds: rounds,
                expected_players: players,
            });
        }

        let mut seen: FxHashMap<DecisionPoint, usize> = FxHashMap::default();
        for (id, node) in nodes.iter().enumerate() {
            match node {
                Node::Decision(decision) => {
                    let point = decision.point;
                    if point.round >= rounds || point.player >= players {
                        return Err(TreeError::OutOfRange {
                            node: id,
                            round: point.round,
                            player: point.player,
                        });
                    }
                    if decision.children.is_empty() {
                        return Err(TreeError::NoActions(id));
                    }
                    for &child in &decision.children {
                        if child >= nodes.len() {
                            return Err(TreeError::DanglingChild { node: id, child });
                        }
                        if child >= id {
                            return Err(TreeError::ForwardChild { node: id, child });
                        }
                    }
                    let count = decision.children.len();
                    if *seen.entry(point).or_insert(count) != count {
                        return Err(TreeError::ConflictingActions {
                            round: point.round,
                            player: point.player,
                            index: point.index,
                        });
                    }
                }
                Node::FixedPayout(utility) => {
                    if utility.len() != players {
                        return Err(TreeError::PayoutLength {
                            node: id,
                            len: utility.len(),
                            players,
                        });
                    }
                }
                Node::ChancePayout(_) => {}
            }
        }

        let mut actions = vec![vec![Vec::new(); players]; rounds];
        for (point, count) in &seen {
            let bucket: &mut Vec<usize> = &mut actions[point.round][point.player];
            if bucket.len() <= point.index {
                bucket.resize(point.index + 1, 0);
            }
            bucket[point.index] = *count;
        }
        for (round, row) in actions.iter().enumerate() {
            for (player, bucket) in row.iter().enumerate() {
                if let Some(index) = bucket.iter().position(|&count| count == 0) {
                    return Err(TreeError::SparseIndex {
                        round,
                        player,
                        index,
                    });
                }
                if !bucket.is_empty() && chance_sizes[round][player] == 0 {
                    return Err(TreeError::EmptyChanceDomain { round, player });
                }
            }
        }

        Ok(GameTree {
            nodes,
            root,
            rounds,
            players,
            chance_sizes,
            actions,
        })
    }
}
