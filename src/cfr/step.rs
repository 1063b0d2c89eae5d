//! One chance-sampled CFR iteration.
//!
//! The walk visits the whole decision tree under one [`ChanceSample`],
//! performs regret matching at every decision node and updates the entries
//! addressed by `(round, player, sample[round][player], index)`. Stored
//! regret is floored at zero on every write (regret-matching+).

use crate::cfr::sample::ChanceSample;
use crate::cfr::storage::{regret_matching, InfoKey, TrainingData};
use crate::cfr::tree::{GameTree, Node, NodeId};

/// Regret-matching tree walk over a fixed game tree.
///
/// Owns every buffer the walk needs, sized once from the tree, so an
/// iteration allocates nothing. Each worker keeps its own step.
#[derive(Debug, Clone)]
pub struct TrainingStep<'a> {
    tree: &'a GameTree,
    reach: Vec<f64>,
    utility: Vec<f64>,
    /// Per-depth frames: strategy, action utilities and child utility.
    scratch: Vec<f64>,
}

impl<'a> TrainingStep<'a> {
    /// Walker for `tree`.
    pub fn new(tree: &'a GameTree) -> Self {
        let players = tree.players();
        Self {
            tree,
            reach: vec![1.0; players],
            utility: vec![0.0; players],
            scratch: vec![0.0; scratch_len(tree)],
        }
    }

    /// Run one iteration with exclusive access to the table.
    ///
    /// Returns the expected utility of the sample under the current strategy
    /// profile, one value per player.
    pub fn run(&mut self, data: &mut TrainingData, sample: &ChanceSample) -> &[f64] {
        // SAFETY: `&mut TrainingData` rules out every other reader and writer.
        unsafe { self.run_shared(data, sample) }
    }

    /// Run one iteration against a table shared with other threads.
    ///
    /// # Safety
    /// While this call runs, no other thread may read or write any entry
    /// whose `(round, player, chance)` triple appears in `sample`. Holding
    /// the sample's reservation from a
    /// [`ChanceSynchronizer`](crate::cfr::ChanceSynchronizer) guarantees this.
    pub unsafe fn run_shared(&mut self, data: &TrainingData, sample: &ChanceSample) -> &[f64] {
        self.reach.fill(1.0);
        walk(
            self.tree,
            data,
            sample,
            self.tree.root(),
            &mut self.reach,
            &mut self.utility,
            &mut self.scratch,
        );
        &self.utility
    }
}

/// Scratch needed by the deepest path: each decision node takes a frame of
/// `2 * actions + players` values. Children precede parents in the arena.
fn scratch_len(tree: &GameTree) -> usize {
    let mut need = vec![0usize; tree.num_nodes()];
    for id in 0..tree.num_nodes() {
        if let Node::Decision(decision) = tree.node(id) {
            let deepest = decision
                .children
                .iter()
                .map(|&child| need[child])
                .max()
                .unwrap_or(0);
            need[id] = 2 * decision.children.len() + tree.players() + deepest;
        }
    }
    need[tree.root()]
}

/// Writes the node's utility into `out`.
unsafe fn walk(
    tree: &GameTree,
    data: &TrainingData,
    sample: &ChanceSample,
    node: NodeId,
    reach: &mut [f64],
    out: &mut [f64],
    scratch: &mut [f64],
) {
    let decision = match tree.node(node) {
        Node::FixedPayout(utility) => return out.copy_from_slice(utility),
        Node::ChancePayout(payout) => return payout.payout(sample, out),
        Node::Decision(decision) => decision,
    };
    let point = decision.point;
    let player = point.player;
    let key = InfoKey::new(point, sample.get(point.round, player));
    let actions = decision.children.len();

    let (strategy, rest) = scratch.split_at_mut(actions);
    let (action_utility, rest) = rest.split_at_mut(actions);
    let (child_utility, rest) = rest.split_at_mut(out.len());
    {
        let entry = data.entry_mut(key);
        regret_matching(entry.regret, strategy);
        for (sum, &p) in entry.strategy_sum.iter_mut().zip(strategy.iter()) {
            *sum += reach[player] * p;
        }
    }

    out.fill(0.0);
    for (a, &child) in decision.children.iter().enumerate() {
        let saved = reach[player];
        reach[player] = saved * strategy[a];
        walk(tree, data, sample, child, reach, child_utility, rest);
        reach[player] = saved;

        for (total, &u) in out.iter_mut().zip(child_utility.iter()) {
            *total += strategy[a] * u;
        }
        action_utility[a] = child_utility[player];
    }

    let counterfactual: f64 = reach
        .iter()
        .enumerate()
        .filter(|&(q, _)| q != player)
        .map(|(_, &r)| r)
        .product();
    let entry = data.entry_mut(key);
    for (regret, &u) in entry.regret.iter_mut().zip(action_utility.iter()) {
        *regret = (*regret + counterfactual * (u - out[player])).max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfr::sample::{ChanceSampler, DealSampler};
    use crate::cfr::tree::{DecisionPoint, TreeBuilder};
    use crate::games::kuhn::KuhnPoker;
    use crate::games::pennies::MatchingPennies;
    use crate::cfr::game::Game;

    #[test]
    fn test_fixed_payout_root() {
        let mut builder = TreeBuilder::new(1, 2);
        let root = builder.fixed(vec![2.0, -2.0]);
        let tree = builder.build(root, vec![vec![1, 1]]).unwrap();
        let mut data = TrainingData::new(&tree);
        let mut step = TrainingStep::new(&tree);
        let sample = ChanceSample::new(1, 2);
        assert_eq!(step.run(&mut data, &sample), &[2.0, -2.0]);
        assert_eq!(data.num_entries(), 0);
    }

    #[test]
    fn test_single_decision_update() {
        // Player 0 picks between +1 and -1 with the opponent at full reach.
        let mut builder = TreeBuilder::new(1, 2);
        let good = builder.fixed(vec![1.0, -1.0]);
        let bad = builder.fixed(vec![-1.0, 1.0]);
        let root = builder.decision(DecisionPoint { round: 0, player: 0, index: 0 }, vec![good, bad]);
        let tree = builder.build(root, vec![vec![2, 1]]).unwrap();
        let mut data = TrainingData::new(&tree);
        let mut step = TrainingStep::new(&tree);
        let sample = ChanceSample::from_rows(&[vec![1, 0]]);

        // Uniform first: node utility is 0, regrets +1 and -1 (floored).
        assert_eq!(step.run(&mut data, &sample), &[0.0, 0.0]);
        let key = InfoKey { round: 0, player: 0, chance: 1, index: 0 };
        assert_eq!(data.entry(key).regret, &[1.0, 0.0]);
        assert_eq!(data.entry(key).strategy_sum, &[0.5, 0.5]);

        // Now pure on the good action.
        assert_eq!(step.run(&mut data, &sample), &[1.0, -1.0]);
        assert_eq!(data.entry(key).regret, &[1.0, 0.0]);
        assert_eq!(data.entry(key).strategy_sum, &[1.5, 0.5]);

        // The other chance index was never touched.
        let untouched = InfoKey { chance: 0, ..key };
        assert_eq!(data.entry(untouched).strategy_sum, &[0.0, 0.0]);
    }

    #[test]
    fn test_regrets_never_negative() {
        let game = KuhnPoker::new();
        let tree = game.tree().unwrap();
        let mut data = TrainingData::new(&tree);
        let mut step = TrainingStep::new(&tree);
        let mut sampler = game.sampler(3).unwrap();
        for _ in 0..2_000 {
            let sample = sampler.produce();
            step.run(&mut data, &sample);
            sampler.recycle(sample);
        }
        assert!(data.values().iter().all(|v| v.is_finite()));
        for key in data.keys().collect::<Vec<_>>() {
            let entry = data.entry(key);
            assert!(entry.regret.iter().all(|&r| r >= 0.0), "{:?} has negative regret", key);
            if entry.weight() > 0.0 {
                let total: f64 = entry.average_strategy().iter().sum();
                assert!((total - 1.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_fixed_sequence_is_reproducible() {
        let game = KuhnPoker::new();
        let tree = game.tree().unwrap();
        let mut sampler = DealSampler::new(tree.chance_sizes().to_vec(), 17).unwrap();
        let samples: Vec<ChanceSample> = (0..3_000).map(|_| sampler.produce()).collect();

        let train = || {
            let mut data = TrainingData::new(&tree);
            let mut step = TrainingStep::new(&tree);
            for sample in &samples {
                let utility = step.run(&mut data, sample);
                data.record(utility);
            }
            data.save()
        };
        assert_eq!(train(), train());
    }

    #[test]
    fn test_matching_pennies_converges_to_uniform() {
        let game = MatchingPennies::new();
        let tree = game.tree().unwrap();
        let mut data = TrainingData::new(&tree);
        let mut step = TrainingStep::new(&tree);
        let sample = ChanceSample::new(1, 2);
        for _ in 0..1_000 {
            let utility = step.run(&mut data, &sample);
            data.record(utility);
        }
        for player in 0..2 {
            let key = InfoKey { round: 0, player, chance: 0, index: 0 };
            let strategy = data.average_strategy(key);
            assert!(
                (strategy[0] - 0.5).abs() < 0.05,
                "player {} average strategy {:?} is not near uniform",
                player,
                strategy
            );
        }
    }

    #[test]
    fn test_deep_chain_fits_scratch() {
        // Player 0 keeps choosing between stopping for `depth` and going on.
        let depth = 40;
        let mut builder = TreeBuilder::new(1, 1);
        let mut node = builder.fixed(vec![depth as f64]);
        for index in (0..depth).rev() {
            let stop = builder.fixed(vec![index as f64]);
            node = builder.decision(DecisionPoint { round: 0, player: 0, index }, vec![stop, node]);
        }
        let tree = builder.build(node, vec![vec![1]]).unwrap();
        let mut step = TrainingStep::new(&tree);
        assert_eq!(step.scratch.len(), depth * (2 * 2 + 1));

        let mut data = TrainingData::new(&tree);
        let sample = ChanceSample::new(1, 1);
        for _ in 0..200 {
            let utility = step.run(&mut data, &sample)[0];
            data.record(&[utility]);
        }
        // Going on always pays more, so every point learns to continue.
        let utility = step.run(&mut data, &sample)[0];
        assert!(utility > depth as f64 - 1.0, "utility {}", utility);
    }
}
