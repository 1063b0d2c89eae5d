//! Evaluation of trained average strategies.

use crate::cfr::sample::ChanceSample;
use crate::cfr::storage::{InfoKey, TrainingData};
use crate::cfr::tree::{GameTree, Node, NodeId};

/// Expected utility of every player when all of them follow their average
/// strategy, for one fixed chance sample.
pub fn expected_utility(tree: &GameTree, data: &TrainingData, sample: &ChanceSample) -> Vec<f64> {
    walk(tree, data, sample, tree.root())
}

/// Probability-weighted expected utility over an enumerated chance model.
pub fn expected_value(
    tree: &GameTree,
    data: &TrainingData,
    outcomes: &[(ChanceSample, f64)],
) -> Vec<f64> {
    let mut value = vec![0.0; tree.players()];
    for (sample, probability) in outcomes {
        let utility = expected_utility(tree, data, sample);
        for (v, u) in value.iter_mut().zip(utility) {
            *v += probability * u;
        }
    }
    value
}

fn walk(tree: &GameTree, data: &TrainingData, sample: &ChanceSample, node: NodeId) -> Vec<f64> {
    match tree.node(node) {
        Node::FixedPayout(utility) => utility.clone(),
        Node::ChancePayout(payout) => {
            let mut utility = vec![0.0; tree.players()];
            payout.payout(sample, &mut utility);
            utility
        }
        Node::Decision(decision) => {
            let point = decision.point;
            let key = InfoKey::new(point, sample.get(point.round, point.player));
            let strategy = data.average_strategy(key);
            let mut value = vec![0.0; tree.players()];
            for (&child, &p) in decision.children.iter().zip(&strategy) {
                if p == 0.0 {
                    continue;
                }
                for (v, u) in value.iter_mut().zip(walk(tree, data, sample, child)) {
                    *v += p * u;
                }
            }
            value
        }
    }
}
