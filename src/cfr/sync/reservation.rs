//! Set of reserved `(round, player, chance)` triples.

use crate::cfr::sample::ChanceSample;
use crate::cfr::tree::GameTree;

/// Flat bitmap of reserved triples.
///
/// Only buckets that own decision points are tracked: a triple of a bucket
/// without entries addresses no storage, so it can never cause a conflict.
#[derive(Debug, Clone)]
pub struct ReservationSet {
    rounds: usize,
    players: usize,
    /// Per (round, player) bucket: chance domain size.
    sizes: Vec<usize>,
    /// Per (round, player) bucket: first flag slot, or `None` if untracked.
    bases: Vec<Option<usize>>,
    flags: Vec<bool>,
    reserved: usize,
}

impl ReservationSet {
    /// Empty set shaped after the tree's chance domains.
    pub fn new(tree: &GameTree) -> Self {
        let mut bases = Vec::with_capacity(tree.rounds() * tree.players());
        let mut sizes = Vec::with_capacity(tree.rounds() * tree.players());
        let mut len = 0;
        for round in 0..tree.rounds() {
            for player in 0..tree.players() {
                sizes.push(tree.chance_size(round, player));
                if tree.decision_count(round, player) == 0 {
                    bases.push(None);
                } else {
                    bases.push(Some(len));
                    len += tree.chance_size(round, player);
                }
            }
        }
        Self {
            rounds: tree.rounds(),
            players: tree.players(),
            sizes,
            bases,
            flags: vec![false; len],
            reserved: 0,
        }
    }

    /// Whether `sample` has the tracked shape and every chance index lies
    /// inside its slot's domain.
    pub fn admits(&self, sample: &ChanceSample) -> bool {
        sample.rounds() == self.rounds
            && sample.players() == self.players
            && sample
                .triples()
                .all(|(round, player, chance)| chance < self.sizes[round * self.players + player])
    }

    /// Flag slot of a triple, or `None` for untracked buckets.
    ///
    /// # Panics
    /// Panics if `chance` lies outside the bucket's domain.
    #[inline]
    fn slot(&self, round: usize, player: usize, chance: usize) -> Option<usize> {
        let bucket = round * self.players + player;
        assert!(
            chance < self.sizes[bucket],
            "chance index {} outside the domain of round {} player {}",
            chance,
            round,
            player
        );
        self.bases[bucket].map(|base| base + chance)
    }

    /// Every flag slot of `sample`, resolved before anything is touched.
    fn slots(&self, sample: &ChanceSample) -> Vec<usize> {
        sample
            .triples()
            .filter_map(|(round, player, chance)| self.slot(round, player, chance))
            .collect()
    }

    /// Whether any triple of `sample` is already reserved.
    pub fn collides(&self, sample: &ChanceSample) -> bool {
        self.slots(sample).into_iter().any(|slot| self.flags[slot])
    }

    /// Reserve every triple of `sample`; the caller has checked [`collides`](Self::collides).
    ///
    /// Either every triple is reserved or, on panic, none is.
    pub fn reserve(&mut self, sample: &ChanceSample) {
        let slots = self.slots(sample);
        debug_assert!(
            slots.iter().all(|&slot| !self.flags[slot]),
            "triple reserved twice"
        );
        for slot in slots {
            self.flags[slot] = true;
            self.reserved += 1;
        }
    }

    /// Drop the reservation of every triple of `sample`.
    pub fn clear(&mut self, sample: &ChanceSample) {
        for slot in self.slots(sample) {
            if std::mem::replace(&mut self.flags[slot], false) {
                self.reserved -= 1;
            }
        }
    }

    /// Whether a single triple is reserved.
    pub fn contains(&self, round: usize, player: usize, chance: usize) -> bool {
        self.slot(round, player, chance)
            .map_or(false, |slot| self.flags[slot])
    }

    /// Number of reserved triples.
    pub fn len(&self) -> usize {
        self.reserved
    }

    /// True when nothing is reserved.
    pub fn is_empty(&self) -> bool {
        self.reserved == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfr::tree::{DecisionPoint, TreeBuilder};

    /// Two rounds, two players; player 1 never acts in round 1.
    fn tree() -> GameTree {
        let mut builder = TreeBuilder::new(2, 2);
        let leaf = builder.fixed(vec![0.0, 0.0]);
        let late = builder.decision(DecisionPoint { round: 1, player: 0, index: 0 }, vec![leaf, leaf]);
        let reply = builder.decision(DecisionPoint { round: 0, player: 1, index: 0 }, vec![late, leaf]);
        let root = builder.decision(DecisionPoint { round: 0, player: 0, index: 0 }, vec![reply, leaf]);
        builder.build(root, vec![vec![3, 3], vec![5, 5]]).unwrap()
    }

    #[test]
    fn test_reserve_and_clear() {
        let mut set = ReservationSet::new(&tree());
        let first = ChanceSample::from_rows(&[vec![0, 1], vec![2, 4]]);
        assert!(!set.collides(&first));
        set.reserve(&first);
        // (1, 1, 4) belongs to a bucket without decisions.
        assert_eq!(set.len(), 3);
        assert!(set.contains(0, 1, 1));
        assert!(!set.contains(1, 1, 4));

        let shares_round_one = ChanceSample::from_rows(&[vec![1, 2], vec![2, 0]]);
        assert!(set.collides(&shares_round_one));

        let disjoint = ChanceSample::from_rows(&[vec![2, 0], vec![3, 4]]);
        assert!(!set.collides(&disjoint));

        set.clear(&first);
        assert!(set.is_empty());
        assert!(!set.collides(&shares_round_one));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut set = ReservationSet::new(&tree());
        let sample = ChanceSample::from_rows(&[vec![2, 2], vec![1, 1]]);
        set.reserve(&sample);
        set.clear(&sample);
        set.clear(&sample);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_out_of_domain_sample_reserves_nothing() {
        let mut set = ReservationSet::new(&tree());
        // Round 1 player 0 only has 5 outcomes.
        let wide = ChanceSample::from_rows(&[vec![0, 1], vec![5, 0]]);
        assert!(!set.admits(&wide));
        assert!(!set.admits(&ChanceSample::from_rows(&[vec![0, 1]])));

        let attempt = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| set.reserve(&wide)));
        assert!(attempt.is_err());
        assert!(set.is_empty());
        assert!(!set.contains(0, 0, 0));

        // An index that would alias the next bucket's flags is refused too.
        let aliasing = ChanceSample::from_rows(&[vec![3, 0], vec![0, 0]]);
        assert!(!set.admits(&aliasing));
        assert!(std::panic::catch_unwind(|| set.collides(&aliasing)).is_err());
    }
}
