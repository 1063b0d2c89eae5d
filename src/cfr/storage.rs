//! Storage for CFR regrets and strategies.
//!
//! Every information-set entry is allocated once, when [`TrainingData`] is
//! built from a [`GameTree`], inside one flat arena of `f64`s laid out in
//! canonical `(round, player, chance, index)` order. Entry `(r, p, c, i)`
//! occupies `A` regrets followed by `A` strategy sums.
//!
//! The arena is written without locks. Workers only ever touch entries whose
//! `(round, player, chance)` triple they hold a reservation for, so two
//! threads never alias the same values; see
//! [`TrainingStep::run_shared`](crate::cfr::TrainingStep::run_shared).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;
use serde::Serialize;

use crate::cfr::tree::{DecisionPoint, GameTree};

/// Full address of an information-set entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct InfoKey {
    /// Betting round.
    pub round: usize,
    /// Acting player.
    pub player: usize,
    /// Chance index drawn for this player in this round.
    pub chance: usize,
    /// Dense decision index.
    pub index: usize,
}

impl InfoKey {
    /// Key for a decision point under a given chance index.
    pub fn new(point: DecisionPoint, chance: usize) -> Self {
        Self {
            round: point.round,
            player: point.player,
            chance,
            index: point.index,
        }
    }

    /// The decision point part of the key.
    pub fn point(&self) -> DecisionPoint {
        DecisionPoint {
            round: self.round,
            player: self.player,
            index: self.index,
        }
    }
}

/// Read view of one information-set entry.
#[derive(Debug, Clone, Copy)]
pub struct InfoSetEntry<'a> {
    /// Cumulative (floored) regret per action.
    pub regret: &'a [f64],
    /// Cumulative reach-weighted strategy per action.
    pub strategy_sum: &'a [f64],
}

impl InfoSetEntry<'_> {
    /// Number of actions.
    pub fn actions(&self) -> usize {
        self.regret.len()
    }

    /// Strategy from regret matching on the current regrets.
    pub fn current_strategy(&self) -> Vec<f64> {
        let mut strategy = vec![0.0; self.actions()];
        regret_matching(self.regret, &mut strategy);
        strategy
    }

    /// Time-averaged strategy; uniform if the entry was never reached.
    pub fn average_strategy(&self) -> Vec<f64> {
        let mut strategy = vec![0.0; self.actions()];
        normalize(self.strategy_sum, &mut strategy);
        strategy
    }

    /// Total accumulated strategy weight; zero for unvisited entries.
    pub fn weight(&self) -> f64 {
        self.strategy_sum.iter().sum()
    }
}

/// Mutable view of one entry, handed out only to the training step.
pub(crate) struct InfoSetEntryMut<'a> {
    pub regret: &'a mut [f64],
    pub strategy_sum: &'a mut [f64],
}

/// Regret matching: strategy proportional to positive regret, uniform when
/// there is none (or the sum is not a usable positive number).
#[inline]
pub(crate) fn regret_matching(regret: &[f64], out: &mut [f64]) {
    let mut sum = 0.0;
    for (o, &r) in out.iter_mut().zip(regret) {
        *o = r.max(0.0);
        sum += *o;
    }
    if sum > 0.0 && sum.is_finite() {
        out.iter_mut().for_each(|o| *o /= sum);
    } else {
        let uniform = 1.0 / out.len() as f64;
        out.iter_mut().for_each(|o| *o = uniform);
    }
}

#[inline]
fn normalize(weights: &[f64], out: &mut [f64]) {
    let total: f64 = weights.iter().sum();
    if total > 0.0 && total.is_finite() {
        for (o, &w) in out.iter_mut().zip(weights) {
            *o = w / total;
        }
    } else {
        let uniform = 1.0 / out.len() as f64;
        out.iter_mut().for_each(|o| *o = uniform);
    }
}

/// Layout of one (round, player) bucket inside the arena.
#[derive(Debug, Clone)]
struct Bucket {
    /// First arena slot of the bucket.
    base: usize,
    /// Chance domain size.
    chances: usize,
    /// Values per chance index (sum of `2 * A` over decisions).
    stride: usize,
    /// Offset of each decision inside a chance block.
    offsets: Vec<usize>,
    /// Action count of each decision.
    actions: Vec<usize>,
}

impl Bucket {
    fn len(&self) -> usize {
        self.chances * self.stride
    }
}

/// Aggregate counters, readable while workers run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Completed training iterations.
    pub iterations: u64,
    /// Sum of sampled utility per player.
    pub utility_sums: Vec<f64>,
}

impl Snapshot {
    /// Mean sampled utility per player.
    pub fn average_utility(&self) -> Vec<f64> {
        if self.iterations == 0 {
            return vec![0.0; self.utility_sums.len()];
        }
        self.utility_sums
            .iter()
            .map(|u| u / self.iterations as f64)
            .collect()
    }
}

/// The full information-set table plus run-wide aggregates.
pub struct TrainingData {
    rounds: usize,
    players: usize,
    buckets: Vec<Bucket>,
    entries: usize,
    values: Box<[UnsafeCell<f64>]>,
    iterations: AtomicU64,
    utility: Box<[AtomicU64]>,
}

// SAFETY: the aggregates are atomics. Arena values are only written through
// `entry_mut`, whose contract requires the caller to hold exclusive access to
// the addressed (round, player, chance) triple; readers go through `&self`
// methods that callers must not run concurrently with writers (the scheduler
// refuses to hand out the table while workers are live).
unsafe impl Sync for TrainingData {}

impl std::fmt::Debug for TrainingData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingData")
            .field("rounds", &self.rounds)
            .field("players", &self.players)
            .field("entries", &self.entries)
            .field("values", &self.values.len())
            .field("iterations", &self.iterations())
            .finish()
    }
}

impl TrainingData {
    /// Allocate zeroed entries for every decision point and chance index of the tree.
    pub fn new(tree: &GameTree) -> Self {
        let mut buckets = Vec::with_capacity(tree.rounds() * tree.players());
        let mut base = 0;
        let mut entries = 0;
        for round in 0..tree.rounds() {
            for player in 0..tree.players() {
                let actions = tree.bucket_actions(round, player).to_vec();
                let mut offsets = Vec::with_capacity(actions.len());
                let mut stride = 0;
                for &count in &actions {
                    offsets.push(stride);
                    stride += 2 * count;
                }
                let chances = if actions.is_empty() {
                    0
                } else {
                    tree.chance_size(round, player)
                };
                let bucket = Bucket {
                    base,
                    chances,
                    stride,
                    offsets,
                    actions,
                };
                base += bucket.len();
                entries += bucket.chances * bucket.actions.len();
                buckets.push(bucket);
            }
        }
        let values = (0..base).map(|_| UnsafeCell::new(0.0)).collect();
        let utility = (0..tree.players())
            .map(|_| AtomicU64::new(0f64.to_bits()))
            .collect();
        Self {
            rounds: tree.rounds(),
            players: tree.players(),
            buckets,
            entries,
            values,
            iterations: AtomicU64::new(0),
            utility,
        }
    }

    /// Number of rounds.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Number of players.
    pub fn players(&self) -> usize {
        self.players
    }

    /// Number of information-set entries.
    pub fn num_entries(&self) -> usize {
        self.entries
    }

    /// Number of `f64` slots in the arena.
    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    /// Completed iterations.
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    /// Iteration counter and utility sums.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            iterations: self.iterations(),
            utility_sums: self
                .utility
                .iter()
                .map(|u| f64::from_bits(u.load(Ordering::Relaxed)))
                .collect(),
        }
    }

    /// Account for one finished iteration: add its utility and bump the counter.
    pub fn record(&self, utility: &[f64]) {
        for (slot, &value) in self.utility.iter().zip(utility) {
            let _ = slot.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });
        }
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn bucket(&self, round: usize, player: usize) -> &Bucket {
        &self.buckets[round * self.players + player]
    }

    /// Arena offset and action count of an entry.
    ///
    /// Bounds are checked unconditionally: the offset feeds raw-pointer access.
    #[inline]
    fn locate(&self, key: InfoKey) -> (usize, usize) {
        assert!(
            key.round < self.rounds && key.player < self.players,
            "entry {:?} outside the table",
            key
        );
        let bucket = self.bucket(key.round, key.player);
        assert!(
            key.chance < bucket.chances && key.index < bucket.actions.len(),
            "entry {:?} outside the table",
            key
        );
        let offset = bucket.base + key.chance * bucket.stride + bucket.offsets[key.index];
        (offset, bucket.actions[key.index])
    }

    #[inline]
    fn base_ptr(&self) -> *mut f64 {
        UnsafeCell::raw_get(self.values.as_ptr())
    }

    /// Read view of an entry.
    ///
    /// # Panics
    /// Panics if the key lies outside the table.
    pub fn entry(&self, key: InfoKey) -> InfoSetEntry<'_> {
        let (offset, actions) = self.locate(key);
        // SAFETY: `locate` bounds-checked the range; no writer runs while a
        // `&TrainingData` is used for reading (see the `Sync` impl).
        unsafe {
            let base = self.base_ptr().add(offset);
            InfoSetEntry {
                regret: std::slice::from_raw_parts(base, actions),
                strategy_sum: std::slice::from_raw_parts(base.add(actions), actions),
            }
        }
    }

    /// One read view per chance index of a decision point.
    pub fn entries(&self, point: DecisionPoint) -> impl Iterator<Item = InfoSetEntry<'_>> + '_ {
        let chances = self.bucket(point.round, point.player).chances;
        (0..chances).map(move |chance| self.entry(InfoKey::new(point, chance)))
    }

    /// Mutable view of an entry.
    ///
    /// # Safety
    /// For the lifetime of the returned view no other reference to the same
    /// entry may exist, on this thread or any other. Holding the reservation
    /// of `(key.round, key.player, key.chance)` and not keeping an earlier
    /// view of the same key alive is sufficient.
    #[inline]
    pub(crate) unsafe fn entry_mut(&self, key: InfoKey) -> InfoSetEntryMut<'_> {
        let (offset, actions) = self.locate(key);
        let base = self.base_ptr().add(offset);
        InfoSetEntryMut {
            regret: std::slice::from_raw_parts_mut(base, actions),
            strategy_sum: std::slice::from_raw_parts_mut(base.add(actions), actions),
        }
    }

    /// Average strategy of an entry.
    pub fn average_strategy(&self, key: InfoKey) -> Vec<f64> {
        self.entry(key).average_strategy()
    }

    /// Regret-matching strategy of an entry.
    pub fn current_strategy(&self, key: InfoKey) -> Vec<f64> {
        self.entry(key).current_strategy()
    }

    /// Every entry key in canonical (round, player, chance, index) order.
    pub fn keys(&self) -> impl Iterator<Item = InfoKey> + '_ {
        self.buckets.iter().enumerate().flat_map(move |(slot, bucket)| {
            let round = slot / self.players;
            let player = slot % self.players;
            (0..bucket.chances).flat_map(move |chance| {
                (0..bucket.actions.len()).map(move |index| InfoKey {
                    round,
                    player,
                    chance,
                    index,
                })
            })
        })
    }

    /// Whole arena in canonical order.
    pub(crate) fn values(&self) -> &[f64] {
        // SAFETY: UnsafeCell<f64> has the layout of f64; no concurrent writer
        // while reading through `&self` (see the `Sync` impl).
        unsafe { std::slice::from_raw_parts(self.base_ptr(), self.values.len()) }
    }

    /// Replace the counters and arena; lengths are checked by the caller.
    pub(crate) fn restore(&mut self, iterations: u64, utility: &[f64], values: &[f64]) {
        debug_assert_eq!(utility.len(), self.players);
        debug_assert_eq!(values.len(), self.values.len());
        *self.iterations.get_mut() = iterations;
        for (slot, &u) in self.utility.iter_mut().zip(utility) {
            *slot.get_mut() = u.to_bits();
        }
        for (cell, &v) in self.values.iter_mut().zip(values) {
            *cell.get_mut() = v;
        }
    }

    /// Zero every accumulator and counter.
    pub fn reset(&mut self) {
        *self.iterations.get_mut() = 0;
        self.utility
            .iter_mut()
            .for_each(|u| *u.get_mut() = 0f64.to_bits());
        self.values.iter_mut().for_each(|v| *v.get_mut() = 0.0);
    }

    /// Take a snapshot of all current average strategies.
    ///
    /// Buckets are processed in parallel; the result is laid out like the
    /// arena's strategy sums, one probability per action per entry.
    pub fn strategy_snapshot(&self) -> StrategySnapshot {
        let values = self.values();
        let per_bucket: Vec<(Vec<f64>, Vec<f64>)> = self
            .buckets
            .par_iter()
            .map(|bucket| {
                let mut strategies: Vec<f64> = Vec::new();
                let mut totals: Vec<f64> = Vec::new();
                for chance in 0..bucket.chances {
                    for (offset, &actions) in bucket.offsets.iter().zip(&bucket.actions) {
                        let start = bucket.base + chance * bucket.stride + offset + actions;
                        let sums = &values[start..start + actions];
                        let mut avg = vec![0.0; actions];
                        normalize(sums, &mut avg);
                        strategies.extend(avg);
                        totals.push(sums.iter().sum::<f64>());
                    }
                }
                (strategies, totals)
            })
            .collect();
        let mut snapshot = StrategySnapshot::default();
        for (strategies, totals) in per_bucket {
            snapshot.strategies.extend(strategies);
            snapshot.totals.extend(totals);
        }
        snapshot
    }

    /// Convergence Indicator (CI): how much average strategies moved since `snapshot`.
    ///
    /// CI = 100 * mean over visited entries of the L1 distance between the
    /// current and the snapshotted average strategy. Lower is better; entries
    /// unvisited in both measurements are skipped. Returns infinity when no
    /// entry qualifies.
    pub fn convergence_indicator(&self, snapshot: &StrategySnapshot) -> f64 {
        let current = self.strategy_snapshot();
        if current.totals.len() != snapshot.totals.len()
            || current.strategies.len() != snapshot.strategies.len()
        {
            return f64::INFINITY;
        }
        let mut cursor = 0;
        let mut change = 0.0;
        let mut visited = 0usize;
        for ((key, &total_now), &total_then) in
            self.keys().zip(&current.totals).zip(&snapshot.totals)
        {
            let actions = self.bucket(key.round, key.player).actions[key.index];
            if total_now > 0.0 || total_then > 0.0 {
                let now = &current.strategies[cursor..cursor + actions];
                let then = &snapshot.strategies[cursor..cursor + actions];
                change += now
                    .iter()
                    .zip(then)
                    .map(|(a, b)| (a - b).abs())
                    .sum::<f64>();
                visited += 1;
            }
            cursor += actions;
        }
        if visited == 0 {
            return f64::INFINITY;
        }
        100.0 * change / visited as f64
    }
}

/// Snapshot of average strategies used for the convergence indicator.
#[derive(Debug, Clone, Default)]
pub struct StrategySnapshot {
    /// Average strategies of every entry, concatenated in canonical order.
    pub strategies: Vec<f64>,
    /// Strategy-sum total of every entry; zero means never visited.
    pub totals: Vec<f64>,
}

/// Serializable table of average strategies.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyExport {
    /// Name of the solved game.
    pub game: String,
    /// Iterations behind the averages.
    pub iterations: u64,
    /// Mean sampled utility per player.
    pub average_utility: Vec<f64>,
    /// One record per visited information set.
    pub info_sets: Vec<InfoSetRecord>,
}

/// One row of a [`StrategyExport`].
#[derive(Debug, Clone, Serialize)]
pub struct InfoSetRecord {
    /// Entry address.
    #[serde(flatten)]
    pub key: InfoKey,
    /// Human-readable information-set label.
    pub label: String,
    /// Action names, parallel to `strategy`.
    pub actions: Vec<String>,
    /// Average strategy.
    pub strategy: Vec<f64>,
    /// Accumulated reach weight.
    pub weight: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfr::tree::TreeBuilder;

    fn point(round: usize, player: usize, index: usize) -> DecisionPoint {
        DecisionPoint {
            round,
            player,
            index,
        }
    }

    /// Two rounds, two players; player 1 has no decision in round 1.
    fn sample_tree() -> GameTree {
        let mut builder = TreeBuilder::new(2, 2);
        let leaf = builder.fixed(vec![0.0, 0.0]);
        let late = builder.decision(point(1, 0, 0), vec![leaf, leaf, leaf]);
        let reply = builder.decision(point(0, 1, 0), vec![late, leaf]);
        let other = builder.decision(point(0, 0, 1), vec![leaf, leaf]);
        let root = builder.decision(point(0, 0, 0), vec![reply, other]);
        builder.build(root, vec![vec![3, 2], vec![4, 5]]).unwrap()
    }

    #[test]
    fn test_layout_allocates_every_entry() {
        let tree = sample_tree();
        let data = TrainingData::new(&tree);

        // (0,0): 3 chances x 2 decisions, (0,1): 2 x 1, (1,0): 4 x 1, (1,1): none
        assert_eq!(data.num_entries(), 6 + 2 + 4);
        assert_eq!(data.num_values(), 3 * (4 + 4) + 2 * 4 + 4 * 6);
        assert_eq!(data.keys().count(), data.num_entries());
        assert_eq!(data.entries(point(0, 0, 1)).count(), 3);
        assert_eq!(data.entries(point(1, 0, 0)).count(), 4);
        assert!(data
            .entries(point(1, 0, 0))
            .all(|entry| entry.actions() == 3 && entry.weight() == 0.0));
    }

    #[test]
    fn test_entries_are_disjoint_slices() {
        let tree = sample_tree();
        let mut data = TrainingData::new(&tree);
        let keys: Vec<InfoKey> = data.keys().collect();
        for (n, &key) in keys.iter().enumerate() {
            // SAFETY: single-threaded, one view alive at a time.
            let entry = unsafe { data.entry_mut(key) };
            entry.regret.iter_mut().for_each(|r| *r = n as f64);
            entry.strategy_sum.iter_mut().for_each(|s| *s = -(n as f64));
        }
        for (n, &key) in keys.iter().enumerate() {
            let entry = data.entry(key);
            assert!(entry.regret.iter().all(|&r| r == n as f64));
            assert!(entry.strategy_sum.iter().all(|&s| s == -(n as f64)));
        }
        data.reset();
        assert!(data.values().iter().all(|&v| v == 0.0));
    }

    #[test]
    #[should_panic(expected = "outside the table")]
    fn test_out_of_range_chance_panics() {
        let data = TrainingData::new(&sample_tree());
        data.entry(InfoKey::new(point(0, 1, 0), 2));
    }

    #[test]
    fn test_regret_matching() {
        let mut out = [0.0; 3];
        regret_matching(&[3.0, -2.0, 1.0], &mut out);
        assert_eq!(out, [0.75, 0.0, 0.25]);

        regret_matching(&[0.0, -1.0, 0.0], &mut out);
        assert_eq!(out, [1.0 / 3.0; 3]);

        regret_matching(&[f64::NAN, 0.0, 0.0], &mut out);
        assert_eq!(out, [1.0 / 3.0; 3]);
    }

    #[test]
    fn test_average_strategy_normalized() {
        let entry = InfoSetEntry {
            regret: &[0.0, 0.0, 0.0],
            strategy_sum: &[0.3, 1.1, 2.7],
        };
        let avg = entry.average_strategy();
        assert!((avg.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((avg[2] - 2.7 / 4.1).abs() < 1e-12);

        let unvisited = InfoSetEntry {
            regret: &[0.0, 0.0],
            strategy_sum: &[0.0, 0.0],
        };
        assert_eq!(unvisited.average_strategy(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_concurrent_record() {
        let data = TrainingData::new(&sample_tree());
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..1000 {
                        data.record(&[0.5, -0.25]);
                    }
                });
            }
        });
        let snapshot = data.snapshot();
        assert_eq!(snapshot.iterations, 8000);
        assert_eq!(snapshot.utility_sums, vec![4000.0, -2000.0]);
        assert_eq!(snapshot.average_utility(), vec![0.5, -0.25]);
    }

    #[test]
    fn test_convergence_indicator() {
        let tree = sample_tree();
        let data = TrainingData::new(&tree);
        let before = data.strategy_snapshot();
        assert_eq!(before.totals.len(), data.num_entries());
        assert_eq!(data.convergence_indicator(&before), f64::INFINITY);

        let key = InfoKey::new(point(0, 0, 0), 1);
        // SAFETY: single-threaded, no other view alive.
        let entry = unsafe { data.entry_mut(key) };
        entry.strategy_sum.copy_from_slice(&[1.0, 0.0]);

        // One visited entry moved from uniform to pure: L1 distance 1.0.
        assert!((data.convergence_indicator(&before) - 100.0).abs() < 1e-9);
        let after = data.strategy_snapshot();
        assert_eq!(data.convergence_indicator(&after), 0.0);
    }
}
