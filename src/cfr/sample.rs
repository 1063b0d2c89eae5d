//! Chance samples and the samplers that produce them.
//!
//! A [`ChanceSample`] is one Monte-Carlo draw of nature: a chance index for
//! every (round, player) slot. Samplers hand them out and take them back for
//! reuse so the training loop does not allocate per iteration.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cfr::error::ConfigError;

/// One draw of nature's outcome, one chance index per (round, player) slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChanceSample {
    players: usize,
    chances: Vec<usize>,
}

impl ChanceSample {
    /// A sample of the given shape with every slot at chance index 0.
    pub fn new(rounds: usize, players: usize) -> Self {
        Self {
            players,
            chances: vec![0; rounds * players],
        }
    }

    /// Build a sample from per-round rows of per-player chance indices.
    ///
    /// # Panics
    /// Panics if the rows do not all have the same length.
    pub fn from_rows(rows: &[Vec<usize>]) -> Self {
        let players = rows.first().map_or(0, Vec::len);
        assert!(
            rows.iter().all(|row| row.len() == players),
            "chance sample rows must have equal length"
        );
        Self {
            players,
            chances: rows.concat(),
        }
    }

    /// Number of rounds covered.
    pub fn rounds(&self) -> usize {
        if self.players == 0 {
            0
        } else {
            self.chances.len() / self.players
        }
    }

    /// Number of players covered.
    pub fn players(&self) -> usize {
        self.players
    }

    /// Chance index drawn for `player` in `round`.
    #[inline]
    pub fn get(&self, round: usize, player: usize) -> usize {
        self.chances[round * self.players + player]
    }

    /// Overwrite the chance index of a slot.
    #[inline]
    pub fn set(&mut self, round: usize, player: usize, chance: usize) {
        self.chances[round * self.players + player] = chance;
    }

    /// Every `(round, player, chance)` triple of the sample, round-major.
    pub fn triples(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        let players = self.players.max(1);
        self.chances
            .iter()
            .enumerate()
            .map(move |(slot, &chance)| (slot / players, slot % players, chance))
    }

    /// Raw round-major slot values.
    pub fn as_slice(&self) -> &[usize] {
        &self.chances
    }
}

/// Produces chance samples and takes them back once a training step is done.
///
/// Implementations are only ever driven from one production path at a time;
/// the synchronizer serializes calls, so no internal locking is needed.
pub trait ChanceSampler: Send {
    /// Draw a fresh sample.
    fn produce(&mut self) -> ChanceSample;

    /// Return a sample for reuse.
    fn recycle(&mut self, sample: ChanceSample);

    /// Domain table `sizes[round][player]` every draw stays inside, if known.
    fn domain(&self) -> Option<&[Vec<usize>]> {
        None
    }
}

impl<S: ChanceSampler + ?Sized> ChanceSampler for Box<S> {
    fn produce(&mut self) -> ChanceSample {
        (**self).produce()
    }

    fn recycle(&mut self, sample: ChanceSample) {
        (**self).recycle(sample)
    }

    fn domain(&self) -> Option<&[Vec<usize>]> {
        (**self).domain()
    }
}

/// Independent uniform draw for every slot.
#[derive(Debug)]
pub struct UniformSampler {
    sizes: Vec<Vec<usize>>,
    rng: StdRng,
    pool: Vec<ChanceSample>,
}

impl UniformSampler {
    /// Sampler over the domain table `sizes[round][player]`.
    pub fn new(sizes: Vec<Vec<usize>>, seed: u64) -> Self {
        Self {
            sizes,
            rng: StdRng::seed_from_u64(seed),
            pool: Vec::new(),
        }
    }

    fn blank(&mut self) -> ChanceSample {
        let rounds = self.sizes.len();
        let players = self.sizes.first().map_or(0, Vec::len);
        self.pool
            .pop()
            .unwrap_or_else(|| ChanceSample::new(rounds, players))
    }
}

impl ChanceSampler for UniformSampler {
    fn produce(&mut self) -> ChanceSample {
        let mut sample = self.blank();
        for (round, row) in self.sizes.iter().enumerate() {
            for (player, &size) in row.iter().enumerate() {
                let chance = if size > 1 { self.rng.gen_range(0..size) } else { 0 };
                sample.set(round, player, chance);
            }
        }
        sample
    }

    fn recycle(&mut self, sample: ChanceSample) {
        self.pool.push(sample);
    }

    fn domain(&self) -> Option<&[Vec<usize>]> {
        Some(&self.sizes)
    }
}

/// Deals every player of a round a distinct chance index, like cards from a deck.
#[derive(Debug)]
pub struct DealSampler {
    sizes: Vec<Vec<usize>>,
    rng: StdRng,
    pool: Vec<ChanceSample>,
    dealt: Vec<bool>,
}

impl DealSampler {
    /// Sampler over `sizes[round][player]`; each slot needs at least as many
    /// outcomes as there are players in its round.
    pub fn new(sizes: Vec<Vec<usize>>, seed: u64) -> Result<Self, ConfigError> {
        for (round, row) in sizes.iter().enumerate() {
            for (player, &size) in row.iter().enumerate() {
                if size < row.len() {
                    return Err(ConfigError::DeckTooSmall {
                        round,
                        player,
                        size,
                        players: row.len(),
                    });
                }
            }
        }
        let widest = sizes.iter().flatten().copied().max().unwrap_or(0);
        Ok(Self {
            sizes,
            rng: StdRng::seed_from_u64(seed),
            pool: Vec::new(),
            dealt: vec![false; widest],
        })
    }
}

impl ChanceSampler for DealSampler {
    fn produce(&mut self) -> ChanceSample {
        let rounds = self.sizes.len();
        let players = self.sizes.first().map_or(0, Vec::len);
        let mut sample = self
            .pool
            .pop()
            .unwrap_or_else(|| ChanceSample::new(rounds, players));
        for (round, row) in self.sizes.iter().enumerate() {
            self.dealt.iter_mut().for_each(|d| *d = false);
            for (player, &size) in row.iter().enumerate() {
                let chance = loop {
                    let candidate = self.rng.gen_range(0..size);
                    if !self.dealt[candidate] {
                        break candidate;
                    }
                };
                self.dealt[chance] = true;
                sample.set(round, player, chance);
            }
        }
        sample
    }

    fn recycle(&mut self, sample: ChanceSample) {
        self.pool.push(sample);
    }

    fn domain(&self) -> Option<&[Vec<usize>]> {
        Some(&self.sizes)
    }
}

/// Replays a fixed sequence of samples, cycling back to the start.
#[derive(Debug, Clone)]
pub struct SequenceSampler {
    samples: Vec<ChanceSample>,
    next: usize,
}

impl SequenceSampler {
    /// Sampler over a non-empty sequence.
    ///
    /// # Panics
    /// Panics if `samples` is empty.
    pub fn new(samples: Vec<ChanceSample>) -> Self {
        assert!(!samples.is_empty(), "sequence sampler needs at least one sample");
        Self { samples, next: 0 }
    }
}

impl ChanceSampler for SequenceSampler {
    fn produce(&mut self) -> ChanceSample {
        let sample = self.samples[self.next].clone();
        self.next = (self.next + 1) % self.samples.len();
        sample
    }

    fn recycle(&mut self, _sample: ChanceSample) {}
}
