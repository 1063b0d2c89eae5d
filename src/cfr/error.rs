//! Error types for the training engine.
//!
//! Each layer has its own error enum; [`EngineError`] wraps them so that the
//! solver facade and the binary can propagate everything with `?`.

use thiserror::Error;

/// Errors raised while validating a [`TrainerConfig`](crate::cfr::TrainerConfig).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The scheduler needs at least one worker thread.
    #[error("worker thread count must be at least 1")]
    NoWorkers,

    /// Reserve-and-retry needs at least one candidate per attempt round.
    #[error("retry synchronizer needs at least one attempt per round")]
    NoAttempts,

    /// Buffered synchronizer watermarks are inconsistent.
    #[error("invalid watermarks: low {low} must be in 1..={high}")]
    InvalidWatermarks {
        /// Refill trigger.
        low: usize,
        /// Buffer ceiling.
        high: usize,
    },

    /// Buffered synchronizer must produce at least one sample per pass.
    #[error("batch size must be at least 1")]
    EmptyBatch,

    /// A dealing sampler cannot give every player of a round a distinct index.
    #[error("round {round} player {player} draws from {size} outcomes but the round deals {players}")]
    DeckTooSmall {
        /// Round index.
        round: usize,
        /// Player index.
        player: usize,
        /// Chance domain size of the slot.
        size: usize,
        /// Players dealt in the round.
        players: usize,
    },

    /// A sampler draws from chance domains other than the tree's.
    #[error("sampler draws from chance domains {sampler:?} but the tree has {tree:?}")]
    DomainMismatch {
        /// `sizes[round][player]` of the sampler.
        sampler: Vec<Vec<usize>>,
        /// `sizes[round][player]` of the tree.
        tree: Vec<Vec<usize>>,
    },

    /// A chance sample does not fit the tree's chance domains.
    #[error("chance sample {sample:?} lies outside the chance domains {domains:?}")]
    SampleOutOfDomain {
        /// Round-major chance indices of the sample.
        sample: Vec<usize>,
        /// `sizes[round][player]` of the tree.
        domains: Vec<Vec<usize>>,
    },

    /// A JSON configuration file could not be parsed.
    #[error("cannot parse configuration: {0}")]
    Parse(String),
}

/// Errors raised while validating a game tree.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    /// The tree has no nodes.
    #[error("game tree is empty")]
    Empty,

    /// The game declares no players or no rounds.
    #[error("game needs at least one player and one round")]
    NoPlayers,

    /// A child index points outside the arena.
    #[error("node {node} has dangling child {child}")]
    DanglingChild {
        /// Parent node.
        node: usize,
        /// Offending child index.
        child: usize,
    },

    /// A child does not precede its parent in the arena, which would allow cycles.
    #[error("node {node} points forward to child {child}")]
    ForwardChild {
        /// Parent node.
        node: usize,
        /// Offending child index.
        child: usize,
    },

    /// A decision node offers no actions.
    #[error("decision node {0} has no actions")]
    NoActions(usize),

    /// A fixed payout vector does not carry one utility per player.
    #[error("payout at node {node} has {len} entries, expected {players}")]
    PayoutLength {
        /// Leaf node.
        node: usize,
        /// Entries found.
        len: usize,
        /// Player count.
        players: usize,
    },

    /// A decision node names a round or player outside the game.
    #[error("node {node} addresses round {round} player {player} outside the game")]
    OutOfRange {
        /// Decision node.
        node: usize,
        /// Round index.
        round: usize,
        /// Player index.
        player: usize,
    },

    /// Two nodes share an information set but disagree on its action count.
    #[error("round {round} player {player} index {index} has conflicting action counts")]
    ConflictingActions {
        /// Round index.
        round: usize,
        /// Player index.
        player: usize,
        /// Dense decision index.
        index: usize,
    },

    /// Decision indices of a bucket are not dense.
    #[error("round {round} player {player} has no decision with index {index}")]
    SparseIndex {
        /// Round index.
        round: usize,
        /// Player index.
        player: usize,
        /// Missing index.
        index: usize,
    },

    /// The chance domain table does not match the game's shape.
    #[error("chance domain table is {rounds}x{players}, expected {expected_rounds}x{expected_players}")]
    ChanceShape {
        /// Rounds found.
        rounds: usize,
        /// Players found in the first mismatching row.
        players: usize,
        /// Expected rounds.
        expected_rounds: usize,
        /// Expected players.
        expected_players: usize,
    },

    /// A bucket with decisions has an empty chance domain.
    #[error("round {round} player {player} has decisions but an empty chance domain")]
    EmptyChanceDomain {
        /// Round index.
        round: usize,
        /// Player index.
        player: usize,
    },
}

/// Errors raised while reading or writing checkpoints.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Underlying I/O failure.
    #[error("checkpoint i/o: {0}")]
    Io(#[from] std::io::Error),

    /// The byte stream ended before the layout was complete.
    #[error("checkpoint truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required by the tree shape.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// The byte stream is longer than the tree shape allows.
    #[error("checkpoint has {0} trailing bytes")]
    TrailingBytes(usize),

    /// Strategy export failed.
    #[error("strategy export: {0}")]
    Json(#[from] serde_json::Error),
}

/// Umbrella error for the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Invalid game tree.
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Checkpoint failure.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// A worker thread could not be spawned.
    #[error("cannot spawn training thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// `start` was called while workers are live.
    #[error("training is already running")]
    AlreadyRunning,

    /// Entry tables cannot be read while workers are mutating them.
    #[error("training data is in use by running workers")]
    Running,
}

/// Convenience alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;
