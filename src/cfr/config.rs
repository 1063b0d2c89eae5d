//! Configuration options for the training engine.
//!
//! This module provides configuration structs that control how many worker
//! threads train concurrently and which chance-synchronization strategy keeps
//! them from touching the same information sets.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cfr::error::ConfigError;

/// Which chance synchronizer to deploy, with its tuning parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SynchronizerConfig {
    /// Reserve-and-retry under a single critical section.
    ///
    /// Cheap to reason about; wastes produced samples under contention.
    Retry {
        /// Candidates drawn per round before the caller waits for a release.
        max_attempts: usize,
    },

    /// Background producer feeding a bounded buffer of reserved samples.
    Buffered {
        /// Refill is triggered when the buffer holds this many samples or fewer.
        low_water: usize,
        /// Ceiling for buffered samples and for parked colliding samples.
        high_water: usize,
        /// Candidates produced per refill pass.
        batch_size: usize,
    },
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        Self::Retry { max_attempts: 16 }
    }
}

impl SynchronizerConfig {
    /// Default buffered tuning.
    pub fn buffered() -> Self {
        Self::Buffered {
            low_water: 4,
            high_water: 32,
            batch_size: 16,
        }
    }

    /// Short name used in logs and on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Retry { .. } => "retry",
            Self::Buffered { .. } => "buffered",
        }
    }

    /// Validate the tuning parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            Self::Retry { max_attempts } => {
                if max_attempts == 0 {
                    return Err(ConfigError::NoAttempts);
                }
            }
            Self::Buffered {
                low_water,
                high_water,
                batch_size,
            } => {
                if low_water == 0 || low_water > high_water {
                    return Err(ConfigError::InvalidWatermarks {
                        low: low_water,
                        high: high_water,
                    });
                }
                if batch_size == 0 {
                    return Err(ConfigError::EmptyBatch);
                }
            }
        }
        Ok(())
    }
}

/// Configuration for a training run.
///
/// # Example
/// ```
/// use chance_cfr::cfr::{SynchronizerConfig, TrainerConfig};
///
/// let config = TrainerConfig::buffered().with_threads(4).with_seed(7);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.synchronizer.name(), "buffered");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Number of worker threads.
    ///
    /// `None` uses all available cores.
    pub threads: Option<usize>,

    /// Chance synchronizer strategy.
    #[serde(default)]
    pub synchronizer: SynchronizerConfig,

    /// Random seed for samplers.
    ///
    /// If set, sequential training is reproducible. If `None`, a random seed is used.
    pub seed: Option<u64>,

    /// How long a worker may wait for a collision-free sample before a
    /// starvation warning is logged.
    #[serde(default = "default_starvation_ms")]
    pub starvation_warning_ms: u64,
}

fn default_starvation_ms() -> u64 {
    1_000
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            threads: None,
            synchronizer: SynchronizerConfig::default(),
            seed: None,
            starvation_warning_ms: default_starvation_ms(),
        }
    }
}

impl TrainerConfig {
    /// Create a new TrainerConfig with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration using the reserve-and-retry synchronizer.
    pub fn retry() -> Self {
        Self::default()
    }

    /// Configuration using the buffered background producer.
    pub fn buffered() -> Self {
        Self {
            synchronizer: SynchronizerConfig::buffered(),
            ..Default::default()
        }
    }

    /// Builder method: set number of threads.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Builder method: set the synchronizer.
    pub fn with_synchronizer(mut self, synchronizer: SynchronizerConfig) -> Self {
        self.synchronizer = synchronizer;
        self
    }

    /// Builder method: set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Resolve the worker count, falling back to the number of cores.
    pub fn worker_count(&self) -> usize {
        self.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Starvation warning threshold.
    pub fn starvation_warning(&self) -> Duration {
        Duration::from_millis(self.starvation_warning_ms.max(1))
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == Some(0) {
            return Err(ConfigError::NoWorkers);
        }
        self.synchronizer.validate()
    }

    /// Load a configuration from a JSON file and validate it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.as_ref().display(), e)))?;
        let config: Self =
            serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Statistics tracked during training.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingStats {
    /// Total number of iterations completed.
    pub iterations: u64,

    /// Number of information-set entries in the table.
    pub info_sets: usize,

    /// Total time spent training (in seconds).
    pub elapsed_seconds: f64,

    /// Iterations per second.
    pub iterations_per_second: f64,

    /// Running mean of sampled utility per player.
    pub average_utility: Vec<f64>,

    /// Latest convergence indicator, if measured.
    pub convergence: Option<f64>,

    /// History of convergence measurements.
    pub convergence_history: Vec<ConvergencePoint>,
}

/// A single convergence measurement at a specific iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergencePoint {
    /// Iteration number when this measurement was taken.
    pub iteration: u64,
    /// Convergence indicator value.
    pub indicator: f64,
}

impl TrainingStats {
    /// Create new empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Update iterations per second based on elapsed time.
    pub fn update_rate(&mut self) {
        if self.elapsed_seconds > 0.0 {
            self.iterations_per_second = self.iterations as f64 / self.elapsed_seconds;
        }
    }

    /// Record a convergence measurement.
    pub fn record_convergence(&mut self, iteration: u64, indicator: f64) {
        self.convergence = Some(indicator);
        self.convergence_history.push(ConvergencePoint {
            iteration,
            indicator,
        });
    }
}
