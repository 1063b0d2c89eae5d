//! Chance synchronization between training workers.
//!
//! Two workers may run a training step at the same time only if their
//! samples share no `(round, player, chance)` triple: that is what keeps the
//! lock-free information-set table free of data races. A synchronizer hands
//! out samples whose triples it has reserved and takes them back afterwards.
//!
//! Two strategies are provided:
//!
//! - [`RetrySynchronizer`]: draw candidates under one critical section until
//!   one does not collide, waiting for a release when none fits.
//! - [`BufferedSynchronizer`]: a background producer keeps a bounded queue of
//!   already-reserved samples; workers only pop.

mod buffered;
mod reservation;
mod retry;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

pub use buffered::BufferedSynchronizer;
pub use reservation::ReservationSet;
pub use retry::RetrySynchronizer;

use crate::cfr::config::{SynchronizerConfig, TrainerConfig};
use crate::cfr::error::ConfigError;
use crate::cfr::sample::{ChanceSample, ChanceSampler};
use crate::cfr::tree::GameTree;

/// Hands out mutually disjoint chance samples to concurrent workers.
///
/// Every sample returned by [`acquire`](Self::acquire) must be passed back
/// exactly once to [`release`](Self::release), by the thread that acquired
/// it, before that thread acquires again.
///
/// # Safety
/// Workers write the shared table without locks on the strength of this
/// trait. An implementation must guarantee that no two samples outstanding
/// at the same time (acquired and not yet released) share a
/// `(round, player, chance)` triple of a bucket that owns decision points,
/// and that every returned sample lies inside the chance domains of the
/// tree it guards. Implementations are therefore `unsafe impl`:
///
/// ```compile_fail
/// use chance_cfr::cfr::{ChanceSample, ChanceSynchronizer, SyncStats};
///
/// struct Careless;
///
/// impl ChanceSynchronizer for Careless {
///     fn acquire(&self) -> Option<ChanceSample> {
///         Some(ChanceSample::new(1, 1))
///     }
///     fn release(&self, _sample: ChanceSample) {}
///     fn shut_down(&self) {}
///     fn reset(&self) {}
///     fn is_shut_down(&self) -> bool {
///         false
///     }
///     fn stats(&self) -> SyncStats {
///         SyncStats::default()
///     }
/// }
/// ```
pub unsafe trait ChanceSynchronizer: Send + Sync {
    /// Block until a sample disjoint from every outstanding one exists.
    ///
    /// Returns `None` once the synchronizer has been shut down.
    fn acquire(&self) -> Option<ChanceSample>;

    /// Give back a sample obtained from `acquire` and drop its reservation.
    fn release(&self, sample: ChanceSample);

    /// Wake every waiter; all later acquires return `None`. Idempotent.
    fn shut_down(&self);

    /// Clear the shutdown flag so the synchronizer can serve a new run.
    fn reset(&self);

    /// Whether [`shut_down`](Self::shut_down) was called since the last reset.
    fn is_shut_down(&self) -> bool;

    /// Whether [`produce_in_background`](Self::produce_in_background) must
    /// run on a dedicated thread for `acquire` to make progress.
    fn needs_background(&self) -> bool {
        false
    }

    /// Background production loop; returns after shutdown.
    fn produce_in_background(&self) {}

    /// Current counters.
    fn stats(&self) -> SyncStats;
}

/// Counters exposed by a synchronizer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Samples currently held by workers.
    pub in_flight: usize,
    /// Reserved triples, including those of buffered samples.
    pub reserved: usize,
    /// Reserved samples waiting in the buffer.
    pub buffered: usize,
    /// Colliding samples parked for a later retry.
    pub parked: usize,
    /// Candidates rejected because they collided.
    pub collisions: u64,
    /// Candidates drawn from the sampler.
    pub produced: u64,
}

/// Build the synchronizer selected by `config` around `sampler`.
///
/// Fails if the sampler's chance domains differ from the tree's.
pub fn build_synchronizer<S>(
    config: &TrainerConfig,
    tree: &GameTree,
    mut sampler: S,
) -> Result<Arc<dyn ChanceSynchronizer>, ConfigError>
where
    S: ChanceSampler + 'static,
{
    config.synchronizer.validate()?;
    tree.check_sampler(&mut sampler)?;
    let starvation = config.starvation_warning();
    let synchronizer: Arc<dyn ChanceSynchronizer> = match config.synchronizer {
        SynchronizerConfig::Retry { max_attempts } => Arc::new(RetrySynchronizer::new(
            tree,
            sampler,
            max_attempts,
            starvation,
        )),
        SynchronizerConfig::Buffered {
            low_water,
            high_water,
            batch_size,
        } => Arc::new(BufferedSynchronizer::new(
            tree, sampler, low_water, high_water, batch_size, starvation,
        )),
    };
    log::debug!(
        "{:<32}{}",
        "chance synchronizer",
        config.synchronizer.name()
    );
    Ok(synchronizer)
}

pub(crate) fn starvation_warning(waited: Duration, reserved: usize) {
    log::warn!(
        "no collision-free chance sample after {:?} ({} triples reserved)",
        waited,
        reserved
    );
}

/// A sampler produced a sample the reservation set cannot address.
///
/// Only reachable with a sampler that slipped past
/// [`GameTree::check_sampler`]; the caller has already left its state
/// consistent.
pub(crate) fn out_of_domain(sample: &[usize]) -> ! {
    panic!("chance sample {:?} lies outside the tree's chance domains", sample)
}
