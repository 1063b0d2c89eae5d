//! Reserve-and-retry synchronization.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{out_of_domain, starvation_warning, ChanceSynchronizer, ReservationSet, SyncStats};
use crate::cfr::sample::{ChanceSample, ChanceSampler};
use crate::cfr::tree::GameTree;

struct RetryState<S> {
    sampler: S,
    reservations: ReservationSet,
    shut_down: bool,
    in_flight: usize,
    produced: u64,
    collisions: u64,
}

/// Draws candidates inside one critical section until one fits.
///
/// The sampler and the reservation set live behind the same mutex. When
/// `max_attempts` candidates in a row collide, the caller sleeps until some
/// worker releases its sample and then tries again.
pub struct RetrySynchronizer<S> {
    state: Mutex<RetryState<S>>,
    released: Condvar,
    max_attempts: usize,
    starvation: Duration,
}

impl<S: ChanceSampler> RetrySynchronizer<S> {
    /// Synchronizer over `tree`'s chance domains.
    pub fn new(tree: &GameTree, sampler: S, max_attempts: usize, starvation: Duration) -> Self {
        Self {
            state: Mutex::new(RetryState {
                sampler,
                reservations: ReservationSet::new(tree),
                shut_down: false,
                in_flight: 0,
                produced: 0,
                collisions: 0,
            }),
            released: Condvar::new(),
            max_attempts: max_attempts.max(1),
            starvation,
        }
    }
}

// SAFETY: a candidate is handed out only after it was checked against the
// tree's domains and found free of reserved triples, and its triples stay
// reserved until `release`. Check and reservation happen under one lock.
unsafe impl<S: ChanceSampler> ChanceSynchronizer for RetrySynchronizer<S> {
    fn acquire(&self) -> Option<ChanceSample> {
        let started = Instant::now();
        let mut warned = false;
        let mut state = self.state.lock();
        loop {
            if state.shut_down {
                return None;
            }
            for _ in 0..self.max_attempts {
                let candidate = state.sampler.produce();
                state.produced += 1;
                if !state.reservations.admits(&candidate) {
                    let chances = candidate.as_slice().to_vec();
                    state.sampler.recycle(candidate);
                    out_of_domain(&chances);
                }
                if state.reservations.collides(&candidate) {
                    state.collisions += 1;
                    state.sampler.recycle(candidate);
                    continue;
                }
                state.reservations.reserve(&candidate);
                state.in_flight += 1;
                return Some(candidate);
            }
            self.released.wait_for(&mut state, self.starvation);
            if !warned && started.elapsed() >= self.starvation {
                starvation_warning(started.elapsed(), state.reservations.len());
                warned = true;
            }
        }
    }

    fn release(&self, sample: ChanceSample) {
        let mut state = self.state.lock();
        state.reservations.clear(&sample);
        state.in_flight = state.in_flight.saturating_sub(1);
        state.sampler.recycle(sample);
        drop(state);
        self.released.notify_all();
    }

    fn shut_down(&self) {
        self.state.lock().shut_down = true;
        self.released.notify_all();
    }

    fn reset(&self) {
        self.state.lock().shut_down = false;
    }

    fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    fn stats(&self) -> SyncStats {
        let state = self.state.lock();
        SyncStats {
            in_flight: state.in_flight,
            reserved: state.reservations.len(),
            buffered: 0,
            parked: 0,
            collisions: state.collisions,
            produced: state.produced,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::mpsc;

    use super::super::testing::{flat_tree, stress, CountingSampler};
    use super::*;
    use crate::cfr::sample::{SequenceSampler, UniformSampler};

    #[test]
    fn test_third_acquire_blocks_until_release() {
        let tree = flat_tree(1, 2);
        let sampler = SequenceSampler::new(vec![
            ChanceSample::from_rows(&[vec![0]]),
            ChanceSample::from_rows(&[vec![1]]),
        ]);
        let sync = RetrySynchronizer::new(&tree, sampler, 4, Duration::from_millis(20));
        let sync = &sync;

        let first = sync.acquire().unwrap();
        let second = sync.acquire().unwrap();
        assert_ne!(first, second);
        assert_eq!(sync.stats().in_flight, 2);

        let (tx, rx) = mpsc::channel();
        std::thread::scope(|scope| {
            scope.spawn(move || {
                let third = sync.acquire();
                tx.send(third).unwrap();
            });
            assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

            let freed = first.clone();
            sync.release(first);
            let third = rx
                .recv_timeout(Duration::from_secs(5))
                .unwrap()
                .expect("acquire after release");
            assert_eq!(third, freed);
            sync.release(third);
        });
        sync.release(second);
        assert_eq!(sync.stats().in_flight, 0);
        assert_eq!(sync.stats().reserved, 0);
    }

    #[test]
    fn test_shutdown_wakes_waiters() {
        let tree = flat_tree(1, 1);
        let sampler = CountingSampler::new(UniformSampler::new(vec![vec![1]], 0));
        let (produced, recycled) = (sampler.produced.clone(), sampler.recycled.clone());
        let sync = RetrySynchronizer::new(&tree, sampler, 2, Duration::from_millis(10));

        let held = sync.acquire().unwrap();
        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| sync.acquire());
            std::thread::sleep(Duration::from_millis(50));
            sync.shut_down();
            assert_eq!(waiter.join().unwrap(), None);
        });
        assert!(sync.is_shut_down());
        assert!(sync.acquire().is_none());
        sync.release(held);

        assert_eq!(
            produced.load(Ordering::SeqCst),
            recycled.load(Ordering::SeqCst)
        );

        sync.reset();
        let again = sync.acquire().unwrap();
        sync.release(again);
    }

    #[test]
    fn test_concurrent_samples_are_disjoint() {
        let tree = flat_tree(2, 6);
        let sampler = CountingSampler::new(UniformSampler::new(tree.chance_sizes().to_vec(), 7));
        let (produced, recycled) = (sampler.produced.clone(), sampler.recycled.clone());
        let sync = RetrySynchronizer::new(&tree, sampler, 8, Duration::from_secs(1));

        let done = stress(&sync, 8, 500);
        assert_eq!(done, 8 * 500);

        let stats = sync.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.reserved, 0);
        assert_eq!(stats.produced, produced.load(Ordering::SeqCst));
        assert_eq!(
            produced.load(Ordering::SeqCst),
            recycled.load(Ordering::SeqCst)
        );
    }

    #[test]
    fn test_out_of_domain_candidate_leaves_state_clean() {
        let tree = flat_tree(1, 2);
        let sampler = SequenceSampler::new(vec![
            ChanceSample::from_rows(&[vec![1]]),
            ChanceSample::from_rows(&[vec![2]]),
        ]);
        let sync = RetrySynchronizer::new(&tree, sampler, 4, Duration::from_millis(20));

        let held = sync.acquire().unwrap();
        let failed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sync.acquire()));
        assert!(failed.is_err());

        let stats = sync.stats();
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.reserved, 1);
        sync.release(held);
        assert_eq!(sync.stats().reserved, 0);
    }
}
