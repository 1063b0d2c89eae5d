//! Buffered background production.
//!
//! A producer thread keeps a queue of samples that are already reserved, so
//! workers never draw or test candidates themselves. Freed samples travel
//! back to the producer, which clears their reservations and recycles them.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::{out_of_domain, starvation_warning, ChanceSynchronizer, ReservationSet, SyncStats};
use crate::cfr::sample::{ChanceSample, ChanceSampler};
use crate::cfr::tree::GameTree;

struct BufferState {
    reservations: ReservationSet,
    /// Reserved samples ready for workers.
    ready: VecDeque<ChanceSample>,
    /// Unreserved candidates that collided when routed.
    colliding: Vec<ChanceSample>,
    /// Samples released by workers, still reserved.
    freed: Vec<ChanceSample>,
    in_flight: usize,
    shut_down: bool,
    producer_live: bool,
    produced: u64,
    collisions: u64,
}

impl BufferState {
    /// Reserve and enqueue `sample`, or hand it back if it collides or the
    /// buffer is full.
    fn route(&mut self, sample: ChanceSample, high_water: usize) -> Result<(), ChanceSample> {
        if self.ready.len() >= high_water || self.reservations.collides(&sample) {
            return Err(sample);
        }
        self.reservations.reserve(&sample);
        self.ready.push_back(sample);
        Ok(())
    }
}

/// Workers pop pre-reserved samples produced by a background loop.
///
/// [`produce_in_background`](ChanceSynchronizer::produce_in_background) must
/// run on its own thread for [`acquire`](ChanceSynchronizer::acquire) to
/// return. The sampler sits behind its own mutex and is never locked while
/// the queue state is.
pub struct BufferedSynchronizer<S> {
    state: Mutex<BufferState>,
    sampler: Mutex<S>,
    /// Signalled when samples become ready or on shutdown.
    available: Condvar,
    /// Wakes the producer.
    wake: Condvar,
    low_water: usize,
    high_water: usize,
    batch_size: usize,
    starvation: Duration,
}

impl<S: ChanceSampler> BufferedSynchronizer<S> {
    /// Synchronizer over `tree`'s chance domains.
    pub fn new(
        tree: &GameTree,
        sampler: S,
        low_water: usize,
        high_water: usize,
        batch_size: usize,
        starvation: Duration,
    ) -> Self {
        let high_water = high_water.max(1);
        Self {
            state: Mutex::new(BufferState {
                reservations: ReservationSet::new(tree),
                ready: VecDeque::with_capacity(high_water),
                colliding: Vec::new(),
                freed: Vec::new(),
                in_flight: 0,
                shut_down: false,
                producer_live: false,
                produced: 0,
                collisions: 0,
            }),
            sampler: Mutex::new(sampler),
            available: Condvar::new(),
            wake: Condvar::new(),
            low_water: low_water.min(high_water),
            high_water,
            batch_size: batch_size.max(1),
            starvation,
        }
    }

    /// Run `f` on the sampler with the state lock released.
    fn with_sampler<T>(
        &self,
        state: &mut MutexGuard<'_, BufferState>,
        f: impl FnOnce(&mut S) -> T,
    ) -> T {
        MutexGuard::unlocked(state, || f(&mut *self.sampler.lock()))
    }

    /// Drain every queue on shutdown and recycle what was in them.
    fn drain(&self, mut state: MutexGuard<'_, BufferState>) {
        let BufferState {
            reservations,
            ready,
            colliding,
            freed,
            ..
        } = &mut *state;
        let mut leftovers: Vec<ChanceSample> =
            Vec::with_capacity(ready.len() + freed.len() + colliding.len());
        for sample in freed.drain(..).chain(ready.drain(..)) {
            reservations.clear(&sample);
            leftovers.push(sample);
        }
        leftovers.append(colliding);
        state.producer_live = false;
        drop(state);
        self.available.notify_all();

        let count = leftovers.len();
        let mut sampler = self.sampler.lock();
        for sample in leftovers {
            sampler.recycle(sample);
        }
        log::debug!("{:<32}{}", "producer drained samples", count);
    }

    fn production_loop(&self) {
        let mut state = self.state.lock();
        state.producer_live = true;
        log::debug!("{:<32}{}", "producer started", self.high_water);
        loop {
            if state.shut_down {
                self.drain(state);
                return;
            }

            // Released samples: drop reservations, recycle later.
            let mut surplus: Vec<ChanceSample> = Vec::new();
            let freed = std::mem::take(&mut state.freed);
            for sample in freed {
                state.reservations.clear(&sample);
                surplus.push(sample);
            }

            // Parked candidates may fit now.
            let mut routed = 0;
            let parked = std::mem::take(&mut state.colliding);
            for sample in parked {
                match state.route(sample, self.high_water) {
                    Ok(()) => routed += 1,
                    Err(sample) => state.colliding.push(sample),
                }
            }

            let wanted = if state.ready.len() <= self.low_water {
                self.batch_size
                    .min(self.high_water.saturating_sub(state.ready.len()))
            } else {
                0
            };
            let fresh = self.with_sampler(&mut state, |sampler| {
                for sample in surplus.drain(..) {
                    sampler.recycle(sample);
                }
                (0..wanted).map(|_| sampler.produce()).collect::<Vec<_>>()
            });
            state.produced += fresh.len() as u64;
            let stray = fresh
                .iter()
                .find(|sample| !state.reservations.admits(sample))
                .map(|sample| sample.as_slice().to_vec());
            if let Some(chances) = stray {
                self.with_sampler(&mut state, |sampler| {
                    for sample in fresh {
                        sampler.recycle(sample);
                    }
                });
                out_of_domain(&chances);
            }
            for sample in fresh {
                match state.route(sample, self.high_water) {
                    Ok(()) => routed += 1,
                    Err(sample) => {
                        state.collisions += 1;
                        state.colliding.push(sample);
                    }
                }
            }

            let overflow = state.colliding.len().saturating_sub(self.high_water);
            if overflow > 0 {
                let extra: Vec<ChanceSample> = state.colliding.drain(..overflow).collect();
                self.with_sampler(&mut state, |sampler| {
                    for sample in extra {
                        sampler.recycle(sample);
                    }
                });
            }

            if routed > 0 {
                self.available.notify_all();
            }
            log::debug!(
                "producer pass: {} ready, {} parked, {} in flight",
                state.ready.len(),
                state.colliding.len(),
                state.in_flight
            );

            // Workers may have drained the queue while the sampler ran unlocked.
            let starving =
                state.ready.len() <= self.low_water && state.ready.len() < self.high_water;
            let more_work = state.shut_down
                || !state.freed.is_empty()
                || (starving && (routed > 0 || wanted == 0));
            if !more_work {
                self.wake.wait_for(&mut state, self.starvation);
            }
        }
    }
}

// SAFETY: a sample enters the ready queue only after it was checked against
// the tree's domains and its triples were reserved, all under the state lock;
// reservations are cleared only for samples workers have released, or for
// queued ones nobody holds.
unsafe impl<S: ChanceSampler> ChanceSynchronizer for BufferedSynchronizer<S> {
    fn acquire(&self) -> Option<ChanceSample> {
        let started = Instant::now();
        let mut warned = false;
        let mut state = self.state.lock();
        loop {
            if state.shut_down {
                return None;
            }
            if let Some(sample) = state.ready.pop_front() {
                state.in_flight += 1;
                if state.ready.len() <= self.low_water {
                    self.wake.notify_one();
                }
                return Some(sample);
            }
            self.wake.notify_one();
            self.available.wait_for(&mut state, self.starvation);
            if !warned && started.elapsed() >= self.starvation {
                starvation_warning(started.elapsed(), state.reservations.len());
                warned = true;
            }
        }
    }

    fn release(&self, sample: ChanceSample) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.shut_down && !state.producer_live {
            // Nobody is left to reconcile the queue.
            state.reservations.clear(&sample);
            drop(state);
            self.sampler.lock().recycle(sample);
            return;
        }
        state.freed.push(sample);
        drop(state);
        self.wake.notify_one();
    }

    fn shut_down(&self) {
        self.state.lock().shut_down = true;
        self.available.notify_all();
        self.wake.notify_all();
    }

    fn reset(&self) {
        self.state.lock().shut_down = false;
    }

    fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    fn needs_background(&self) -> bool {
        true
    }

    /// Runs until shutdown. If the sampler panics, the synchronizer shuts
    /// itself down and drains before the panic resumes, so workers return
    /// and their reservations are reconciled on release.
    fn produce_in_background(&self) {
        let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.production_loop())) else {
            return;
        };
        let mut state = self.state.lock();
        state.shut_down = true;
        self.drain(state);
        self.wake.notify_all();
        log::error!("chance producer failed; synchronizer shut down");
        panic::resume_unwind(payload);
    }

    fn stats(&self) -> SyncStats {
        let state = self.state.lock();
        SyncStats {
            in_flight: state.in_flight,
            reserved: state.reservations.len(),
            buffered: state.ready.len(),
            parked: state.colliding.len(),
            collisions: state.collisions,
            produced: state.produced,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::super::testing::{flat_tree, stress, CountingSampler, FailingSampler};
    use super::*;
    use crate::cfr::sample::UniformSampler;

    #[test]
    fn test_concurrent_samples_are_disjoint() {
        let tree = flat_tree(2, 6);
        let sampler = CountingSampler::new(UniformSampler::new(tree.chance_sizes().to_vec(), 3));
        let (produced, recycled) = (sampler.produced.clone(), sampler.recycled.clone());
        let sync = BufferedSynchronizer::new(&tree, sampler, 2, 8, 4, Duration::from_secs(1));

        let done = stress(&sync, 8, 500);
        assert_eq!(done, 8 * 500);

        let stats = sync.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.reserved, 0);
        assert_eq!(stats.buffered, 0);
        assert_eq!(stats.parked, 0);
        assert_eq!(stats.produced, produced.load(Ordering::SeqCst));
        assert_eq!(
            produced.load(Ordering::SeqCst),
            recycled.load(Ordering::SeqCst)
        );
    }

    #[test]
    fn test_buffer_respects_high_water() {
        let tree = flat_tree(1, 100);
        let sync = BufferedSynchronizer::new(
            &tree,
            UniformSampler::new(vec![vec![100]], 1),
            3,
            5,
            50,
            Duration::from_millis(10),
        );
        std::thread::scope(|scope| {
            scope.spawn(|| sync.produce_in_background());
            let first = sync.acquire().unwrap();
            std::thread::sleep(Duration::from_millis(50));
            let stats = sync.stats();
            assert!(stats.buffered <= 5, "{:?}", stats);
            assert!(stats.parked <= 5, "{:?}", stats);
            sync.release(first);
            sync.shut_down();
        });
        assert_eq!(sync.stats().reserved, 0);
    }

    #[test]
    fn test_release_after_producer_exit() {
        let tree = flat_tree(1, 4);
        let sampler = CountingSampler::new(UniformSampler::new(vec![vec![4]], 5));
        let (produced, recycled) = (sampler.produced.clone(), sampler.recycled.clone());
        let sync = BufferedSynchronizer::new(&tree, sampler, 1, 4, 4, Duration::from_millis(10));

        let held = std::thread::scope(|scope| {
            let producer = scope.spawn(|| sync.produce_in_background());
            let held = sync.acquire().unwrap();
            sync.shut_down();
            producer.join().unwrap();
            held
        });
        assert!(sync.acquire().is_none());
        assert_eq!(sync.stats().in_flight, 1);

        sync.release(held);
        let stats = sync.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.reserved, 0);
        assert_eq!(
            produced.load(Ordering::SeqCst),
            recycled.load(Ordering::SeqCst)
        );

        // A reset synchronizer serves a new run.
        sync.reset();
        std::thread::scope(|scope| {
            scope.spawn(|| sync.produce_in_background());
            let sample = sync.acquire().unwrap();
            sync.release(sample);
            sync.shut_down();
        });
        assert_eq!(
            produced.load(Ordering::SeqCst),
            recycled.load(Ordering::SeqCst)
        );
    }

    #[test]
    fn test_sampler_panic_shuts_down_and_drains() {
        let tree = flat_tree(1, 8);
        let sampler = FailingSampler::after(UniformSampler::new(vec![vec![8]], 4), 40);
        let fired = sampler.fired.clone();
        let sync = BufferedSynchronizer::new(&tree, sampler, 2, 4, 2, Duration::from_millis(10));

        std::thread::scope(|scope| {
            let producer = scope.spawn(|| sync.produce_in_background());
            let mut served = 0;
            while let Some(sample) = sync.acquire() {
                served += 1;
                sync.release(sample);
            }
            assert!(producer.join().is_err());
            assert!(served > 0);
        });

        assert!(fired.load(Ordering::SeqCst));
        assert!(sync.is_shut_down());
        let stats = sync.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.reserved, 0);
        assert_eq!(stats.buffered, 0);
        assert_eq!(stats.parked, 0);
    }
}
