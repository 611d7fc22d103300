//! Pluggable schedulers.
//!
//! The interpreter asks the scheduler for the next thread before every step
//! (except the very first, which is always the main thread). The runnable
//! list is ascending, never empty, and includes commit pseudo-threads with
//! negative ids. Returning `None`, a blocked thread, or an unknown thread
//! aborts the run; that is the scheduler's stop sentinel.
//!
//! The interpreter itself has no randomness; [`RandomScheduler`] owns a
//! seeded ChaCha stream so random exploration stays reproducible.

use std::collections::VecDeque;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use skein_types::ThreadId;

/// Chooses the next thread to step.
pub trait Scheduler {
    /// Pick from `runnable` (ascending, non-empty), given the previously
    /// stepped thread. `None` aborts the run.
    fn schedule(&mut self, prior: Option<&ThreadId>, runnable: &[ThreadId]) -> Option<ThreadId>;
}

impl<F> Scheduler for F
where
    F: FnMut(Option<&ThreadId>, &[ThreadId]) -> Option<ThreadId>,
{
    fn schedule(&mut self, prior: Option<&ThreadId>, runnable: &[ThreadId]) -> Option<ThreadId> {
        self(prior, runnable)
    }
}

/// Cooperative round-robin: keep the current thread while it can run, else
/// rotate to the next runnable id.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin;

impl Scheduler for RoundRobin {
    fn schedule(&mut self, prior: Option<&ThreadId>, runnable: &[ThreadId]) -> Option<ThreadId> {
        let Some(prior) = prior else {
            return runnable.first().cloned();
        };
        if runnable.contains(prior) {
            return Some(prior.clone());
        }
        runnable
            .iter()
            .find(|tid| *tid > prior)
            .or_else(|| runnable.first())
            .cloned()
    }
}

/// Uniform random choice from a deterministic seeded stream.
#[derive(Debug)]
pub struct RandomScheduler {
    rng: ChaCha8Rng,
}

impl RandomScheduler {
    /// Create a scheduler from a seed. Equal seeds give equal schedules.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Scheduler for RandomScheduler {
    fn schedule(&mut self, _prior: Option<&ThreadId>, runnable: &[ThreadId]) -> Option<ThreadId> {
        let index = self.rng.next_u32() as usize % runnable.len();
        runnable.get(index).cloned()
    }
}

/// Replays a fixed decision list, then stops.
///
/// Useful for forcing a specific interleaving in tests; exhausting the
/// script (or scripting an impossible pick) aborts the run.
#[derive(Debug, Clone, Default)]
pub struct ScriptScheduler {
    script: VecDeque<ThreadId>,
}

impl ScriptScheduler {
    /// Create a scheduler replaying the given picks in order.
    #[must_use]
    pub fn new(script: impl IntoIterator<Item = ThreadId>) -> Self {
        Self {
            script: script.into_iter().collect(),
        }
    }

    /// Picks not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl Scheduler for ScriptScheduler {
    fn schedule(&mut self, _prior: Option<&ThreadId>, _runnable: &[ThreadId]) -> Option<ThreadId> {
        self.script.pop_front()
    }
}
