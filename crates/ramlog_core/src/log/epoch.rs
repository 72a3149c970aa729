//! Epoch-gated reclamation.
//!
//! Every operation that may hold references into log memory pins the epoch
//! current at its start. A cleaned segment is stamped with the epoch in which
//! cleaning completed; its memory may be reused only once no pinned operation
//! from that epoch or earlier is still running.

use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct EpochState {
    current: u64,
    /// Pinned epoch -> number of live guards.
    active: BTreeMap<u64, usize>,
}

/// Monotonic epoch counter plus the set of epochs still pinned.
#[derive(Debug)]
pub struct EpochTracker {
    state: Mutex<EpochState>,
    released: Condvar,
}

impl Default for EpochTracker {
    fn default() -> Self {
        Self::starting_at(0)
    }
}

impl EpochTracker {
    /// Creates a tracker at epoch 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracker whose current epoch is `epoch`.
    #[must_use]
    pub fn starting_at(epoch: u64) -> Self {
        Self {
            state: Mutex::new(EpochState {
                current: epoch,
                active: BTreeMap::new(),
            }),
            released: Condvar::new(),
        }
    }

    /// Current epoch.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.state.lock().current
    }

    /// Pins the current epoch until the returned guard is dropped.
    #[must_use]
    pub fn pin(self: &Arc<Self>) -> EpochGuard {
        let mut state = self.state.lock();
        let epoch = state.current;
        *state.active.entry(epoch).or_insert(0) += 1;
        EpochGuard {
            tracker: Arc::clone(self),
            epoch,
        }
    }

    /// Closes the current epoch and returns it.
    pub fn advance(&self) -> u64 {
        let mut state = self.state.lock();
        let closed = state.current;
        state.current += 1;
        closed
    }

    /// Oldest epoch still pinned, if any.
    #[must_use]
    pub fn earliest_active(&self) -> Option<u64> {
        self.state.lock().active.keys().next().copied()
    }

    /// Number of live guards.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.lock().active.values().sum()
    }

    /// Returns true when no guard pinned at `epoch` or earlier is alive.
    #[must_use]
    pub fn is_quiescent_through(&self, epoch: u64) -> bool {
        Self::quiescent(&self.state.lock(), epoch)
    }

    /// Blocks until no guard pinned at `epoch` or earlier is alive, or the
    /// timeout expires. Returns whether quiescence was reached.
    pub fn wait_for_quiescence(&self, epoch: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !Self::quiescent(&state, epoch) {
            if self.released.wait_until(&mut state, deadline).timed_out() {
                return Self::quiescent(&state, epoch);
            }
        }
        true
    }

    fn quiescent(state: &EpochState, epoch: u64) -> bool {
        state.active.keys().next().map_or(true, |&oldest| oldest > epoch)
    }

    fn release(&self, epoch: u64) {
        let mut state = self.state.lock();
        if let Some(count) = state.active.get_mut(&epoch) {
            *count -= 1;
            if *count == 0 {
                state.active.remove(&epoch);
            }
        }
        drop(state);
        self.released.notify_all();
    }
}

/// An operation in flight, pinned to the epoch it started in.
#[derive(Debug)]
pub struct EpochGuard {
    tracker: Arc<EpochTracker>,
    epoch: u64,
}

impl EpochGuard {
    /// Epoch this guard pins.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl Drop for EpochGuard {
    fn drop(&mut self) {
        self.tracker.release(self.epoch);
    }
}
