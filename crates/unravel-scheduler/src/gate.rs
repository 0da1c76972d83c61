use parking_lot::{Condvar, Mutex};
use std::time::Duration;

use crate::CancellationToken;

// Waiters re-check their token at least this often.
const CANCEL_POLL: Duration = Duration::from_millis(20);

/// Resizable concurrency limit shared by the jobs of one task.
///
/// Rayon pools cannot shrink once built, so jobs take a permit here before running; lowering the
/// limit throttles new jobs while running ones finish.
#[derive(Debug)]
pub(crate) struct ConcurrencyGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

#[derive(Debug)]
struct GateState {
    limit: usize,
    active: usize,
}

impl ConcurrencyGate {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            state: Mutex::new(GateState {
                limit: limit.max(1),
                active: 0,
            }),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn limit(&self) -> usize {
        self.state.lock().limit
    }

    pub(crate) fn set_limit(&self, limit: usize) {
        self.state.lock().limit = limit.max(1);
        self.changed.notify_all();
    }

    /// Blocks until a permit is free. Returns `None` once `token` is cancelled.
    pub(crate) fn acquire(&self, token: &CancellationToken) -> Option<GatePermit<'_>> {
        let mut state = self.state.lock();
        loop {
            if token.is_cancelled() {
                return None;
            }
            if state.active < state.limit {
                state.active += 1;
                return Some(GatePermit { gate: self });
            }
            self.changed.wait_for(&mut state, CANCEL_POLL);
        }
    }

    /// Wakes every waiter so it can observe cancellation.
    pub(crate) fn wake_all(&self) {
        let _state = self.state.lock();
        self.changed.notify_all();
    }
}

pub(crate) struct GatePermit<'a> {
    gate: &'a ConcurrencyGate,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        state.active = state.active.saturating_sub(1);
        drop(state);
        self.gate.changed.notify_one();
    }
}
