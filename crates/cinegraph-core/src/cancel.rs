//! Cooperative cancellation and monotonic job stamps.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct CancelState {
    cancelled: bool,
    heard: bool,
}

/// A cancellation flag shared between a requester and a worker.
///
/// Checking the flag through [`is_cancelled`](Self::is_cancelled) records that
/// the worker heard it, so the requester can tell a stalled worker from one
/// that is already winding down.
#[derive(Debug, Default)]
pub struct CancelAtom {
    state: Mutex<CancelState>,
}

pub type CancelAtomPtr = Arc<CancelAtom>;

impl CancelAtom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        let mut state = self.state.lock();
        if state.cancelled {
            state.heard = true;
        }
        state.cancelled
    }

    pub fn cancel(&self) {
        self.state.lock().cancelled = true;
    }

    /// Whether a worker has observed the cancellation.
    pub fn heard_cancel(&self) -> bool {
        self.state.lock().heard
    }
}

// ── Job time ────────────────────────────────────────────────────

static JOB_CLOCK: AtomicU64 = AtomicU64::new(1);

/// A strictly increasing stamp used to order invalidations against renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct JobTime(u64);

impl JobTime {
    /// Take the next stamp from the process-wide clock.
    pub fn now() -> Self {
        Self(JOB_CLOCK.fetch_add(1, Ordering::SeqCst))
    }

    /// Replace this stamp with a fresh one.
    pub fn acquire(&mut self) {
        *self = Self::now();
    }

    /// The "never" stamp, older than every issued one.
    pub const fn null() -> Self {
        Self(0)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_heard_only_after_check() {
        let atom = CancelAtom::new();
        assert!(!atom.is_cancelled());
        atom.cancel();
        assert!(!atom.heard_cancel());
        assert!(atom.is_cancelled());
        assert!(atom.heard_cancel());
    }

    #[test]
    fn test_job_time_monotonic() {
        let a = JobTime::now();
        let mut b = a;
        b.acquire();
        assert!(b > a);
        assert!(JobTime::null() < a);
    }
}
