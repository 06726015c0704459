//! Cooperative cancellation shared between the runner and its workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Hot loops read the clock once per this many ticks.
pub const DEADLINE_POLL_INTERVAL: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token sharing this flag that also trips once `timeout` has elapsed.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            flag: Arc::clone(&self.flag),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// True once cancelled or past the deadline. Passing the deadline trips the
    /// shared flag so every clone observes it.
    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::Acquire) {
            return true;
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.cancel();
                true
            }
            _ => false,
        }
    }

    /// Per-iteration check for hot loops: one atomic load per tick, with the
    /// deadline consulted on tick 0 and every [`DEADLINE_POLL_INTERVAL`] ticks.
    pub fn poll(&self, tick: usize) -> bool {
        if self.flag.load(Ordering::Acquire) {
            return true;
        }
        tick % DEADLINE_POLL_INTERVAL == 0 && self.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
