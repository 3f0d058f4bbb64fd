//! Time source used by the heartbeat loop.
//!
//! A trait rather than a direct `SystemTime::now()` call so tests can drive
//! the heartbeat cadence (`spec.md` §8 invariant 5) without sleeping in real
//! time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of the current epoch-seconds time.
pub trait Clock: Send + Sync {
    /// Current time, in whole seconds since the Unix epoch.
    fn now_secs(&self) -> u64;
}

/// Wall-clock time via `SystemTime::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// A clock that only advances when told to, for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    secs: AtomicU64,
}

impl ManualClock {
    /// Create a manual clock starting at `start_secs`.
    pub fn new(start_secs: u64) -> Self {
        Self {
            secs: AtomicU64::new(start_secs),
        }
    }

    /// Advance the clock by `delta` seconds.
    pub fn advance(&self, delta: u64) {
        self.secs.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}

/// Convenience free function used by call sites that don't need to swap clocks.
pub fn now_secs() -> u64 {
    SystemClock.now_secs()
}
