//! C1: Clock & Timestamp. A thin, mockable wrapper around the monotonic
//! clock plus a refreshable "last heartbeat seen" marker shared by the
//! follower-expiry timer and the failure detector.
//!
//! Grounded in the teacher's `common/system_clock.rs`, generalized with the
//! `ManualResetCompletionSource`-style refresh the follower and failure
//! detector both need (spec §4.2, §4.11).

#[cfg(feature = "mock_time")]
pub use mock_instant::Instant;

#[cfg(not(feature = "mock_time"))]
pub use std::time::Instant;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Returns the current monotonic instant. Swappable for
/// `mock_instant::Instant` under the `mock_time` feature so tests can
/// advance time deterministically instead of sleeping.
pub fn now() -> Instant {
    Instant::now()
}

/// A lock-free "last heartbeat" marker. Stores elapsed-nanos-since-process-
/// start so it can live behind an `AtomicU64` instead of a mutex; refreshed
/// on every valid inbound `AppendEntries`/`InstallSnapshot`/granted `Vote`
/// (spec §4.2).
#[derive(Debug)]
pub struct HeartbeatMarker {
    epoch: Instant,
    last_nanos: AtomicU64,
}

impl HeartbeatMarker {
    pub fn new() -> Self {
        let epoch = now();
        HeartbeatMarker { epoch, last_nanos: AtomicU64::new(0) }
    }

    pub fn refresh(&self) {
        let elapsed = now().duration_since(self.epoch).as_nanos() as u64;
        self.last_nanos.store(elapsed, Ordering::SeqCst);
    }

    /// Elapsed time since the marker was last refreshed.
    pub fn elapsed(&self) -> Duration {
        let last = self.last_nanos.load(Ordering::SeqCst);
        let now_nanos = now().duration_since(self.epoch).as_nanos() as u64;
        Duration::from_nanos(now_nanos.saturating_sub(last))
    }
}

impl Default for HeartbeatMarker {
    fn default() -> Self {
        Self::new()
    }
}
