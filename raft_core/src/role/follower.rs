//! Follower role (spec §4.2).

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::clock::HeartbeatMarker;

/// `refreshRequested` is folded into `last_heartbeat`'s own refresh counter
/// (C1); this state only needs the timeout it is currently running with and
/// the transition-suppression counter.
#[derive(Debug)]
pub struct FollowerState {
    pub generation: u64,
    pub last_heartbeat: HeartbeatMarker,
    pub timeout: Duration,
    suppress_count: AtomicU32,
}

impl FollowerState {
    pub fn new(generation: u64, timeout: Duration) -> Self {
        FollowerState {
            generation,
            last_heartbeat: HeartbeatMarker::new(),
            timeout,
            suppress_count: AtomicU32::new(0),
        }
    }

    pub fn refresh(&self) {
        self.last_heartbeat.refresh();
    }

    /// True while a batch of locally-applied entries is being processed;
    /// expiry checks must not fire while this is held (spec §4.2,
    /// "TransitionSuppressionScope").
    pub fn is_suppressed(&self) -> bool {
        self.suppress_count.load(Ordering::SeqCst) > 0
    }

    pub fn suppress(&self) -> TransitionSuppressionScope<'_> {
        self.suppress_count.fetch_add(1, Ordering::SeqCst);
        TransitionSuppressionScope { state: self }
    }

    /// True once the timeout has elapsed since the last refresh and no
    /// suppression scope is active.
    pub fn has_expired(&self) -> bool {
        !self.is_suppressed() && self.last_heartbeat.elapsed() >= self.timeout
    }
}

pub struct TransitionSuppressionScope<'a> {
    state: &'a FollowerState,
}

impl Drop for TransitionSuppressionScope<'_> {
    fn drop(&mut self) {
        self.state.suppress_count.fetch_sub(1, Ordering::SeqCst);
    }
}
