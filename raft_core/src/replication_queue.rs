//! C6: replication queue barrier/valve (spec §4.4 step 7, §9).
//!
//! A reusable, version-checked completion gate: `force_replication` callers
//! that arrive mid-round must observe the *next* full heartbeat round, not
//! the one already in flight. Modeled after the
//! "`ManualResetCompletionSource{version, status, ...}`" pattern in spec §9,
//! built from `tokio::sync::Notify` plus a generation counter rather than a
//! hand-rolled future (the idiomatic Rust shape for a reusable async gate).

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct ReplicationQueue {
    /// Bumped right before a round's step-1 snapshot is taken.
    started: AtomicU64,
    /// Bumped once a round's results have been gathered and acted on.
    completed: AtomicU64,
    notify: Notify,
}

impl ReplicationQueue {
    pub fn new() -> Self {
        ReplicationQueue { started: AtomicU64::new(0), completed: AtomicU64::new(0), notify: Notify::new() }
    }

    /// Waits until the first round that *starts* after this call completes.
    /// Binds to `started` rather than `completed` at call time: if a round
    /// is already in flight (its step-1 snapshot already taken) when this is
    /// called, that round's own completion does not satisfy the wait, since
    /// it predates the call -- only the round that starts after it does
    /// (spec §9: "a forceReplication caller that arrives while a round is in
    /// flight must observe the next round's completion, not the in-flight
    /// one").
    pub async fn wait_for_next_round(&self) {
        let observed = self.started.load(Ordering::SeqCst);
        loop {
            let notified = self.notify.notified();
            if self.completed.load(Ordering::SeqCst) > observed {
                return;
            }
            notified.await;
            if self.completed.load(Ordering::SeqCst) > observed {
                return;
            }
        }
    }

    /// Called once per heartbeat round immediately before that round's
    /// step-1 snapshot is taken, so any caller arriving after this point is
    /// bound to the *following* round rather than the one now in flight.
    pub fn start_round(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    /// Called once per heartbeat round after replication results for that
    /// round have been gathered and acted on. Switches the valve so queued
    /// `wait_for_next_round` callers bound to an earlier round return.
    pub fn complete_round(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn current_round(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }
}
