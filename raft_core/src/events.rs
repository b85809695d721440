//! Event surface (spec §6, "Events surfaced") and the `readiness` signal.
//!
//! Modeled as a broadcast channel rather than the teacher's delegate-style
//! callback list: `tokio::sync::broadcast` is the idiomatic async
//! equivalent when there can be zero or many independent subscribers, and
//! lagging subscribers simply miss old events instead of blocking emitters.

use tokio::sync::{broadcast, Notify};

use crate::types::ServerId;

#[derive(Debug, Clone)]
pub enum RaftEvent {
    LeaderChanged { old_leader: Option<ServerId>, new_leader: Option<ServerId> },
    ReplicationCompleted { member: ServerId },
    MemberAdded { member: ServerId },
    MemberRemoved { member: ServerId },
}

/// Holds the broadcast sender plus the one-shot `readiness` gate. Cloned
/// receivers are handed out via `subscribe()`; the cluster controller holds
/// the only sender.
pub struct EventBus {
    sender: broadcast::Sender<RaftEvent>,
    readiness: Notify,
    ready: std::sync::atomic::AtomicBool,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        EventBus {
            sender,
            readiness: Notify::new(),
            ready: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RaftEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: RaftEvent) {
        // No subscribers is a normal, expected case (spec: events are
        // observational, not load-bearing for correctness).
        let _ = self.sender.send(event);
    }

    /// Completes once the node is serving (spec §4.1, "signals the
    /// readiness event"). Idempotent: later calls are no-ops.
    pub fn mark_ready(&self) {
        if !self.ready.swap(true, std::sync::atomic::Ordering::SeqCst) {
            self.readiness.notify_waiters();
        }
    }

    pub async fn wait_ready(&self) {
        if self.ready.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        let notified = self.readiness.notified();
        if self.ready.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
