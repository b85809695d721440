//! C3: leader lease (spec §4.5).
//!
//! Grounded in the lease-gating shape of
//! `WiscADSL-summerset`'s `multipaxos/leaderlease.rs` (`is_stable_leader`
//! checking a deadline before serving a local read), simplified to the
//! single rolling deadline spec §4.5 describes rather than a full
//! per-peer grant set.

use tokio::sync::RwLock;

use crate::clock::{now, Instant};
use crate::config::RaftConfig;

#[derive(Debug)]
pub struct LeaderLease {
    deadline: RwLock<Option<Instant>>,
}

impl LeaderLease {
    pub fn new() -> Self {
        LeaderLease { deadline: RwLock::new(None) }
    }

    /// Renews the lease to `round_start + electionTimeout/clockDriftBound`
    /// (spec invariant 5: never further out than that bound).
    pub async fn renew(&self, round_start: Instant, config: &RaftConfig) {
        let deadline = round_start + config.lease_duration();
        *self.deadline.write().await = Some(deadline);
    }

    /// True while `now < deadline`.
    pub async fn is_valid(&self) -> bool {
        match *self.deadline.read().await {
            Some(deadline) => now() < deadline,
            None => false,
        }
    }

    /// Destroys the lease on step-down (spec: "deadline = 0").
    pub async fn destroy(&self) {
        *self.deadline.write().await = None;
    }
}

impl Default for LeaderLease {
    fn default() -> Self {
        Self::new()
    }
}
