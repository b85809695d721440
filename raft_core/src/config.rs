//! Cluster-wide tunables (spec §6, "Configuration surface for the
//! controller"). Generalizes the teacher's `RaftConfig`, which only carried
//! the election-timeout and heartbeat-interval knobs, to the full surface
//! the controller needs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Inclusive randomized election-timeout bounds, in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ElectionTimeout {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl ElectionTimeout {
    pub fn sample(&self, rng: &mut rand_chacha::ChaCha8Rng) -> Duration {
        use rand::Rng;
        let ms = if self.max_ms > self.min_ms {
            rng.gen_range(self.min_ms..self.max_ms)
        } else {
            self.min_ms
        };
        Duration::from_millis(ms)
    }

    pub fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RaftConfig {
    /// Randomized follower/candidate election timeout bounds.
    pub election_timeout: ElectionTimeout,
    /// Heartbeat period as a fraction of `election_timeout.min`, in `(0, 1]`.
    pub heartbeat_threshold: f64,
    /// Lease duration = `election_timeout.min / clock_drift_bound`, `>= 1.0`.
    pub clock_drift_bound: f64,
    /// Strict joint-quorum commit even during a proposed reconfiguration
    /// (spec: "no -- strict"). Kept as a config knob for forward
    /// compatibility; the core always behaves as if this is `false`.
    pub partitioning: bool,
    /// Start life in `Standby` rather than `Follower`.
    pub standby: bool,
    /// Leaders veto pre-votes from everyone while they are leader (spec §4.6).
    pub aggressive_leader_stickiness: bool,
}

impl RaftConfig {
    pub fn heartbeat_period(&self) -> Duration {
        self.election_timeout.min().mul_f64(self.heartbeat_threshold)
    }

    pub fn lease_duration(&self) -> Duration {
        self.election_timeout.min().div_f64(self.clock_drift_bound)
    }
}

impl Default for RaftConfig {
    fn default() -> Self {
        RaftConfig {
            election_timeout: ElectionTimeout { min_ms: 150, max_ms: 300 },
            heartbeat_threshold: 0.3,
            clock_drift_bound: 2.0,
            partitioning: false,
            standby: false,
            aggressive_leader_stickiness: false,
        }
    }
}
