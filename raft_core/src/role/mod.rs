//! C7: role states (spec §4.2-§4.4, "Role state" in §3).
//!
//! `RoleState` is the sealed variant the cluster controller owns exactly one
//! of at a time (spec §9, "Cyclic ownership"); states carry no owning
//! reference back to the controller, only the data needed to run their own
//! timer/loop. Transitions replace the whole variant.

pub mod candidate;
pub mod follower;
pub mod leader;

pub use candidate::CandidateState;
pub use follower::FollowerState;
pub use leader::LeaderState;

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::TermIndex;

static GENERATION: AtomicU64 = AtomicU64::new(0);

/// A fresh monotone generation for a new state instance (spec §9, "weak
/// caller-state identity"): a late timer firing against a since-replaced
/// state compares its captured generation against the live one and is
/// ignored on mismatch.
pub fn next_generation() -> u64 {
    GENERATION.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
pub enum RoleState {
    Standby { resumable: bool },
    Follower(FollowerState),
    Candidate(CandidateState),
    Leader(LeaderState),
}

impl RoleState {
    pub fn name(&self) -> &'static str {
        match self {
            RoleState::Standby { .. } => "standby",
            RoleState::Follower(_) => "follower",
            RoleState::Candidate(_) => "candidate",
            RoleState::Leader(_) => "leader",
        }
    }

    pub fn term(&self) -> Option<TermIndex> {
        match self {
            RoleState::Candidate(c) => Some(c.term),
            RoleState::Leader(l) => Some(l.term),
            _ => None,
        }
    }

    pub fn generation(&self) -> Option<u64> {
        match self {
            RoleState::Follower(f) => Some(f.generation),
            RoleState::Candidate(c) => Some(c.generation),
            RoleState::Leader(l) => Some(l.generation),
            RoleState::Standby { .. } => None,
        }
    }
}
