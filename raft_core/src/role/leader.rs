//! Leader role (spec §4.4, §4.5).
//!
//! Every field the heartbeat loop needs to touch across a network
//! round-trip is behind its own `Arc`, so the loop can clone what it needs
//! out of `RoleState::Leader` under a brief hold of the transition lock and
//! then run the round itself without holding that lock (spec §5,
//! "Suspension ... never holds the transition lock").

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::clock::HeartbeatMarker;
use crate::lease::LeaderLease;
use crate::replication_queue::ReplicationQueue;
use crate::term_cache::PrecedingTermCache;
use crate::types::{ServerId, TermIndex};

#[derive(Debug)]
pub struct LeaderState {
    pub generation: u64,
    pub term: TermIndex,
    pub lease: Arc<LeaderLease>,
    pub leadership_token: CancellationToken,
    pub replication_queue: Arc<ReplicationQueue>,
    pub term_cache: Arc<AsyncMutex<PrecedingTermCache>>,
    pub last_heartbeat: Arc<HeartbeatMarker>,
    /// Signals an out-of-turn heartbeat round for `forceReplication` (spec
    /// §4.1, §4.4 step 8).
    pub replication_trigger: Arc<Notify>,
    /// Single-flight guard per member for `unavailableMemberDetected` (spec
    /// §4.11): `true` once that member's eviction callback has already
    /// fired this term.
    pub eviction_notified: Arc<std::sync::Mutex<HashMap<ServerId, bool>>>,
}

impl LeaderState {
    pub fn new(generation: u64, term: TermIndex) -> Self {
        LeaderState {
            generation,
            term,
            lease: Arc::new(LeaderLease::new()),
            leadership_token: CancellationToken::new(),
            replication_queue: Arc::new(ReplicationQueue::new()),
            term_cache: Arc::new(AsyncMutex::new(PrecedingTermCache::new())),
            last_heartbeat: Arc::new(HeartbeatMarker::new()),
            replication_trigger: Arc::new(Notify::new()),
            eviction_notified: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    /// Single-flight compare-and-swap guard: returns `true` the first time
    /// it is called for a given member this term, `false` on every
    /// subsequent call (spec §4.11).
    pub fn mark_eviction_notified(&self, member: ServerId) -> bool {
        let mut guard = self.eviction_notified.lock().unwrap();
        let already = guard.insert(member, true).unwrap_or(false);
        !already
    }

    pub fn force_replication(&self) {
        self.replication_trigger.notify_one();
    }
}

impl Drop for LeaderState {
    fn drop(&mut self) {
        self.leadership_token.cancel();
    }
}
