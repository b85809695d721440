//! Cluster member model (spec §3, "Cluster member (TMember)").

use tokio::sync::Mutex;

use crate::transport::Transport;
use crate::types::{LogIndex, ServerId, TermIndex};

/// Per-follower replication bookkeeping. Owned by the cluster controller,
/// mutated only by that member's `Replicator` (spec §5, "Shared-resource
/// policy").
#[derive(Debug, Clone, Copy)]
pub struct ReplicationState {
    pub next_index: LogIndex,
    pub match_index: LogIndex,
    pub preceding_index: LogIndex,
    pub preceding_term: TermIndex,
}

impl ReplicationState {
    pub fn new(last_log_index: LogIndex) -> Self {
        ReplicationState {
            next_index: last_log_index.succ(),
            match_index: LogIndex(0),
            preceding_index: LogIndex(0),
            preceding_term: TermIndex(0),
        }
    }
}

/// A cluster member: a stable id, its endpoint-bearing transport handle, and
/// whether it is the local node. `replication_state` is `None` for the
/// local member (it is never replicated to over the wire).
pub struct ClusterMember {
    pub id: ServerId,
    pub endpoint: String,
    pub is_remote: bool,
    pub transport: Option<Box<dyn Transport>>,
    pub replication_state: Mutex<Option<ReplicationState>>,
}

impl std::fmt::Debug for ClusterMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterMember")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("is_remote", &self.is_remote)
            .finish()
    }
}

impl ClusterMember {
    pub fn local(id: ServerId, endpoint: String) -> Self {
        ClusterMember {
            id,
            endpoint,
            is_remote: false,
            transport: None,
            replication_state: Mutex::new(None),
        }
    }

    pub fn remote(id: ServerId, endpoint: String, transport: Box<dyn Transport>) -> Self {
        ClusterMember {
            id,
            endpoint,
            is_remote: true,
            transport: Some(transport),
            replication_state: Mutex::new(None),
        }
    }

    pub async fn reset_replication_state(&self, last_log_index: LogIndex) {
        *self.replication_state.lock().await = Some(ReplicationState::new(last_log_index));
    }

    pub async fn clear_replication_state(&self) {
        *self.replication_state.lock().await = None;
    }
}
