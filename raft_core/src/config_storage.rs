//! C9: cluster configuration storage adapter (spec §3 "Cluster
//! configuration", §6).

use std::collections::BTreeMap;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::RaftResult;
use crate::types::ServerId;

/// Ordered member-id -> endpoint mapping with a stable fingerprint, used to
/// detect whether a follower's locally proposed configuration matches the
/// leader's (spec §4.8's `(configFingerprintMatches, applyConfig)` table).
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ClusterConfiguration {
    pub members: BTreeMap<ServerId, String>,
}

impl ClusterConfiguration {
    pub fn new(members: BTreeMap<ServerId, String>) -> Self {
        ClusterConfiguration { members }
    }

    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Sha256::new();
        for (id, endpoint) in &self.members {
            hasher.update(id.0.to_le_bytes());
            hasher.update(endpoint.as_bytes());
        }
        let digest = hasher.finalize();
        u64::from_le_bytes(digest[0..8].try_into().unwrap())
    }

    pub fn quorum_size(&self) -> usize {
        self.members.len() / 2 + 1
    }
}

#[async_trait]
pub trait ConfigurationStorage: Send + Sync {
    async fn active(&self) -> ClusterConfiguration;
    async fn proposed(&self) -> Option<ClusterConfiguration>;
    async fn propose(&self, config: ClusterConfiguration) -> RaftResult<()>;
    /// Promotes `proposed` to `active`, returning the members added/removed
    /// relative to the prior active set (spec: "memberAdded"/"memberRemoved"
    /// events, SPEC_FULL.md §B).
    async fn apply(&self) -> RaftResult<(Vec<ServerId>, Vec<ServerId>)>;
}

#[derive(Debug, Default)]
struct Inner {
    active: ClusterConfiguration,
    proposed: Option<ClusterConfiguration>,
}

pub struct InMemoryConfigurationStorage {
    inner: RwLock<Inner>,
}

impl InMemoryConfigurationStorage {
    pub fn new(initial: ClusterConfiguration) -> Self {
        InMemoryConfigurationStorage {
            inner: RwLock::new(Inner { active: initial, proposed: None }),
        }
    }
}

#[async_trait]
impl ConfigurationStorage for InMemoryConfigurationStorage {
    async fn active(&self) -> ClusterConfiguration {
        self.inner.read().await.active.clone()
    }

    async fn proposed(&self) -> Option<ClusterConfiguration> {
        self.inner.read().await.proposed.clone()
    }

    async fn propose(&self, config: ClusterConfiguration) -> RaftResult<()> {
        self.inner.write().await.proposed = Some(config);
        Ok(())
    }

    async fn apply(&self) -> RaftResult<(Vec<ServerId>, Vec<ServerId>)> {
        let mut inner = self.inner.write().await;
        let Some(proposed) = inner.proposed.take() else {
            return Ok((Vec::new(), Vec::new()));
        };
        let added: Vec<ServerId> = proposed
            .members
            .keys()
            .filter(|id| !inner.active.members.contains_key(id))
            .copied()
            .collect();
        let removed: Vec<ServerId> = inner
            .active
            .members
            .keys()
            .filter(|id| !proposed.members.contains_key(id))
            .copied()
            .collect();
        inner.active = proposed;
        Ok((added, removed))
    }
}
