//! In-process cluster harness for integration tests.
//!
//! Plays the role the teacher's `simulator::ClusterSim` + `SimNetwork` play
//! in its own test suite -- a deterministic stand-in for a real network --
//! but wired against the async `Transport` trait directly instead of a
//! packet-loss-simulated queue, since there is no longer a raft-thread/mpsc
//! boundary to bridge.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use raft_core::config_storage::InMemoryConfigurationStorage;
use raft_core::error::{RaftError, RaftResult};
use raft_core::log::InMemoryLog;
use raft_core::member::ClusterMember;
use raft_core::transport::{AppendEntriesArgs, InstallSnapshotArgs, PreVoteResult, Transport};
use raft_core::types::{LogEntry, LogIndex, RpcResult, ServerId, TermIndex};
use raft_core::{ClusterConfiguration, RaftCluster, RaftConfig};

pub type TestCommand = u64;

/// A direct async call into a peer's `RaftCluster`, gated by a shared
/// up/down flag so tests can simulate partitions without touching a real
/// socket.
struct LoopbackTransport {
    sender: ServerId,
    target: Arc<RaftCluster<TestCommand>>,
    link_up: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn append_entries(&self, args: AppendEntriesArgs) -> RaftResult<RpcResult<bool>> {
        if !self.link_up.load(Ordering::SeqCst) {
            return Err(RaftError::MemberUnavailable(self.sender));
        }
        let entries = args
            .entries
            .into_iter()
            .map(|wire| LogEntry {
                index: wire.index,
                term: wire.term,
                is_snapshot: wire.is_snapshot,
                command_id: wire.command_id,
                timestamp: std::time::SystemTime::now(),
                command: None,
            })
            .collect();
        let decoded = raft_core::AppendEntriesRequest {
            term: args.term,
            prev_log_index: args.prev_log_index,
            prev_log_term: args.prev_log_term,
            entries,
            leader_commit: args.leader_commit,
            config_fingerprint: args.config_fingerprint,
            apply_config: args.apply_config,
        };
        self.target.append_entries(self.sender, decoded).await
    }

    async fn install_snapshot(&self, args: InstallSnapshotArgs) -> RaftResult<RpcResult<bool>> {
        if !self.link_up.load(Ordering::SeqCst) {
            return Err(RaftError::MemberUnavailable(self.sender));
        }
        self.target.install_snapshot(self.sender, args).await
    }

    async fn vote(
        &self,
        term: TermIndex,
        last_log_index: LogIndex,
        last_log_term: TermIndex,
    ) -> RaftResult<RpcResult<bool>> {
        if !self.link_up.load(Ordering::SeqCst) {
            return Err(RaftError::MemberUnavailable(self.sender));
        }
        self.target.vote(self.sender, term, last_log_index, last_log_term).await
    }

    async fn pre_vote(
        &self,
        next_term: TermIndex,
        last_log_index: LogIndex,
        last_log_term: TermIndex,
    ) -> RaftResult<PreVoteResult> {
        if !self.link_up.load(Ordering::SeqCst) {
            return Err(RaftError::MemberUnavailable(self.sender));
        }
        self.target.pre_vote(next_term, last_log_index, last_log_term).await
    }

    async fn synchronize(&self, commit_index: LogIndex) -> RaftResult<Option<LogIndex>> {
        if !self.link_up.load(Ordering::SeqCst) {
            return Err(RaftError::MemberUnavailable(self.sender));
        }
        match self.target.synchronize(commit_index).await {
            Ok(index) => Ok(Some(index)),
            Err(RaftError::NotLeader) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn resign(&self) -> RaftResult<bool> {
        self.target.resign().await
    }

    async fn cancel_pending_requests(&self) {}
}

pub struct ClusterHarness {
    pub nodes: Vec<Arc<RaftCluster<TestCommand>>>,
    links: HashMap<(ServerId, ServerId), Arc<AtomicBool>>,
}

impl ClusterHarness {
    /// Builds `size` nodes, fully wired to each other, all starting in
    /// `Follower`.
    pub async fn new(size: u64, config: RaftConfig) -> Self {
        let ids: Vec<ServerId> = (0..size).map(ServerId).collect();
        let mut links = HashMap::new();
        let mut nodes = Vec::new();

        // Two-phase build: construct every node first (each needs a stable
        // `Arc` to be the loopback target for everyone else), then attach
        // each node's remote members once all `Arc`s exist.
        let mut bare: Vec<Arc<RaftCluster<TestCommand>>> = Vec::new();
        for &id in &ids {
            let log = InMemoryLog::new();
            let active = ClusterConfiguration::new(ids.iter().map(|id| (*id, format!("node-{}", id.0))).collect());
            let config_storage = Arc::new(InMemoryConfigurationStorage::new(active));
            bare.push(RaftCluster::new(id, config, log, config_storage, Vec::new(), None));
        }

        for &id in &ids {
            let this = bare.iter().find(|n| n.local_id() == id).unwrap();
            this.add_member(Arc::new(ClusterMember::local(id, format!("node-{}", id.0)))).await;
            for &peer_id in &ids {
                if peer_id == id {
                    continue;
                }
                let peer = bare.iter().find(|n| n.local_id() == peer_id).unwrap();
                let link_up = Arc::new(AtomicBool::new(true));
                links.insert((id, peer_id), Arc::clone(&link_up));
                let transport = LoopbackTransport { sender: id, target: Arc::clone(peer), link_up };
                this.add_member(Arc::new(ClusterMember::remote(peer_id, format!("node-{}", peer_id.0), Box::new(transport))))
                    .await;
            }
            nodes.push(Arc::clone(this));
        }

        ClusterHarness { nodes, links }
    }

    pub async fn start_all(&self) {
        for node in &self.nodes {
            node.start().await.expect("node should start");
        }
    }

    /// Cuts every link between `left` and `right` in both directions.
    pub fn partition(&self, left: &[ServerId], right: &[ServerId]) {
        for &l in left {
            for &r in right {
                if let Some(flag) = self.links.get(&(l, r)) {
                    flag.store(false, Ordering::SeqCst);
                }
                if let Some(flag) = self.links.get(&(r, l)) {
                    flag.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    pub fn heal(&self) {
        for flag in self.links.values() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    pub fn node(&self, id: u64) -> Arc<RaftCluster<TestCommand>> {
        Arc::clone(&self.nodes[id as usize])
    }

    pub async fn current_leader_count(&self) -> usize {
        let mut count = 0;
        for node in &self.nodes {
            if node.is_leader().await {
                count += 1;
            }
        }
        count
    }

    pub async fn wait_until<F, Fut>(&self, mut check: F, timeout: std::time::Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if check().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

pub fn fast_config() -> RaftConfig {
    RaftConfig {
        election_timeout: raft_core::ElectionTimeout { min_ms: 60, max_ms: 120 },
        heartbeat_threshold: 0.3,
        clock_drift_bound: 2.0,
        partitioning: false,
        standby: false,
        aggressive_leader_stickiness: false,
    }
}
