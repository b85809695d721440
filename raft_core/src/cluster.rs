//! C8: the cluster controller (spec §4.1, data-flow summary in §2).
//!
//! Owns the single transition lock that serializes role changes with
//! incoming RPCs (spec §5). `PreVote` is the one handler that runs outside
//! it. Grounded in the shape of the teacher's `RaftNode`/`NodeState`
//! transition-function pair, generalized from a synchronous OS-thread-driven
//! loop to an async controller whose suspension points (log I/O, outbound
//! RPCs, heartbeat waits) are explicit `.await`s (see SPEC_FULL.md §A).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::{Mutex as AsyncMutex, Notify, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::now;
use crate::config::RaftConfig;
use crate::config_storage::{ClusterConfiguration, ConfigurationStorage};
use crate::error::{RaftError, RaftResult};
use crate::events::{EventBus, RaftEvent};
use crate::failure_detector::FailureDetector;
use crate::log::PersistentLog;
use crate::member::ClusterMember;
use crate::replicator::{ReplicationOutcome, Replicator, RetainedLogFloor};
use crate::role::candidate::CandidateState;
use crate::role::follower::FollowerState;
use crate::role::leader::LeaderState;
use crate::role::{next_generation, RoleState};
use crate::transport::{InstallSnapshotArgs, PreVoteResult};
use crate::types::{LogCommand, LogEntry, LogIndex, RpcResult, ServerId, TermIndex};

/// Callback invoked when a follower's failure detector goes unhealthy while
/// monitored (spec §4.11, "the callback is a collaborator; the core does
/// not itself remove members").
pub type EvictionHook = Arc<dyn Fn(ServerId, CancellationToken) + Send + Sync>;

/// Decoded inbound `AppendEntries` (spec §4.8). Distinct from
/// `transport::AppendEntriesArgs`, which carries the opaque wire form a
/// `Transport` sends between members -- the binding (e.g. `raft_core_grpc`)
/// is responsible for decoding wire entries into `LogEntry<C>` before
/// calling this handler.
#[derive(Debug)]
pub struct AppendEntriesRequest<C: LogCommand> {
    pub term: TermIndex,
    pub prev_log_index: LogIndex,
    pub prev_log_term: TermIndex,
    pub entries: Vec<LogEntry<C>>,
    pub leader_commit: LogIndex,
    pub config_fingerprint: u64,
    pub apply_config: bool,
}

/// Result of a candidate's voting phase, decided once the timeout fires,
/// every vote RPC has resolved, or the election is overtaken.
enum CandidateOutcome {
    Majority,
    HigherTerm(TermIndex),
    Exhausted,
    TimedOut,
    Stale,
}

pub struct RaftCluster<C: LogCommand> {
    local_id: ServerId,
    config: RaftConfig,
    log: Arc<dyn PersistentLog<C>>,
    config_storage: Arc<dyn ConfigurationStorage>,
    members: RwLock<HashMap<ServerId, Arc<ClusterMember>>>,
    failure_detectors: AsyncMutex<HashMap<ServerId, FailureDetector>>,
    role: AsyncMutex<RoleState>,
    leader: RwLock<Option<ServerId>>,
    leader_changed: Notify,
    lifecycle_token: CancellationToken,
    events: EventBus,
    rng: std::sync::Mutex<ChaCha8Rng>,
    eviction_hook: Option<EvictionHook>,
}

impl<C: LogCommand> RaftCluster<C> {
    pub fn new(
        local_id: ServerId,
        config: RaftConfig,
        log: Arc<dyn PersistentLog<C>>,
        config_storage: Arc<dyn ConfigurationStorage>,
        members: Vec<Arc<ClusterMember>>,
        eviction_hook: Option<EvictionHook>,
    ) -> Arc<Self> {
        let mut map = HashMap::new();
        for member in members {
            map.insert(member.id, member);
        }
        Arc::new(RaftCluster {
            local_id,
            config,
            log,
            config_storage,
            members: RwLock::new(map),
            failure_detectors: AsyncMutex::new(HashMap::new()),
            role: AsyncMutex::new(RoleState::Standby { resumable: true }),
            leader: RwLock::new(None),
            leader_changed: Notify::new(),
            lifecycle_token: CancellationToken::new(),
            events: EventBus::new(),
            rng: std::sync::Mutex::new(ChaCha8Rng::from_entropy()),
            eviction_hook,
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn local_id(&self) -> ServerId {
        self.local_id
    }

    pub async fn current_leader(&self) -> Option<ServerId> {
        *self.leader.read().await
    }

    pub async fn is_leader(&self) -> bool {
        matches!(&*self.role.lock().await, RoleState::Leader(_))
    }

    pub async fn last_committed_index(&self) -> LogIndex {
        self.log.last_committed_entry_index().await
    }

    // ---- public API (spec §4.1) ----------------------------------------

    pub async fn start(self: &Arc<Self>) -> RaftResult<()> {
        if self.config.standby {
            *self.role.lock().await = RoleState::Standby { resumable: true };
        } else {
            let mut role = self.role.lock().await;
            self.transition_follower(&mut role, None, None).await?;
        }
        self.events.mark_ready();
        info!(local_id = ?self.local_id, "raft cluster started");
        Ok(())
    }

    pub async fn stop(self: &Arc<Self>) {
        self.lifecycle_token.cancel();
        for member in self.members.read().await.values() {
            if let Some(transport) = member.transport.as_ref() {
                transport.cancel_pending_requests().await;
            }
        }
        *self.role.lock().await = RoleState::Standby { resumable: false };
    }

    /// Appends locally, forces replication, waits for commit (spec §4.1).
    pub async fn replicate(self: &Arc<Self>, command: C) -> RaftResult<bool> {
        let term = {
            let role = self.role.lock().await;
            match &*role {
                RoleState::Leader(leader) => leader.term,
                _ => return Err(RaftError::NotLeader),
            }
        };
        let index = self.log.last_entry_index().await.succ();
        let entry = LogEntry {
            index,
            term,
            is_snapshot: false,
            command_id: None,
            timestamp: std::time::SystemTime::now(),
            command: Some(command),
        };
        self.log.append_entry(entry).await?;
        self.force_replication().await?;
        self.log.wait_for_commit(index).await;
        let role = self.role.lock().await;
        Ok(matches!(&*role, RoleState::Leader(l) if l.term == term))
    }

    /// Linearizable read barrier (spec §4.1, §4.10).
    pub async fn apply_read_barrier(self: &Arc<Self>) -> RaftResult<()> {
        let round = {
            let role = self.role.lock().await;
            match &*role {
                RoleState::Leader(leader) => {
                    Some((Arc::clone(&leader.replication_queue), Arc::clone(&leader.lease)))
                }
                _ => None,
            }
        };
        if let Some((queue, lease)) = round {
            if lease.is_valid().await {
                return Ok(());
            }
            self.force_replication().await?;
            queue.wait_for_next_round().await;
            return Ok(());
        }

        let leader_id = self.current_leader().await.ok_or(RaftError::LeaderUnavailable)?;
        let transport = {
            let members = self.members.read().await;
            let member = members.get(&leader_id).ok_or(RaftError::LeaderUnavailable)?;
            match member.transport.as_ref() {
                Some(_) => Arc::clone(member),
                None => return Err(RaftError::LeaderUnavailable),
            }
        };
        let local_commit = self.log.last_committed_entry_index().await;
        let remote_commit = transport
            .transport
            .as_ref()
            .unwrap()
            .synchronize(local_commit)
            .await?
            .ok_or(RaftError::LeaderUnavailable)?;
        self.log.wait_for_commit(remote_commit).await;
        Ok(())
    }

    /// Signals the leader's replication trigger (spec §4.1).
    pub async fn force_replication(&self) -> RaftResult<()> {
        let role = self.role.lock().await;
        match &*role {
            RoleState::Leader(leader) => {
                leader.force_replication();
                Ok(())
            }
            _ => Err(RaftError::NotLeader),
        }
    }

    pub async fn wait_for_leader(&self, timeout: Duration) -> RaftResult<ServerId> {
        let deadline = now() + timeout;
        loop {
            if let Some(leader) = self.current_leader().await {
                return Ok(leader);
            }
            let remaining = deadline.saturating_duration_since(now());
            if remaining.is_zero() {
                return Err(RaftError::LeaderUnavailable);
            }
            let notified = self.leader_changed.notified();
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(remaining) => {}
            }
        }
    }

    pub async fn revert_to_normal_mode(self: &Arc<Self>) -> RaftResult<()> {
        let mut role = self.role.lock().await;
        match &*role {
            RoleState::Standby { .. } => {
                self.transition_follower(&mut role, None, None).await
            }
            _ => Err(RaftError::InvalidSourceState("revertToNormalMode requires Standby")),
        }
    }

    pub async fn enable_standby_mode(self: &Arc<Self>) -> RaftResult<()> {
        let mut role = self.role.lock().await;
        match &*role {
            RoleState::Follower(_) => {
                *role = RoleState::Standby { resumable: true };
                self.set_leader(None).await;
                Ok(())
            }
            _ => Err(RaftError::InvalidSourceState("enableStandbyMode requires Follower")),
        }
    }

    // ---- peer-facing RPC handlers (spec §4.6-§4.10) ---------------------

    pub async fn append_entries(
        self: &Arc<Self>,
        sender: ServerId,
        args: AppendEntriesRequest<C>,
    ) -> RaftResult<RpcResult<bool>> {
        let mut role = self.role.lock().await;
        let current_term = self.log.term().await;
        if current_term > args.term {
            return Ok(RpcResult::new(current_term, false));
        }

        if current_term < args.term || !matches!(&*role, RoleState::Follower(_)) {
            self.transition_follower(&mut role, Some(args.term), Some(sender)).await?;
        } else {
            self.set_leader(Some(sender)).await;
        }
        if let RoleState::Follower(follower) = &*role {
            follower.refresh();
        }

        let _suppress = match &*role {
            RoleState::Follower(follower) => Some(follower.suppress()),
            _ => None,
        };

        if !self.log.contains(args.prev_log_index, args.prev_log_term).await {
            return Ok(RpcResult::new(args.term, false));
        }

        let start_index = args.prev_log_index.succ();
        let carried_no_entries = args.entries.is_empty();
        self.log
            .append_entries(args.entries, start_index, true)
            .await?;
        let commit_target = LogIndex(args.leader_commit.0.min(self.log.last_entry_index().await.0));
        self.log.commit(commit_target).await?;

        let active = self.config_storage.active().await;
        let proposed = self.config_storage.proposed().await;
        let effective_fingerprint = proposed.as_ref().unwrap_or(&active).fingerprint();
        let matches_fingerprint = effective_fingerprint == args.config_fingerprint;
        let reply_value = match (matches_fingerprint, args.apply_config) {
            (true, true) => {
                if proposed.is_some() {
                    let (added, removed) = self.config_storage.apply().await?;
                    for member in added {
                        self.events.emit(RaftEvent::MemberAdded { member });
                    }
                    for member in removed {
                        self.remove_member(member).await;
                        self.events.emit(RaftEvent::MemberRemoved { member });
                    }
                }
                true
            }
            (true, false) => true,
            (false, true) => false,
            (false, false) => {
                if let Some(proposed) = proposed {
                    let _ = self.config_storage.propose(proposed).await;
                }
                true
            }
        };

        if carried_no_entries {
            self.events.emit(RaftEvent::ReplicationCompleted { member: sender });
        }

        Ok(RpcResult::new(args.term, reply_value))
    }

    pub async fn install_snapshot(
        self: &Arc<Self>,
        sender: ServerId,
        args: InstallSnapshotArgs,
    ) -> RaftResult<RpcResult<bool>> {
        let mut role = self.role.lock().await;
        let current_term = self.log.term().await;
        if current_term > args.term || args.snapshot_index <= self.log.last_committed_entry_index().await {
            return Ok(RpcResult::new(current_term, false));
        }
        if current_term < args.term || !matches!(&*role, RoleState::Follower(_)) {
            self.transition_follower(&mut role, Some(args.term), Some(sender)).await?;
        } else {
            self.set_leader(Some(sender)).await;
        }
        if let RoleState::Follower(follower) = &*role {
            follower.refresh();
        }
        self.log.append_snapshot(args.snapshot, args.snapshot_index).await?;
        Ok(RpcResult::new(args.term, true))
    }

    pub async fn vote(
        self: &Arc<Self>,
        sender: ServerId,
        term: TermIndex,
        last_log_index: LogIndex,
        last_log_term: TermIndex,
    ) -> RaftResult<RpcResult<bool>> {
        let mut role = self.role.lock().await;
        let current_term = self.log.term().await;
        if term < current_term {
            return Ok(RpcResult::new(current_term, false));
        }

        let is_known_member = self.members.read().await.contains_key(&sender);
        let heard_recently = match &*role {
            RoleState::Follower(follower) => follower.last_heartbeat.elapsed() < self.config.election_timeout.min(),
            RoleState::Leader(_) => true,
            _ => false,
        };
        if heard_recently && !is_known_member {
            return Ok(RpcResult::new(current_term, false));
        }

        if term > current_term {
            self.transition_follower(&mut role, Some(term), None).await?;
        }

        let already_voted_elsewhere = !self.log.is_voted_for(sender).await;
        let up_to_date = self.log.is_up_to_date(last_log_index, last_log_term).await;
        if !already_voted_elsewhere && up_to_date {
            self.log.update_voted_for(sender).await?;
            if let RoleState::Follower(follower) = &*role {
                follower.refresh();
            }
            return Ok(RpcResult::new(term, true));
        }
        Ok(RpcResult::new(term, false))
    }

    /// Runs entirely without the transition lock (spec §4.6, §5).
    pub async fn pre_vote(
        &self,
        next_term: TermIndex,
        last_log_index: LogIndex,
        last_log_term: TermIndex,
    ) -> RaftResult<PreVoteResult> {
        let is_leader = matches!(&*self.role.lock().await, RoleState::Leader(_));
        if is_leader && self.config.aggressive_leader_stickiness {
            return Ok(PreVoteResult::RejectedByLeader);
        }
        let heard_recently = {
            let role = self.role.lock().await;
            match &*role {
                RoleState::Follower(follower) => follower.last_heartbeat.elapsed() < self.config.election_timeout.min(),
                RoleState::Leader(_) => true,
                _ => false,
            }
        };
        let up_to_date = self.log.is_up_to_date(last_log_index, last_log_term).await;
        let current_term = self.log.term().await;
        if next_term <= current_term {
            return Ok(PreVoteResult::RejectedByFollower);
        }
        if heard_recently || !up_to_date {
            return Ok(PreVoteResult::RejectedByFollower);
        }
        Ok(PreVoteResult::Accepted)
    }

    pub async fn synchronize(&self, follower_commit_index: LogIndex) -> RaftResult<LogIndex> {
        let round = {
            let role = self.role.lock().await;
            match &*role {
                RoleState::Leader(leader) => Some(Arc::clone(&leader.replication_queue)),
                _ => None,
            }
        };
        let Some(queue) = round else {
            return Err(RaftError::NotLeader);
        };
        let local_commit = self.log.last_committed_entry_index().await;
        if follower_commit_index.0 < local_commit.0 {
            self.force_replication().await?;
            queue.wait_for_next_round().await;
        }
        Ok(self.log.last_committed_entry_index().await)
    }

    /// Immediate voluntary step-down (SPEC_FULL.md §B supplement).
    pub async fn resign(self: &Arc<Self>) -> RaftResult<bool> {
        let mut role = self.role.lock().await;
        if matches!(&*role, RoleState::Leader(_)) {
            self.transition_follower(&mut role, None, None).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Adds a live member to the cluster, e.g. after observing
    /// `RaftEvent::MemberAdded` and dialing its endpoint from
    /// `ClusterConfiguration` -- the core only tracks configuration
    /// fingerprints, the embedding application owns transport construction
    /// (same split as `EvictionHook`).
    pub async fn add_member(&self, member: Arc<ClusterMember>) {
        if member.is_remote {
            let last_log_index = self.log.last_entry_index().await;
            member.reset_replication_state(last_log_index).await;
        }
        self.members.write().await.insert(member.id, member);
    }

    pub async fn remove_member(&self, id: ServerId) {
        self.members.write().await.remove(&id);
        self.failure_detectors.lock().await.remove(&id);
    }

    // ---- internal transitions --------------------------------------------

    async fn set_leader(&self, new_leader: Option<ServerId>) {
        let mut guard = self.leader.write().await;
        if *guard != new_leader {
            let old = *guard;
            *guard = new_leader;
            drop(guard);
            self.events.emit(RaftEvent::LeaderChanged { old_leader: old, new_leader });
            self.leader_changed.notify_waiters();
        }
    }

    async fn transition_follower(
        self: &Arc<Self>,
        role: &mut RoleState,
        new_term: Option<TermIndex>,
        new_leader: Option<ServerId>,
    ) -> RaftResult<()> {
        if let RoleState::Leader(leader) = &*role {
            leader.lease.destroy().await;
        }
        if let Some(term) = new_term {
            self.log.set_term(term).await?;
        }
        self.set_leader(new_leader).await;
        let timeout = {
            let mut rng = self.rng.lock().unwrap();
            self.config.election_timeout.sample(&mut rng)
        };
        let generation = next_generation();
        *role = RoleState::Follower(FollowerState::new(generation, timeout));
        self.spawn_follower_watch(generation, timeout);
        Ok(())
    }

    fn spawn_follower_watch(self: &Arc<Self>, generation: u64, timeout: Duration) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = this.lifecycle_token.cancelled() => return,
                    _ = tokio::time::sleep(timeout) => {}
                }
                let remaining = {
                    let role = this.role.lock().await;
                    match &*role {
                        RoleState::Follower(follower) if follower.generation == generation => {
                            if follower.has_expired() {
                                None
                            } else {
                                Some(timeout.saturating_sub(follower.last_heartbeat.elapsed()))
                            }
                        }
                        _ => return,
                    }
                };
                match remaining {
                    None => {
                        this.start_election(generation).await;
                        return;
                    }
                    Some(remaining) if remaining.is_zero() => {
                        this.start_election(generation).await;
                        return;
                    }
                    Some(remaining) => {
                        tokio::time::sleep(remaining).await;
                    }
                }
            }
        });
    }

    async fn start_election(self: &Arc<Self>, from_generation: u64) {
        if !self.run_pre_vote().await {
            debug!(local_id = ?self.local_id, "pre-vote lost, remaining follower");
            return;
        }
        let mut role = self.role.lock().await;
        let still_expired = matches!(
            &*role,
            RoleState::Follower(follower) if follower.generation == from_generation && follower.has_expired()
        );
        if !still_expired {
            return;
        }
        let new_term = match self.log.increment_term(self.local_id).await {
            Ok(term) => term,
            Err(_) => return,
        };
        let generation = next_generation();
        *role = RoleState::Candidate(CandidateState::new(generation, new_term));
        drop(role);
        info!(local_id = ?self.local_id, term = ?new_term, "starting election");
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_candidate(generation, new_term).await });
    }

    async fn run_pre_vote(self: &Arc<Self>) -> bool {
        let next_term = self.log.term().await.next();
        let last_log_index = self.log.last_entry_index().await;
        let last_log_term = self.log.get_term(last_log_index).await.unwrap_or(TermIndex(0));
        let members: Vec<Arc<ClusterMember>> =
            self.members.read().await.values().filter(|m| m.is_remote).cloned().collect();

        let mut tally: i64 = 1;
        for member in members {
            let Some(transport) = member.transport.as_ref() else { continue };
            match transport.pre_vote(next_term, last_log_index, last_log_term).await {
                Ok(PreVoteResult::Accepted) => tally += 1,
                Ok(PreVoteResult::RejectedByFollower) => tally -= 1,
                Ok(PreVoteResult::RejectedByLeader) => return false,
                Err(_) => {}
            }
        }
        tally > 0
    }

    async fn run_candidate(self: &Arc<Self>, generation: u64, term: TermIndex) {
        let last_log_index = self.log.last_entry_index().await;
        let last_log_term = self.log.get_term(last_log_index).await.unwrap_or(TermIndex(0));
        let cluster_size = self.members.read().await.len();
        let remote_members: Vec<Arc<ClusterMember>> =
            self.members.read().await.values().filter(|m| m.is_remote).cloned().collect();

        let mut in_flight = JoinSet::new();
        for member in remote_members {
            in_flight.spawn(async move {
                match member.transport.as_ref() {
                    Some(transport) => transport.vote(term, last_log_index, last_log_term).await,
                    None => Err(RaftError::MemberUnavailable(member.id)),
                }
            });
        }

        // Spec §4.3: "On election-timeout without majority, restarts
        // election (new term)." A hung peer connection must not stall the
        // candidate forever (the gRPC transport sets no per-call deadline
        // of its own), so the whole voting phase is bounded by the same
        // randomized window a follower uses to notice a missing leader.
        let deadline = self.config.election_timeout.max();
        let outcome = tokio::time::timeout(deadline, async {
            {
                // A single-node cluster (no remote members) already has a
                // self-vote majority before any RPC round-trips; the loop
                // below would otherwise never run.
                let role = self.role.lock().await;
                if let RoleState::Candidate(candidate) = &*role {
                    if candidate.generation == generation && candidate.has_majority(cluster_size) {
                        return CandidateOutcome::Majority;
                    }
                }
            }
            while let Some(joined) = in_flight.join_next().await {
                let Ok(result) = joined else { continue };
                let mut role = self.role.lock().await;
                let RoleState::Candidate(candidate) = &mut *role else {
                    return CandidateOutcome::Stale;
                };
                if candidate.generation != generation {
                    return CandidateOutcome::Stale;
                }
                match result {
                    Ok(result) if result.term > term => return CandidateOutcome::HigherTerm(result.term),
                    Ok(result) if result.value => {
                        candidate.record_grant();
                        if candidate.has_majority(cluster_size) {
                            return CandidateOutcome::Majority;
                        }
                    }
                    _ => candidate.record_rejection(),
                }
            }
            CandidateOutcome::Exhausted
        })
        .await
        .unwrap_or(CandidateOutcome::TimedOut);

        in_flight.abort_all();

        let mut role = self.role.lock().await;
        let still_candidate = matches!(&*role, RoleState::Candidate(c) if c.generation == generation);
        if !still_candidate {
            return;
        }
        match outcome {
            CandidateOutcome::Majority => self.transition_leader(&mut role, term).await,
            CandidateOutcome::HigherTerm(newer) => {
                let _ = self.transition_follower(&mut role, Some(newer), None).await;
            }
            CandidateOutcome::Exhausted | CandidateOutcome::TimedOut | CandidateOutcome::Stale => {
                // No majority within this election's window: fall back to
                // Follower so the ordinary expiry timer re-arms with a fresh
                // randomized timeout for the next attempt (spec §4.3,
                // "restarts election (new term)").
                let _ = self.transition_follower(&mut role, None, None).await;
            }
        }
    }

    async fn transition_leader(self: &Arc<Self>, role: &mut RoleState, term: TermIndex) {
        let generation = next_generation();
        let last_log_index = self.log.last_entry_index().await;
        {
            let members = self.members.read().await;
            for member in members.values().filter(|m| m.is_remote) {
                member.reset_replication_state(last_log_index).await;
            }
        }
        *role = RoleState::Leader(LeaderState::new(generation, term));
        self.failure_detectors.lock().await.clear();
        self.set_leader(Some(self.local_id)).await;
        let _ = self.log.append_no_op_entry().await;
        info!(local_id = ?self.local_id, term = ?term, "became leader");
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_leader_heartbeat_loop(generation, term).await });
    }

    async fn run_leader_heartbeat_loop(self: &Arc<Self>, generation: u64, term: TermIndex) {
        let period = self.config.heartbeat_period();
        loop {
            let extracted = {
                let role = self.role.lock().await;
                match &*role {
                    RoleState::Leader(leader) if leader.generation == generation => Some((
                        Arc::clone(&leader.lease),
                        Arc::clone(&leader.term_cache),
                        Arc::clone(&leader.replication_queue),
                        leader.leadership_token.clone(),
                        Arc::clone(&leader.replication_trigger),
                        Arc::clone(&leader.eviction_notified),
                        Arc::clone(&leader.last_heartbeat),
                    )),
                    _ => None,
                }
            };
            let Some((
                lease,
                term_cache,
                replication_queue,
                leadership_token,
                replication_trigger,
                eviction_notified,
                last_heartbeat,
            )) = extracted
            else {
                return;
            };
            if leadership_token.is_cancelled() {
                return;
            }

            replication_queue.start_round();
            let round_start = now();
            let commit_index = self.log.last_committed_entry_index().await;
            let active_config = self.config_storage.active().await;
            let proposed_config = self.config_storage.proposed().await;
            let fingerprint = proposed_config.as_ref().unwrap_or(&active_config).fingerprint();
            let apply_config = proposed_config.is_some();

            let members: Vec<Arc<ClusterMember>> =
                self.members.read().await.values().filter(|m| m.is_remote).cloned().collect();
            let member_count = self.members.read().await.len();
            let floor = Arc::new(RetainedLogFloor(self.log.first_entry_index().await));

            let mut handles = Vec::new();
            for member in members {
                let log = Arc::clone(&self.log);
                let term_cache = Arc::clone(&term_cache);
                let floor = Arc::clone(&floor);
                handles.push(tokio::spawn(async move {
                    let replicator = Replicator::new(&member, &term_cache);
                    let outcome = replicator
                        .replicate_round(term, log.as_ref(), &floor, fingerprint, apply_config, commit_index, 1)
                        .await;
                    (member, outcome)
                }));
            }

            let mut responded = 1usize;
            let mut match_indices: HashMap<ServerId, LogIndex> = HashMap::new();
            let mut higher_term: Option<TermIndex> = None;

            for handle in handles {
                let Ok((member, outcome)) = handle.await else { continue };
                match outcome {
                    ReplicationOutcome::Success { match_index } => {
                        responded += 1;
                        match_indices.insert(member.id, match_index);
                        let mut detectors = self.failure_detectors.lock().await;
                        detectors.entry(member.id).or_insert_with(FailureDetector::new).report_heartbeat();
                        self.events.emit(RaftEvent::ReplicationCompleted { member: member.id });
                    }
                    ReplicationOutcome::Behind | ReplicationOutcome::SnapshotNeeded => {
                        responded += 1;
                    }
                    ReplicationOutcome::HigherTerm(peer_term) => {
                        responded += 1;
                        higher_term = Some(higher_term.map_or(peer_term, |t| t.max(peer_term)));
                    }
                    ReplicationOutcome::Failure => {
                        self.check_member_health(&member, &eviction_notified, &leadership_token).await;
                    }
                }
            }

            if let Some(newer) = higher_term {
                let mut role = self.role.lock().await;
                if matches!(&*role, RoleState::Leader(l) if l.generation == generation) {
                    let _ = self.transition_follower(&mut role, Some(newer), None).await;
                }
                return;
            }

            // Joint-consensus commit (spec §4.4 step 5, §GLOSSARY "Quorum"):
            // when a proposed configuration is live, the committed index is
            // bounded by the majority-match index of *both* the active and
            // the proposed member sets, not just the raw cluster size.
            let local_index = self.log.last_entry_index().await;
            let active_quorum_index =
                Self::quorum_match_index(&active_config, &match_indices, self.local_id, local_index);
            let majority_index = match &proposed_config {
                Some(proposed) => {
                    let proposed_quorum_index =
                        Self::quorum_match_index(proposed, &match_indices, self.local_id, local_index);
                    active_quorum_index.0.min(proposed_quorum_index.0)
                }
                None => active_quorum_index.0,
            };
            if majority_index > 0 {
                let before = self.log.last_committed_entry_index().await;
                let _ = self.log.commit(LogIndex(majority_index)).await;
                let after = self.log.last_committed_entry_index().await;
                if after.0 > before.0 {
                    let (added, removed) = self.config_storage.apply().await.unwrap_or_default();
                    for member in added {
                        self.events.emit(RaftEvent::MemberAdded { member });
                    }
                    for member in removed {
                        self.remove_member(member).await;
                        self.events.emit(RaftEvent::MemberRemoved { member });
                    }
                }
            }
            if responded >= member_count / 2 + 1 {
                lease.renew(round_start, &self.config).await;
            }

            last_heartbeat.refresh();
            replication_queue.complete_round();

            tokio::select! {
                _ = leadership_token.cancelled() => return,
                _ = tokio::time::sleep(period) => {}
                _ = replication_trigger.notified() => {}
            }
        }
    }

    /// Highest index acknowledged by a strict majority of `config`'s member
    /// set, treating the local node as always caught up to `local_index`
    /// and members absent from `match_indices` as acknowledging nothing
    /// (spec §4.4 step 5). Members of `config` outside the live member
    /// table count as zero too, which is what makes a still-draining
    /// joint-consensus member set correctly block commit until it catches
    /// up.
    fn quorum_match_index(
        config: &ClusterConfiguration,
        match_indices: &HashMap<ServerId, LogIndex>,
        local_id: ServerId,
        local_index: LogIndex,
    ) -> LogIndex {
        if config.members.is_empty() {
            return local_index;
        }
        let mut indices: Vec<u64> = config
            .members
            .keys()
            .map(|id| {
                if *id == local_id {
                    local_index.0
                } else {
                    match_indices.get(id).map(|i| i.0).unwrap_or(0)
                }
            })
            .collect();
        let quorum = config.quorum_size();
        if indices.len() < quorum {
            return LogIndex(0);
        }
        indices.sort_unstable_by(|a, b| b.cmp(a));
        LogIndex(indices[quorum - 1])
    }

    async fn check_member_health(
        &self,
        member: &Arc<ClusterMember>,
        eviction_notified: &std::sync::Mutex<HashMap<ServerId, bool>>,
        leadership_token: &CancellationToken,
    ) {
        let mut detectors = self.failure_detectors.lock().await;
        let detector = detectors.entry(member.id).or_insert_with(FailureDetector::new);
        if detector.is_monitoring() && !detector.is_healthy() {
            let already = {
                let mut guard = eviction_notified.lock().unwrap();
                guard.insert(member.id, true).unwrap_or(false)
            };
            if !already {
                warn!(member = ?member.id, "member suspected unavailable");
                if let Some(hook) = &self.eviction_hook {
                    hook(member.id, leadership_token.clone());
                }
            }
        }
    }
}
