//! Transport (per-member capabilities), spec §6.
//!
//! The core depends only on this trait; `raft_core_grpc` is one concrete
//! binding. Request/response shapes are generic over the opaque, already
//! length-framed command payload (`Vec<u8>`) rather than any one wire
//! format -- spec §1 Non-goals explicitly exclude mandating a wire format.

use async_trait::async_trait;

use crate::error::RaftResult;
use crate::types::{LogIndex, RpcResult, ServerId, TermIndex};

/// An already-serialized log entry as it travels over the wire. The core
/// only needs to know where it sits in the log and under what term; the
/// command payload is opaque bytes handed back to the application's state
/// machine by the caller that owns `PersistentLog`.
#[derive(Debug, Clone)]
pub struct WireLogEntry {
    pub index: LogIndex,
    pub term: TermIndex,
    pub is_snapshot: bool,
    pub command_id: Option<u32>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct AppendEntriesArgs {
    pub term: TermIndex,
    pub prev_log_index: LogIndex,
    pub prev_log_term: TermIndex,
    pub entries: Vec<WireLogEntry>,
    pub leader_commit: LogIndex,
    pub config_fingerprint: u64,
    pub apply_config: bool,
}

#[derive(Debug, Clone)]
pub struct InstallSnapshotArgs {
    pub term: TermIndex,
    pub snapshot: Vec<u8>,
    pub snapshot_index: LogIndex,
}

/// Result of a pre-vote poll (spec §4.6). `RejectedByLeader` is a hard veto
/// and must never be folded into the ordinary `+1`/`-1` tally as a plain
/// boolean -- kept as its own variant, following the original's distinct
/// rejection encoding (see SPEC_FULL.md §B).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PreVoteResult {
    Accepted,
    RejectedByFollower,
    RejectedByLeader,
}

/// Per-member capability set a transport binding must implement. Modeled on
/// the teacher's `RaftTransportBridge`, generalized from "one blocking
/// queue" to one async method per RPC kind plus cancellation, matching spec
/// §6.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn append_entries(
        &self,
        args: AppendEntriesArgs,
    ) -> RaftResult<RpcResult<bool>>;

    async fn install_snapshot(
        &self,
        args: InstallSnapshotArgs,
    ) -> RaftResult<RpcResult<bool>>;

    async fn vote(
        &self,
        term: TermIndex,
        last_log_index: LogIndex,
        last_log_term: TermIndex,
    ) -> RaftResult<RpcResult<bool>>;

    async fn pre_vote(
        &self,
        next_term: TermIndex,
        last_log_index: LogIndex,
        last_log_term: TermIndex,
    ) -> RaftResult<PreVoteResult>;

    async fn synchronize(&self, commit_index: LogIndex) -> RaftResult<Option<LogIndex>>;

    async fn resign(&self) -> RaftResult<bool>;

    async fn cancel_pending_requests(&self);
}

/// Identifies the member that originated an RPC, for handlers on the
/// receiving side (spec §4.1's handler list).
#[derive(Debug, Clone, Copy)]
pub struct PeerEnvelope {
    pub sender: ServerId,
}
