//! Generated message/service types plus the conversions between the wire
//! shapes and `raft_core`'s domain types. The core knows nothing about
//! protobuf; this module is the only place that does.

use raft_core::transport::{AppendEntriesArgs, InstallSnapshotArgs, PreVoteResult, WireLogEntry};
use raft_core::types::{LogIndex, ServerId, TermIndex};

tonic::include_proto!("raft");

impl From<WireLogEntry> for LogEntry {
    fn from(entry: WireLogEntry) -> Self {
        LogEntry {
            index: entry.index.0,
            term: entry.term.0,
            is_snapshot: entry.is_snapshot,
            command_id: entry.command_id,
            payload: entry.payload,
        }
    }
}

impl From<LogEntry> for WireLogEntry {
    fn from(entry: LogEntry) -> Self {
        WireLogEntry {
            index: LogIndex(entry.index),
            term: TermIndex(entry.term),
            is_snapshot: entry.is_snapshot,
            command_id: entry.command_id,
            payload: entry.payload,
        }
    }
}

impl AppendEntriesRequest {
    pub fn from_args(sender: ServerId, args: AppendEntriesArgs) -> Self {
        AppendEntriesRequest {
            sender: sender.0,
            term: args.term.0,
            prev_log_index: args.prev_log_index.0,
            prev_log_term: args.prev_log_term.0,
            entries: args.entries.into_iter().map(Into::into).collect(),
            leader_commit: args.leader_commit.0,
            config_fingerprint: args.config_fingerprint,
            apply_config: args.apply_config,
        }
    }
}

impl From<VoteResponse> for raft_core::types::RpcResult<bool> {
    fn from(response: VoteResponse) -> Self {
        raft_core::types::RpcResult::new(TermIndex(response.term), response.vote_granted)
    }
}

impl From<AppendEntriesResponse> for raft_core::types::RpcResult<bool> {
    fn from(response: AppendEntriesResponse) -> Self {
        raft_core::types::RpcResult::new(TermIndex(response.term), response.success)
    }
}

impl From<InstallSnapshotResponse> for raft_core::types::RpcResult<bool> {
    fn from(response: InstallSnapshotResponse) -> Self {
        raft_core::types::RpcResult::new(TermIndex(response.term), response.success)
    }
}

impl From<pre_vote_response::Result> for PreVoteResult {
    fn from(result: pre_vote_response::Result) -> Self {
        match result {
            pre_vote_response::Result::Accepted => PreVoteResult::Accepted,
            pre_vote_response::Result::RejectedByFollower => PreVoteResult::RejectedByFollower,
            pre_vote_response::Result::RejectedByLeader => PreVoteResult::RejectedByLeader,
        }
    }
}

impl From<PreVoteResult> for pre_vote_response::Result {
    fn from(result: PreVoteResult) -> Self {
        match result {
            PreVoteResult::Accepted => pre_vote_response::Result::Accepted,
            PreVoteResult::RejectedByFollower => pre_vote_response::Result::RejectedByFollower,
            PreVoteResult::RejectedByLeader => pre_vote_response::Result::RejectedByLeader,
        }
    }
}

impl InstallSnapshotRequest {
    pub fn from_args(sender: ServerId, args: InstallSnapshotArgs) -> Self {
        InstallSnapshotRequest {
            sender: sender.0,
            term: args.term.0,
            snapshot: args.snapshot,
            snapshot_index: args.snapshot_index.0,
        }
    }
}
