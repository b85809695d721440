//! Server-side binding: translates inbound tonic requests into calls against
//! an `Arc<RaftCluster<C>>`.
//!
//! Grounded in the teacher's `RaftGrpcServerImpl` (`grpc_server.rs`), which
//! forwarded requests onto the raft thread's mpsc queue and awaited a reply
//! channel. The core is async now, so this binding calls straight through
//! instead of crossing a thread boundary.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tonic::{Request, Response, Status};

use raft_core::cluster::AppendEntriesRequest as DecodedAppendEntries;
use raft_core::error::RaftError;
use raft_core::types::{LogCommand, LogEntry, LogIndex, ServerId, TermIndex};
use raft_core::RaftCluster;

use crate::proto;
use crate::proto::raft_consensus_server::RaftConsensus;

fn raft_error_to_status(err: RaftError) -> Status {
    match err {
        RaftError::NotLeader | RaftError::LeaderUnavailable => Status::failed_precondition(err.to_string()),
        RaftError::InvalidSourceState(_) | RaftError::InvalidSourceToken => Status::failed_precondition(err.to_string()),
        other => Status::internal(other.to_string()),
    }
}

fn decode_entry<C: LogCommand + DeserializeOwned>(entry: proto::LogEntry) -> Result<LogEntry<C>, Status> {
    let command = if entry.is_snapshot || entry.payload.is_empty() {
        None
    } else {
        Some(
            bincode::deserialize::<C>(&entry.payload)
                .map_err(|e| Status::invalid_argument(format!("malformed log entry payload: {e}")))?,
        )
    };
    Ok(LogEntry {
        index: LogIndex(entry.index),
        term: TermIndex(entry.term),
        is_snapshot: entry.is_snapshot,
        command_id: entry.command_id,
        timestamp: std::time::SystemTime::now(),
        command,
    })
}

/// `C` must round-trip through `serde` here even though `raft_core` itself
/// never requires that of `LogCommand` -- this binding is the boundary where
/// an opaque command actually needs to cross the wire.
pub struct RaftGrpcServer<C: LogCommand + Serialize + DeserializeOwned> {
    cluster: Arc<RaftCluster<C>>,
    _command: PhantomData<C>,
}

impl<C: LogCommand + Serialize + DeserializeOwned> RaftGrpcServer<C> {
    pub fn new(cluster: Arc<RaftCluster<C>>) -> Self {
        RaftGrpcServer { cluster, _command: PhantomData }
    }
}

#[tonic::async_trait]
impl<C: LogCommand + Serialize + DeserializeOwned> RaftConsensus for RaftGrpcServer<C> {
    async fn vote(
        &self,
        request: Request<proto::VoteRequest>,
    ) -> Result<Response<proto::VoteResponse>, Status> {
        let req = request.into_inner();
        let result = self
            .cluster
            .vote(ServerId(req.sender), TermIndex(req.term), LogIndex(req.last_log_index), TermIndex(req.last_log_term))
            .await
            .map_err(raft_error_to_status)?;
        Ok(Response::new(proto::VoteResponse { term: result.term.0, vote_granted: result.value }))
    }

    async fn pre_vote(
        &self,
        request: Request<proto::PreVoteRequest>,
    ) -> Result<Response<proto::PreVoteResponse>, Status> {
        let req = request.into_inner();
        let result = self
            .cluster
            .pre_vote(TermIndex(req.next_term), LogIndex(req.last_log_index), TermIndex(req.last_log_term))
            .await
            .map_err(raft_error_to_status)?;
        let result: proto::pre_vote_response::Result = result.into();
        Ok(Response::new(proto::PreVoteResponse { result: result as i32 }))
    }

    async fn append_entries(
        &self,
        request: Request<proto::AppendEntriesRequest>,
    ) -> Result<Response<proto::AppendEntriesResponse>, Status> {
        let req = request.into_inner();
        let sender = ServerId(req.sender);
        let entries = req.entries.into_iter().map(decode_entry::<C>).collect::<Result<Vec<_>, _>>()?;
        let decoded = DecodedAppendEntries {
            term: TermIndex(req.term),
            prev_log_index: LogIndex(req.prev_log_index),
            prev_log_term: TermIndex(req.prev_log_term),
            entries,
            leader_commit: LogIndex(req.leader_commit),
            config_fingerprint: req.config_fingerprint,
            apply_config: req.apply_config,
        };
        let result = self.cluster.append_entries(sender, decoded).await.map_err(raft_error_to_status)?;
        Ok(Response::new(proto::AppendEntriesResponse { term: result.term.0, success: result.value }))
    }

    async fn install_snapshot(
        &self,
        request: Request<proto::InstallSnapshotRequest>,
    ) -> Result<Response<proto::InstallSnapshotResponse>, Status> {
        let req = request.into_inner();
        let args = raft_core::transport::InstallSnapshotArgs {
            term: TermIndex(req.term),
            snapshot: req.snapshot,
            snapshot_index: LogIndex(req.snapshot_index),
        };
        let result = self
            .cluster
            .install_snapshot(ServerId(req.sender), args)
            .await
            .map_err(raft_error_to_status)?;
        Ok(Response::new(proto::InstallSnapshotResponse { term: result.term.0, success: result.value }))
    }

    async fn synchronize(
        &self,
        request: Request<proto::SynchronizeRequest>,
    ) -> Result<Response<proto::SynchronizeResponse>, Status> {
        let req = request.into_inner();
        let commit_index = self
            .cluster
            .synchronize(LogIndex(req.follower_commit_index))
            .await
            .map_err(raft_error_to_status)?;
        Ok(Response::new(proto::SynchronizeResponse { commit_index: commit_index.0 }))
    }

    async fn resign(
        &self,
        _request: Request<proto::ResignRequest>,
    ) -> Result<Response<proto::ResignResponse>, Status> {
        let resigned = self.cluster.resign().await.map_err(raft_error_to_status)?;
        Ok(Response::new(proto::ResignResponse { resigned }))
    }
}
