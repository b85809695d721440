//! Client-side `Transport` binding: one `GrpcTransport` per remote
//! `ClusterMember`, wrapping a lazily-connected tonic channel.
//!
//! Grounded in the teacher's `RaftGrpcTransportConnector` (`grpc_transport.rs`),
//! generalized from its thread-parked mpsc bridge -- needed there because the
//! core ran on its own OS thread -- to a direct `async_trait` impl now that
//! the core is itself async and can simply `.await` the tonic call.

use async_trait::async_trait;
use tonic::transport::Channel;
use tonic::Request;

use raft_core::error::{RaftError, RaftResult};
use raft_core::transport::{AppendEntriesArgs, InstallSnapshotArgs, PreVoteResult, Transport};
use raft_core::types::{LogIndex, RpcResult, ServerId, TermIndex};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::proto;
use crate::proto::raft_consensus_client::RaftConsensusClient;

/// A connected member's RPC handle. `local_id` is the sender identity this
/// node stamps onto every outbound request that needs one.
pub struct GrpcTransport {
    local_id: ServerId,
    client: Mutex<RaftConsensusClient<Channel>>,
    cancel: CancellationToken,
}

impl GrpcTransport {
    /// Connects lazily: the underlying TCP connection is established on
    /// first use, not here, so cluster startup never blocks on a peer that
    /// hasn't come up yet.
    pub fn connect_lazy(local_id: ServerId, endpoint: String) -> RaftResult<Self> {
        let uri = format!("http://{endpoint}");
        let channel = Channel::from_shared(uri)
            .map_err(|e| RaftError::MalformedFrame(e.to_string()))?
            .connect_lazy();
        Ok(GrpcTransport {
            local_id,
            client: Mutex::new(RaftConsensusClient::new(channel)),
            cancel: CancellationToken::new(),
        })
    }

    async fn guard<F, T>(&self, call: F) -> RaftResult<T>
    where
        F: std::future::Future<Output = Result<T, tonic::Status>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(RaftError::Canceled),
            result = call => result.map_err(|status| RaftError::MalformedFrame(status.to_string())),
        }
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn append_entries(&self, args: AppendEntriesArgs) -> RaftResult<RpcResult<bool>> {
        let request = proto::AppendEntriesRequest::from_args(self.local_id, args);
        let mut client = self.client.lock().await;
        let response = self
            .guard(async { client.append_entries(Request::new(request)).await.map(|r| r.into_inner()) })
            .await?;
        Ok(response.into())
    }

    async fn install_snapshot(&self, args: InstallSnapshotArgs) -> RaftResult<RpcResult<bool>> {
        let request = proto::InstallSnapshotRequest::from_args(self.local_id, args);
        let mut client = self.client.lock().await;
        let response = self
            .guard(async { client.install_snapshot(Request::new(request)).await.map(|r| r.into_inner()) })
            .await?;
        Ok(response.into())
    }

    async fn vote(
        &self,
        term: TermIndex,
        last_log_index: LogIndex,
        last_log_term: TermIndex,
    ) -> RaftResult<RpcResult<bool>> {
        let request = proto::VoteRequest {
            sender: self.local_id.0,
            term: term.0,
            last_log_index: last_log_index.0,
            last_log_term: last_log_term.0,
        };
        let mut client = self.client.lock().await;
        let response = self
            .guard(async { client.vote(Request::new(request)).await.map(|r| r.into_inner()) })
            .await?;
        Ok(response.into())
    }

    async fn pre_vote(
        &self,
        next_term: TermIndex,
        last_log_index: LogIndex,
        last_log_term: TermIndex,
    ) -> RaftResult<PreVoteResult> {
        let request = proto::PreVoteRequest {
            next_term: next_term.0,
            last_log_index: last_log_index.0,
            last_log_term: last_log_term.0,
        };
        let mut client = self.client.lock().await;
        let response = self
            .guard(async { client.pre_vote(Request::new(request)).await.map(|r| r.into_inner()) })
            .await?;
        let result = proto::pre_vote_response::Result::from_i32(response.result)
            .unwrap_or(proto::pre_vote_response::Result::RejectedByFollower);
        Ok(result.into())
    }

    async fn synchronize(&self, commit_index: LogIndex) -> RaftResult<Option<LogIndex>> {
        let request = proto::SynchronizeRequest { follower_commit_index: commit_index.0 };
        let mut client = self.client.lock().await;
        match client.synchronize(Request::new(request)).await {
            Ok(response) => Ok(Some(LogIndex(response.into_inner().commit_index))),
            Err(status) if status.code() == tonic::Code::FailedPrecondition => Ok(None),
            Err(status) => Err(RaftError::MalformedFrame(status.to_string())),
        }
    }

    async fn resign(&self) -> RaftResult<bool> {
        let mut client = self.client.lock().await;
        let response = self
            .guard(async { client.resign(Request::new(proto::ResignRequest {})).await.map(|r| r.into_inner()) })
            .await?;
        Ok(response.resigned)
    }

    async fn cancel_pending_requests(&self) {
        self.cancel.cancel();
    }
}
