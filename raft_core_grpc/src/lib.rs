//! tonic/gRPC `Transport` binding for `raft_core`.
//!
//! [`GrpcTransport`] implements `raft_core::transport::Transport` for a
//! single remote member; [`RaftGrpcServer`] implements the generated
//! `RaftConsensus` service and forwards inbound RPCs to a local
//! `RaftCluster`. Wire framing is `prost`-generated protobuf; this crate is
//! one possible binding, not part of the core's contract (spec §1 Non-goals
//! exclude mandating a wire format).

pub mod grpc_server;
pub mod grpc_transport;
pub mod proto;

pub use grpc_server::RaftGrpcServer;
pub use grpc_transport::GrpcTransport;
