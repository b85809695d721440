//! Transport-independent Raft consensus state machine.
//!
//! `RaftCluster` is the entry point: construct one per local node with a
//! `PersistentLog`, a `ConfigurationStorage`, and a set of `ClusterMember`s
//! (each carrying a `Transport` for the remote ones), then drive it with
//! `start`/`stop`/`replicate`/`apply_read_barrier`. Everything else in this
//! crate is an implementation detail reachable through that handle or
//! through the peer-facing RPC methods a transport binding calls on inbound
//! requests.

pub mod clock;
pub mod cluster;
pub mod config;
pub mod config_storage;
pub mod error;
pub mod events;
pub mod failure_detector;
pub mod lease;
pub mod log;
pub mod member;
pub mod replication_queue;
pub mod replicator;
pub mod role;
pub mod term_cache;
pub mod transport;
pub mod types;

pub use cluster::{AppendEntriesRequest, EvictionHook, RaftCluster};
pub use config::{ElectionTimeout, RaftConfig};
pub use config_storage::{ClusterConfiguration, ConfigurationStorage, InMemoryConfigurationStorage};
pub use error::{RaftError, RaftResult};
pub use events::{EventBus, RaftEvent};
pub use log::{FileBackedLog, InMemoryLog, PersistentLog};
pub use member::{ClusterMember, ReplicationState};
pub use role::RoleState;
pub use transport::{AppendEntriesArgs, InstallSnapshotArgs, PreVoteResult, Transport, WireLogEntry};
pub use types::{LogCommand, LogEntry, LogIndex, RpcResult, ServerId, TermIndex};
