//! Core value types shared by every module: server identity, log indexing,
//! terms, and log entries.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// A unique identifier for a server in the cluster.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Debug, Serialize, Deserialize, Hash)]
pub struct ServerId(pub u64);

/// The index of a log entry. Index `0` is the sentinel "before the log
/// starts" position used as `prevLogIndex` by a brand new leader.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Debug, Serialize, Deserialize, Hash, Default)]
pub struct LogIndex(pub u64);

impl LogIndex {
    pub fn succ(self) -> Self {
        LogIndex(self.0 + 1)
    }

    pub fn pred(self) -> Self {
        LogIndex(self.0.saturating_sub(1))
    }
}

/// An election epoch. Monotonically non-decreasing for the lifetime of a
/// node (invariant 5 in spec §3).
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Debug, Serialize, Deserialize, Hash, Default)]
pub struct TermIndex(pub u64);

impl TermIndex {
    pub fn next(self) -> Self {
        TermIndex(self.0 + 1)
    }
}

/// A log command is whatever the replicated application wants to persist.
/// The core never inspects the contents, only the framing around it.
pub trait LogCommand: std::fmt::Debug + Clone + Send + Sync + Eq + PartialEq + 'static {}
impl<T> LogCommand for T where T: std::fmt::Debug + Clone + Send + Sync + Eq + PartialEq + 'static {}

/// An immutable log record. `command` is `None` for no-op entries (appended
/// on leader election, see §4.1) and for snapshot placeholder entries.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LogEntry<C: LogCommand> {
    pub index: LogIndex,
    pub term: TermIndex,
    pub is_snapshot: bool,
    pub command_id: Option<u32>,
    pub timestamp: SystemTime,
    pub command: Option<C>,
}

impl<C: LogCommand> LogEntry<C> {
    pub fn no_op(index: LogIndex, term: TermIndex) -> Self {
        LogEntry {
            index,
            term,
            is_snapshot: false,
            command_id: None,
            timestamp: SystemTime::now(),
            command: None,
        }
    }
}

/// Wraps every peer RPC reply. Peers observing `term` greater than their own
/// step down regardless of `value` (spec §3, invariant-adjacent rule).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RpcResult<T> {
    pub term: TermIndex,
    pub value: T,
}

impl<T> RpcResult<T> {
    pub fn new(term: TermIndex, value: T) -> Self {
        RpcResult { term, value }
    }
}
