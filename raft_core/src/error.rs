//! Crate-wide error taxonomy (spec §7).

use crate::types::{ServerId, TermIndex};

/// Errors surfaced across the transition lock, the persistent log adapter,
/// and the transport adapter. Most of these never reach an application
/// caller directly -- they are folded into negative vote/commit responses
/// inside the leader's broadcast loop (spec §7, "Propagation").
#[derive(Debug, thiserror::Error)]
pub enum RaftError {
    #[error("log mismatch: no entry at index {index:?} with term {term:?}")]
    LogMismatch { index: crate::types::LogIndex, term: TermIndex },

    #[error("stale term: sender term {sender_term:?} is behind current term {current_term:?}")]
    StaleTerm {
        sender_term: TermIndex,
        current_term: TermIndex,
    },

    #[error("member {0:?} unavailable")]
    MemberUnavailable(ServerId),

    #[error("this node is not the leader")]
    NotLeader,

    #[error("no leader known for this term")]
    LeaderUnavailable,

    #[error("invalid source state: {0}")]
    InvalidSourceState(&'static str),

    #[error("invalid source token: completion source reused out of order")]
    InvalidSourceToken,

    #[error("internal buffer overflow in {0}")]
    InternalBufferOverflow(&'static str),

    #[error("malformed base64 payload")]
    MalformedBase64,

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("operation canceled")]
    Canceled,

    #[error("persistent storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("persistent storage serialization error: {0}")]
    Serde(String),
}

pub type RaftResult<T> = std::result::Result<T, RaftError>;
