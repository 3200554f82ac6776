//! Error taxonomy for the session flow.
//!
//! Collaborator failures are transient and safe to retry. `InvalidState`
//! means the intent does not apply right now. `Invariant` is a programming
//! error and is never retried.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    /// Oracle was unreachable or rejected the call.
    #[error("question oracle failed: {0}")]
    Oracle(#[source] anyhow::Error),

    /// Oracle answered, but with an unusable payload.
    #[error("malformed oracle response for session {session_id} question {question_number}: {reason}")]
    MalformedOracleResponse {
        session_id: String,
        question_number: u32,
        reason: String,
    },

    /// Durable store was unreachable or a query failed.
    #[error("session store failed: {0}")]
    Store(#[source] anyhow::Error),

    #[error("session {0} not found")]
    NotFound(String),

    #[error("session {0} has expired")]
    SessionExpired(String),

    /// The intent is not valid in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Contract violation inside the flow; scoring can no longer be trusted.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Transient,
    Malformed,
    NotFound,
    Expired,
    InvalidState,
    Invariant,
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::Oracle(_) | FlowError::Store(_) => ErrorKind::Transient,
            FlowError::MalformedOracleResponse { .. } => ErrorKind::Malformed,
            FlowError::NotFound(_) => ErrorKind::NotFound,
            FlowError::SessionExpired(_) => ErrorKind::Expired,
            FlowError::InvalidState(_) => ErrorKind::InvalidState,
            FlowError::Invariant(_) => ErrorKind::Invariant,
        }
    }

    /// Malformed payloads are retried like network failures.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Malformed)
    }

    pub fn store(err: anyhow::Error) -> Self {
        FlowError::Store(err)
    }

    pub fn oracle(err: anyhow::Error) -> Self {
        FlowError::Oracle(err)
    }
}
