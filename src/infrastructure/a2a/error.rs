use serde_json::Value;
use thiserror::Error;

use crate::domain::models::FailureKind;
use crate::domain::ports::{DispatchError, TransportError};
use crate::infrastructure::pool::PoolError;

/// Protocol client errors
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// Endpoint unreachable or session creation failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Retryable transport fault (reset, timeout, 5xx).
    #[error("Transient protocol error: {0}")]
    Transient(TransportError),

    /// Response could not be matched or decoded.
    #[error("Malformed response: {0}")]
    Format(String),

    /// Request refused by the remote side (4xx-equivalent).
    #[error("Request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Structured error returned by the remote agent.
    #[error("Remote error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// Retry budget spent on transient failures.
    #[error("Gave up after {attempts} attempts: {last_cause}")]
    Exhausted {
        attempts: u32,
        last_cause: Box<ProtocolError>,
    },

    #[error("Session pool is shut down")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

impl ProtocolError {
    /// Check if this error is transient and should be retried
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Transient(_))
    }

    /// Transmissions made before this error was returned.
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            _ => 1,
        }
    }

    /// The innermost cause, unwrapping `Exhausted`.
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Exhausted { last_cause, .. } => last_cause.root_cause(),
            other => other,
        }
    }

    /// Classification recorded on a failed task node.
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Connection(_) | Self::ShutDown => FailureKind::Connection,
            Self::Transient(_) => FailureKind::TransientProtocol,
            Self::Format(_) | Self::Rejected { .. } => FailureKind::ProtocolFormat,
            Self::Remote { .. } | Self::Exhausted { .. } => FailureKind::TaskExecution,
        }
    }

    /// Map a carrier error onto the protocol taxonomy.
    ///
    /// A closed session counts as transient: the next attempt gets a fresh one.
    pub fn from_transport(err: TransportError) -> Self {
        match err {
            TransportError::Unreachable(msg) => Self::Connection(msg),
            TransportError::Malformed(msg) => Self::Format(msg),
            status @ TransportError::Status { .. } if status.is_transient() => {
                Self::Transient(status)
            }
            TransportError::Status { status, body } => Self::Rejected { status, body },
            other => Self::Transient(other),
        }
    }
}

impl From<PoolError> for ProtocolError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Connection { endpoint, source } => {
                Self::Connection(format!("{endpoint}: {source}"))
            }
            PoolError::ShutDown => Self::ShutDown,
        }
    }
}

impl From<ProtocolError> for DispatchError {
    fn from(err: ProtocolError) -> Self {
        let attempts = err.attempts();
        Self {
            kind: err.failure_kind(),
            cause: err.root_cause().to_string(),
            attempts,
        }
    }
}
