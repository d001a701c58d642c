//! Transport port - carriers that move envelopes to an endpoint.
//!
//! The pool only ever talks to a [`Transport`] (to open sessions) and to the
//! [`Connection`]s it returns. HTTP, in-process dispatch or a message queue
//! are all valid carriers.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::domain::models::{Endpoint, ProtocolEnvelope, ResponseEnvelope};

/// Errors raised by a carrier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Connection reset: {0}")]
    Reset(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Session closed")]
    Closed,
}

impl TransportError {
    /// Whether a fresh transmission may succeed.
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Reset(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Malformed(_) | Self::Closed => false,
        }
    }

    /// Whether the underlying session should no longer be trusted.
    pub const fn breaks_session(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::Reset(_) | Self::Closed
        )
    }
}

/// One live session bound to an endpoint.
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    /// Transmit a request and wait for its response.
    async fn exchange(&self, request: &ProtocolEnvelope)
        -> Result<ResponseEnvelope, TransportError>;

    /// Lightweight liveness check.
    async fn probe(&self) -> Result<(), TransportError>;

    /// Release the underlying resources. Idempotent.
    async fn close(&self);

    /// Whether concurrent exchanges may share this session.
    fn supports_multiplexing(&self) -> bool {
        false
    }
}

/// Opens sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Carrier name, for logging.
    fn name(&self) -> &'static str;

    /// Open a session to `endpoint`.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Connection>, TransportError>;
}
