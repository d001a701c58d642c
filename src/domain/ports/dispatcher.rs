//! Dispatcher port - how the workflow engine hands a node to an agent.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::models::{FailureKind, FailureReport, TaskNode};

/// Correlation context shared by every dispatch of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    pub session_id: String,
    pub correlation_id: String,
    pub trace_id: String,
}

/// A dispatch that did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {cause}")]
pub struct DispatchError {
    pub kind: FailureKind,
    pub cause: String,
    pub attempts: u32,
}

impl DispatchError {
    pub fn new(kind: FailureKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            cause: cause.into(),
            attempts: 0,
        }
    }
}

impl From<DispatchError> for FailureReport {
    fn from(err: DispatchError) -> Self {
        Self::new(err.kind, err.cause).with_attempts(err.attempts)
    }
}

/// Sends one task node to its target agent.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Run `task` on its agent and return the raw result payload.
    async fn dispatch(&self, task: &TaskNode, ctx: &DispatchContext)
        -> Result<Value, DispatchError>;

    /// Quality domain the target agent's results must satisfy, if the agent
    /// requires validation.
    fn quality_domain(&self, task: &TaskNode) -> Option<String>;
}
