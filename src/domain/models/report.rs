//! Run reports and structured failure records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use super::quality::QualityResult;
use super::task::{TaskId, TaskState};

/// Typed classification of why a node failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Endpoint unreachable or session creation failed.
    Connection,
    /// Retryable transport fault.
    TransientProtocol,
    /// Malformed envelope or rejected request.
    ProtocolFormat,
    /// Downstream agent reported a failure, or retries were exhausted.
    TaskExecution,
    /// Result did not meet its quality domain.
    QualityFailure,
    /// Invalid graph structure.
    GraphStructural,
    /// Cancelled by the per-node timeout.
    Timeout,
}

impl FailureKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::TransientProtocol => "transient_protocol",
            Self::ProtocolFormat => "protocol_format",
            Self::TaskExecution => "task_execution",
            Self::QualityFailure => "quality_failure",
            Self::GraphStructural => "graph_structural",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure attached to a node: kind plus the last underlying cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: FailureKind,
    pub cause: String,
    #[serde(default)]
    pub attempts: u32,
}

impl FailureReport {
    pub fn new(kind: FailureKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            cause: cause.into(),
            attempts: 0,
        }
    }

    #[must_use]
    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Terminal state of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Every node completed.
    Completed,
    /// Some nodes failed or were skipped but at least one sink completed.
    PartialSuccess,
    /// Fail-fast tripped, or no sink node completed.
    Failed,
}

impl RunState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::PartialSuccess => "partial_success",
            Self::Failed => "failed",
        }
    }
}

/// Final record of one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub id: TaskId,
    pub agent: String,
    pub state: TaskState,
    pub level: usize,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
}

/// Aggregate result of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub session_id: String,
    pub state: RunState,
    pub outcomes: Vec<NodeOutcome>,
    pub failed: Vec<TaskId>,
    pub skipped: Vec<TaskId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn outcome(&self, id: &TaskId) -> Option<&NodeOutcome> {
        self.outcomes.iter().find(|o| &o.id == id)
    }

    pub fn completed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state == TaskState::Completed)
            .count()
    }

    /// Fraction of nodes that completed, in `[0, 1]`.
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        self.completed_count() as f64 / self.outcomes.len() as f64
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
