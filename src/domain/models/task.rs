//! Task nodes: the unit of delegated work inside a workflow graph.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use super::agent::AgentTier;
use super::quality::QualityResult;
use super::report::FailureReport;

/// Identifier of a task node.
///
/// Ordering is lexicographic and is the deterministic tie-break inside an
/// execution level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle state of a task node.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting on at least one predecessor.
    #[default]
    Pending,
    /// Every predecessor completed; eligible for dispatch.
    Ready,
    /// Dispatched to an agent.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully.
    Failed,
    /// Will never run because an ancestor failed.
    Skipped,
}

impl TaskState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Not yet dispatched and not terminal.
    pub const fn is_unexecuted(&self) -> bool {
        matches!(self, Self::Pending | Self::Ready)
    }

    pub fn valid_transitions(&self) -> Vec<Self> {
        match self {
            Self::Pending => vec![Self::Ready, Self::Skipped],
            Self::Ready => vec![Self::Running, Self::Skipped],
            Self::Running => vec![Self::Completed, Self::Failed],
            Self::Completed | Self::Failed | Self::Skipped => vec![],
        }
    }

    pub fn can_transition_to(&self, new_state: Self) -> bool {
        self.valid_transitions().contains(&new_state)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of delegated work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    #[serde(alias = "task_id")]
    pub id: TaskId,
    /// Target agent id.
    #[serde(alias = "agent_type")]
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<AgentTier>,
    /// Instruction text sent to the agent.
    #[serde(default)]
    pub description: String,
    /// Structured input forwarded as a data part.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default)]
    pub dependencies: BTreeSet<TaskId>,
    /// Quality domain override for this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_domain: Option<String>,
    #[serde(default)]
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
}

impl TaskNode {
    pub fn new(
        id: impl Into<TaskId>,
        agent: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            agent: agent.into(),
            tier: None,
            description: description.into(),
            input: None,
            dependencies: BTreeSet::new(),
            quality_domain: None,
            state: TaskState::Pending,
            result: None,
            retry_count: 0,
            quality: None,
            failure: None,
        }
    }

    pub fn with_dependency(mut self, id: impl Into<TaskId>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    pub fn with_dependencies<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.dependencies.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_tier(mut self, tier: AgentTier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_quality_domain(mut self, domain: impl Into<String>) -> Self {
        self.quality_domain = Some(domain.into());
        self
    }
}
