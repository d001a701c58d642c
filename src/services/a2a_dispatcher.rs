//! Dispatches task nodes to remote agents through the protocol client.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

use crate::domain::models::{Capability, FailureKind, ProtocolEnvelope, TaskNode};
use crate::domain::ports::{DispatchContext, DispatchError, TaskDispatcher};
use crate::infrastructure::a2a::ProtocolClient;
use crate::services::agent_directory::AgentDirectory;

/// [`TaskDispatcher`] that resolves the node's agent in an
/// [`AgentDirectory`] and sends the node as a protocol request.
pub struct ProtocolDispatcher {
    client: Arc<ProtocolClient>,
    directory: Arc<AgentDirectory>,
    max_retries: u32,
}

impl ProtocolDispatcher {
    pub fn new(client: Arc<ProtocolClient>, directory: Arc<AgentDirectory>) -> Self {
        let max_retries = client.default_max_retries();
        Self {
            client,
            directory,
            max_retries,
        }
    }

    /// Transmission budget per dispatch.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Request envelope for `task`.
    ///
    /// The description becomes the text part and `input`, when present, a
    /// data part. Run identifiers go into the metadata alongside the task id.
    pub fn envelope_for(
        task: &TaskNode,
        ctx: &DispatchContext,
        tools_enabled: bool,
    ) -> ProtocolEnvelope {
        let mut envelope = ProtocolEnvelope::request(task.description.clone())
            .with_session(ctx.session_id.clone())
            .with_correlation_id(ctx.correlation_id.clone())
            .with_trace_id(ctx.trace_id.clone())
            .with_metadata("task_id", Value::from(task.id.as_str()))
            .with_metadata("tools_enabled", Value::Bool(tools_enabled));
        if let Some(tier) = task.tier {
            envelope = envelope.with_metadata("tier", Value::from(tier.number()));
        }
        if let Some(input) = &task.input {
            envelope = envelope.with_data(input.clone());
        }
        envelope
    }
}

#[async_trait]
impl TaskDispatcher for ProtocolDispatcher {
    #[instrument(skip_all, fields(node_id = %task.id, agent = %task.agent))]
    async fn dispatch(
        &self,
        task: &TaskNode,
        ctx: &DispatchContext,
    ) -> Result<Value, DispatchError> {
        let profile = self.directory.profile(&task.agent).ok_or_else(|| {
            DispatchError::new(
                FailureKind::Connection,
                format!("unknown agent {}", task.agent),
            )
        })?;
        if !profile.has(Capability::Delegation) {
            return Err(DispatchError::new(
                FailureKind::TaskExecution,
                format!("agent {} does not accept delegated work", profile.agent_id),
            ));
        }

        let envelope = Self::envelope_for(task, ctx, profile.has(Capability::ToolUse));
        let response = self
            .client
            .send(&profile.endpoint, envelope, self.max_retries)
            .await?;

        // validate_response guarantees a result on success
        Ok(response.result.unwrap_or(Value::Null))
    }

    fn quality_domain(&self, task: &TaskNode) -> Option<String> {
        task.quality_domain.clone().or_else(|| {
            self.directory
                .profile(&task.agent)
                .filter(|p| p.has(Capability::QualityValidation))
                .and_then(|p| p.quality_domain)
        })
    }
}
