//! Agent-to-agent protocol client.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::error::{ProtocolError, Result};
use super::retry::RetryPolicy;
use crate::domain::models::{Config, Endpoint, ProtocolEnvelope, ResponseEnvelope};
use crate::domain::ports::TransportError;
use crate::infrastructure::pool::{ConnectionPool, SessionHealth};

/// Configuration for the protocol client
#[derive(Debug, Clone)]
pub struct ProtocolClientConfig {
    /// Id stamped as `source_agent` on envelopes that do not carry one
    pub agent_id: String,
    /// Upper bound on one transmission
    pub request_timeout: Duration,
    /// Backoff and default budget
    pub retry: RetryPolicy,
}

impl Default for ProtocolClientConfig {
    fn default() -> Self {
        Self {
            agent_id: "orchestrator".to_string(),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl ProtocolClientConfig {
    pub fn from_config(agent_id: impl Into<String>, config: &Config) -> Self {
        Self {
            agent_id: agent_id.into(),
            request_timeout: Duration::from_secs(config.pool.request_timeout_secs),
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

/// Sends envelopes through pooled sessions.
///
/// Features:
/// - Request/response correlation by request id
/// - Exponential backoff retry for transient failures, same id every attempt
/// - Correlation and trace id propagation across hops
/// - Sessions that fail at the transport level are invalidated so the next
///   attempt opens a fresh one
pub struct ProtocolClient {
    pool: Arc<ConnectionPool>,
    config: ProtocolClientConfig,
}

impl ProtocolClient {
    pub const fn new(pool: Arc<ConnectionPool>, config: ProtocolClientConfig) -> Self {
        Self { pool, config }
    }

    pub fn agent_id(&self) -> &str {
        &self.config.agent_id
    }

    pub const fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Default transmission budget.
    pub const fn default_max_retries(&self) -> u32 {
        self.config.retry.max_retries
    }

    /// Fill in tracing metadata.
    ///
    /// Session, correlation and trace ids already present are kept unchanged;
    /// missing ones are generated. A missing `source_agent` is set to this
    /// client's id.
    pub fn prepare(&self, mut envelope: ProtocolEnvelope) -> ProtocolEnvelope {
        let metadata = &mut envelope.params.metadata;
        if metadata.session_id.is_none() {
            metadata.session_id = Some(Uuid::new_v4().to_string());
        }
        if metadata.correlation_id.is_none() {
            metadata.correlation_id = Some(Uuid::new_v4().to_string());
        }
        if metadata.trace_id.is_none() {
            metadata.trace_id = Some(Uuid::new_v4().to_string());
        }
        if metadata.source_agent.is_none() {
            metadata.source_agent = Some(self.config.agent_id.clone());
        }
        envelope
    }

    /// Send `envelope` to `endpoint`, transmitting at most `max_retries` times.
    ///
    /// Never panics on remote misbehavior: every failure is a
    /// [`ProtocolError`]. After the budget is spent on transient failures the
    /// error is [`ProtocolError::Exhausted`] with `attempts == max_retries`.
    #[instrument(
        skip_all,
        fields(endpoint = %endpoint, request_id = %envelope.id, method = %envelope.method)
    )]
    pub async fn send(
        &self,
        endpoint: &Endpoint,
        envelope: ProtocolEnvelope,
        max_retries: u32,
    ) -> Result<ResponseEnvelope> {
        let envelope = self.prepare(envelope);
        let policy = self.config.retry.with_max_retries(max_retries);

        policy
            .execute(|attempt| self.transmit(endpoint, &envelope, attempt))
            .await
    }

    /// [`send`](Self::send) with the configured default budget.
    pub async fn send_default(
        &self,
        endpoint: &Endpoint,
        envelope: ProtocolEnvelope,
    ) -> Result<ResponseEnvelope> {
        self.send(endpoint, envelope, self.default_max_retries()).await
    }

    async fn transmit(
        &self,
        endpoint: &Endpoint,
        envelope: &ProtocolEnvelope,
        attempt: u32,
    ) -> Result<ResponseEnvelope> {
        let handle = self.pool.acquire(endpoint).await?;
        debug!(
            attempt,
            session_id = %handle.session_id(),
            reused = handle.was_reused(),
            "transmitting envelope"
        );

        let outcome =
            tokio::time::timeout(self.config.request_timeout, handle.exchange(envelope)).await;

        match outcome {
            Err(_) => {
                handle.mark(SessionHealth::Degraded);
                self.pool.release(handle);
                Err(ProtocolError::Transient(TransportError::Timeout(
                    self.config.request_timeout,
                )))
            }
            Ok(Err(err)) => {
                if err.breaks_session() {
                    self.pool.invalidate(handle);
                } else {
                    self.pool.release(handle);
                }
                Err(ProtocolError::from_transport(err))
            }
            Ok(Ok(response)) => {
                self.pool.release(handle);
                validate_response(envelope, response)
            }
        }
    }
}

/// Check that a response answers `request` and unwrap remote errors.
pub fn validate_response(
    request: &ProtocolEnvelope,
    response: ResponseEnvelope,
) -> Result<ResponseEnvelope> {
    if response.id != request.id {
        return Err(ProtocolError::Format(format!(
            "response id {} does not match request id {}",
            response.id, request.id
        )));
    }
    if let Some(error) = response.error {
        return Err(ProtocolError::Remote {
            code: error.code,
            message: error.message,
            data: error.data,
        });
    }
    if response.result.is_none() {
        return Err(ProtocolError::Format(
            "response carries neither result nor error".to_string(),
        ));
    }
    Ok(response)
}
