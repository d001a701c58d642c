//! HTTP carrier: envelopes are POSTed as JSON to the endpoint URL.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::domain::models::{Endpoint, ProtocolEnvelope, ResponseEnvelope};
use crate::domain::ports::{Connection, Transport, TransportError};

/// Path probed to check that an agent is up. Any HTTP answer counts as alive.
pub const AGENT_CARD_PATH: &str = "/.well-known/agent.json";

/// Configuration for the HTTP carrier
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Per-request timeout
    pub request_timeout: Duration,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Idle keep-alive for the session's underlying connections
    pub keepalive: Duration,
    /// Allow concurrent requests over one pooled session
    pub multiplexing: bool,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            keepalive: Duration::from_secs(30),
            multiplexing: true,
        }
    }
}

/// Opens one keep-alive HTTP client per pooled session.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    config: HttpTransportConfig,
}

impl HttpTransport {
    /// HTTP carrier with default timeouts.
    pub fn new() -> Self {
        Self::with_config(HttpTransportConfig::default())
    }

    pub const fn with_config(config: HttpTransportConfig) -> Self {
        Self { config }
    }

    fn build_client(&self) -> Result<ReqwestClient> {
        ReqwestClient::builder()
            .timeout(self.config.request_timeout)
            .connect_timeout(self.config.connect_timeout)
            .pool_idle_timeout(self.config.keepalive)
            .pool_max_idle_per_host(1)
            .tcp_nodelay(true)
            .build()
            .context("Failed to build HTTP client")
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Connection>, TransportError> {
        let client = self
            .build_client()
            .map_err(|e| TransportError::Unreachable(format!("{e:#}")))?;
        let connection = HttpConnection {
            client,
            endpoint: endpoint.clone(),
            request_timeout: self.config.request_timeout,
            multiplexing: self.config.multiplexing,
        };
        connection.probe().await?;
        debug!(endpoint = %endpoint, "http session established");
        Ok(Arc::new(connection))
    }
}

/// One pooled HTTP session.
#[derive(Debug)]
pub struct HttpConnection {
    client: ReqwestClient,
    endpoint: Endpoint,
    request_timeout: Duration,
    multiplexing: bool,
}

impl HttpConnection {
    fn classify(&self, err: &reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.request_timeout)
        } else if err.is_connect() {
            TransportError::Unreachable(format!("{}: {err}", self.endpoint))
        } else if err.is_decode() {
            TransportError::Malformed(err.to_string())
        } else {
            TransportError::Reset(err.to_string())
        }
    }

    fn card_url(&self) -> String {
        format!("http://{}{AGENT_CARD_PATH}", self.endpoint.authority())
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn exchange(
        &self,
        request: &ProtocolEnvelope,
    ) -> Result<ResponseEnvelope, TransportError> {
        let response = self
            .client
            .post(self.endpoint.http_url())
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| self.classify(&e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(&e))?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    async fn probe(&self) -> Result<(), TransportError> {
        self.client
            .get(self.card_url())
            .send()
            .await
            .map(|_| ())
            .map_err(|e| self.classify(&e))
    }

    async fn close(&self) {
        debug!(endpoint = %self.endpoint, "http session closed");
    }

    fn supports_multiplexing(&self) -> bool {
        self.multiplexing
    }
}
