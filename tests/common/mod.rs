//! Common test utilities for integration tests
//!
//! Provides in-process agents, pool/client wiring and logging setup shared
//! across the integration test files.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshwork::adapters::transport::{AgentHandler, InProcessTransport};
use meshwork::domain::models::{Endpoint, Message, Part, ProtocolEnvelope, ResponseEnvelope, Role};
use meshwork::domain::ports::TransportError;
use meshwork::infrastructure::a2a::{ProtocolClient, ProtocolClientConfig, RetryPolicy};
use meshwork::infrastructure::pool::{ConnectionPool, PoolSettings};

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Agent that echoes the request text back.
pub fn echo_agent() -> impl AgentHandler {
    |req: ProtocolEnvelope| async move {
        let text = req.params.message.joined_text();
        Ok::<_, TransportError>(ResponseEnvelope::agent_reply(req.id, text))
    }
}

/// Agent that answers with its text plus a data part holding `metrics`.
pub fn metrics_agent(metrics: Value) -> impl AgentHandler {
    move |req: ProtocolEnvelope| {
        let metrics = metrics.clone();
        async move {
            let message = Message::new(
                Role::Agent,
                vec![
                    Part::text(format!("done: {}", req.params.message.joined_text())),
                    Part::data(json!({ "metrics": metrics })),
                ],
            );
            Ok::<_, TransportError>(ResponseEnvelope::success(
                req.id,
                json!({ "message": message }),
            ))
        }
    }
}

/// Agent that resets the connection `failures` times, then echoes.
///
/// Returns the handler and a counter of calls it has seen.
pub fn flaky_agent(failures: usize) -> (impl AgentHandler, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let handler = move |req: ProtocolEnvelope| {
        let n = seen.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < failures {
                Err(TransportError::Reset("connection reset by peer".into()))
            } else {
                let text = req.params.message.joined_text();
                Ok(ResponseEnvelope::agent_reply(req.id, text))
            }
        }
    };
    (handler, calls)
}

/// Pool with short intervals and no background sweeps.
pub fn manual_pool(transport: &InProcessTransport) -> Arc<ConnectionPool> {
    Arc::new(ConnectionPool::manual(
        Arc::new(transport.clone()),
        test_pool_settings(),
    ))
}

pub fn test_pool_settings() -> PoolSettings {
    PoolSettings {
        max_sessions_per_endpoint: 4,
        idle_timeout: Duration::from_secs(60),
        health_interval: Duration::from_secs(10),
        cleanup_interval: Duration::from_secs(30),
        probe_timeout: Duration::from_secs(2),
        degraded_latency: Duration::from_millis(500),
    }
}

/// Client with a fast backoff so retry tests stay quick.
pub fn client(pool: Arc<ConnectionPool>) -> ProtocolClient {
    ProtocolClient::new(
        pool,
        ProtocolClientConfig {
            agent_id: "orchestrator".to_string(),
            request_timeout: Duration::from_secs(5),
            retry: RetryPolicy::new(3, 10, 50),
        },
    )
}

pub fn endpoint(port: u16) -> Endpoint {
    Endpoint::localhost(port)
}
