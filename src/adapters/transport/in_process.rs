//! In-process carrier.
//!
//! Agents register a handler per endpoint; exchanges call the handler
//! directly. Used for local composition and for exercising the pool and
//! client without a network. Endpoints can be taken down and probe latency
//! injected to drive health transitions.

use async_trait::async_trait;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::models::{Endpoint, ProtocolEnvelope, ResponseEnvelope};
use crate::domain::ports::{Connection, Transport, TransportError};

/// Serves envelopes addressed to one endpoint.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn handle(&self, request: ProtocolEnvelope) -> Result<ResponseEnvelope, TransportError>;
}

#[async_trait]
impl<F, Fut> AgentHandler for F
where
    F: Fn(ProtocolEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ResponseEnvelope, TransportError>> + Send,
{
    async fn handle(&self, request: ProtocolEnvelope) -> Result<ResponseEnvelope, TransportError> {
        self(request).await
    }
}

#[derive(Default)]
struct Registry {
    handlers: DashMap<Endpoint, Arc<dyn AgentHandler>>,
    down: DashMap<Endpoint, bool>,
    probe_delay: DashMap<Endpoint, Duration>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

impl Registry {
    fn is_down(&self, endpoint: &Endpoint) -> bool {
        self.down.get(endpoint).is_some_and(|d| *d)
    }
}

/// Carrier that dispatches to registered in-process handlers.
#[derive(Clone, Default)]
pub struct InProcessTransport {
    registry: Arc<Registry>,
    multiplexing: bool,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare sessions as safe for concurrent exchanges.
    #[must_use]
    pub const fn with_multiplexing(mut self, multiplexing: bool) -> Self {
        self.multiplexing = multiplexing;
        self
    }

    pub fn register(&self, endpoint: Endpoint, handler: impl AgentHandler + 'static) {
        self.registry.handlers.insert(endpoint, Arc::new(handler));
    }

    pub fn unregister(&self, endpoint: &Endpoint) {
        self.registry.handlers.remove(endpoint);
    }

    /// Simulate an outage: probes fail and exchanges are reset.
    pub fn set_down(&self, endpoint: &Endpoint, down: bool) {
        self.registry.down.insert(endpoint.clone(), down);
    }

    pub fn set_probe_delay(&self, endpoint: &Endpoint, delay: Duration) {
        self.registry.probe_delay.insert(endpoint.clone(), delay);
    }

    /// Sessions opened so far.
    pub fn connect_count(&self) -> usize {
        self.registry.connects.load(Ordering::SeqCst)
    }

    /// Sessions closed so far.
    pub fn close_count(&self) -> usize {
        self.registry.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    fn name(&self) -> &'static str {
        "in-process"
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Connection>, TransportError> {
        if self.registry.is_down(endpoint) {
            return Err(TransportError::Unreachable(endpoint.to_string()));
        }
        let handler = self
            .registry
            .handlers
            .get(endpoint)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| TransportError::Unreachable(endpoint.to_string()))?;

        // Yield so concurrent acquirers genuinely contend on the slot.
        tokio::task::yield_now().await;
        self.registry.connects.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(InProcessConnection {
            endpoint: endpoint.clone(),
            handler,
            registry: Arc::clone(&self.registry),
            multiplexing: self.multiplexing,
            closed: AtomicBool::new(false),
        }))
    }
}

/// One in-process session.
pub struct InProcessConnection {
    endpoint: Endpoint,
    handler: Arc<dyn AgentHandler>,
    registry: Arc<Registry>,
    multiplexing: bool,
    closed: AtomicBool,
}

impl std::fmt::Debug for InProcessConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessConnection")
            .field("endpoint", &self.endpoint)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connection for InProcessConnection {
    async fn exchange(
        &self,
        request: &ProtocolEnvelope,
    ) -> Result<ResponseEnvelope, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if self.registry.is_down(&self.endpoint) {
            return Err(TransportError::Reset(format!(
                "{} went away",
                self.endpoint
            )));
        }
        self.handler.handle(request.clone()).await
    }

    async fn probe(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let delay = self
            .registry
            .probe_delay
            .get(&self.endpoint)
            .map(|d| *d.value());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.registry.is_down(&self.endpoint) {
            return Err(TransportError::Unreachable(self.endpoint.to_string()));
        }
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.registry.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn supports_multiplexing(&self) -> bool {
        self.multiplexing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> impl AgentHandler {
        |req: ProtocolEnvelope| async move {
            let text = req.params.message.joined_text();
            Ok::<_, TransportError>(ResponseEnvelope::agent_reply(req.id, text))
        }
    }

    #[tokio::test]
    async fn test_exchange_with_registered_handler() {
        let transport = InProcessTransport::new();
        let ep = Endpoint::localhost(9100);
        transport.register(ep.clone(), echo());

        let conn = transport.connect(&ep).await.unwrap();
        let req = ProtocolEnvelope::request("ping").with_id("r1");
        let resp = conn.exchange(&req).await.unwrap();
        assert_eq!(resp.id, "r1");
        assert_eq!(resp.result_message().unwrap().joined_text(), "ping");
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_unreachable() {
        let transport = InProcessTransport::new();
        let err = transport.connect(&Endpoint::localhost(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_down_endpoint_and_close() {
        let transport = InProcessTransport::new();
        let ep = Endpoint::localhost(9101);
        transport.register(ep.clone(), echo());
        let conn = transport.connect(&ep).await.unwrap();

        transport.set_down(&ep, true);
        assert!(conn.probe().await.is_err());
        let err = conn.exchange(&ProtocolEnvelope::request("x")).await.unwrap_err();
        assert!(matches!(err, TransportError::Reset(_)));

        transport.set_down(&ep, false);
        assert!(conn.probe().await.is_ok());

        conn.close().await;
        conn.close().await;
        assert_eq!(transport.close_count(), 1);
        assert_eq!(
            conn.exchange(&ProtocolEnvelope::request("x")).await.unwrap_err(),
            TransportError::Closed
        );
    }
}
