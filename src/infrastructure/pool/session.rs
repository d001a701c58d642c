//! Pooled sessions and the handles that lend them out.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::models::{Endpoint, ProtocolEnvelope, ResponseEnvelope};
use crate::domain::ports::{Connection, TransportError};

/// Health of a pooled session as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SessionHealth {
    Healthy = 0,
    /// Reachable but slow; still served.
    Degraded = 1,
    /// Never lent out again; evicted by the next cleanup sweep.
    Dead = 2,
}

impl SessionHealth {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Dead => "dead",
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Healthy,
            1 => Self::Degraded,
            _ => Self::Dead,
        }
    }
}

/// One live session bound to an endpoint, owned by the pool.
#[derive(Debug)]
pub struct PooledSession {
    id: Uuid,
    endpoint: Endpoint,
    connection: Arc<dyn Connection>,
    created_at: Instant,
    /// Milliseconds after `created_at` of the most recent acquire or release.
    last_used_ms: AtomicU64,
    outstanding: AtomicUsize,
    health: AtomicU8,
    leases: Arc<Semaphore>,
}

impl PooledSession {
    pub(crate) fn new(endpoint: Endpoint, connection: Arc<dyn Connection>, leases: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint,
            connection,
            created_at: Instant::now(),
            last_used_ms: AtomicU64::new(0),
            outstanding: AtomicUsize::new(0),
            health: AtomicU8::new(SessionHealth::Healthy as u8),
            leases: Arc::new(Semaphore::new(leases.max(1))),
        }
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) const fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used(&self) -> Instant {
        self.created_at + Duration::from_millis(self.last_used_ms.load(Ordering::Acquire))
    }

    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_used())
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn health(&self) -> SessionHealth {
        SessionHealth::from_u8(self.health.load(Ordering::Acquire))
    }

    pub fn is_dead(&self) -> bool {
        self.health() == SessionHealth::Dead
    }

    /// Record a health observation. A dead session never comes back.
    pub(crate) fn set_health(&self, health: SessionHealth) {
        let _ = self
            .health
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != SessionHealth::Dead as u8).then_some(health as u8)
            });
    }

    fn touch(&self) {
        let elapsed = Instant::now().saturating_duration_since(self.created_at);
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.last_used_ms.fetch_max(ms, Ordering::AcqRel);
    }

    /// Wait for a lease on this session.
    pub(crate) async fn lease(self: &Arc<Self>, reused: bool) -> Option<SessionHandle> {
        let permit = Arc::clone(&self.leases).acquire_owned().await.ok()?;
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        self.touch();
        Some(SessionHandle {
            session: Arc::clone(self),
            _permit: permit,
            reused,
        })
    }

    /// Refuse further leases and close the underlying connection.
    pub(crate) async fn close(&self) {
        self.set_health(SessionHealth::Dead);
        self.leases.close();
        self.connection.close().await;
    }
}

/// A session lent out for the duration of one call.
///
/// Dropping the handle returns the session to the pool, so a cancelled call
/// releases its session rather than destroying it.
#[derive(Debug)]
pub struct SessionHandle {
    session: Arc<PooledSession>,
    _permit: OwnedSemaphorePermit,
    reused: bool,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session.id()
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.session.endpoint()
    }

    pub fn health(&self) -> SessionHealth {
        self.session.health()
    }

    /// Whether this lease was served from an existing session.
    pub const fn was_reused(&self) -> bool {
        self.reused
    }

    /// Transmit one envelope over the leased session.
    pub async fn exchange(
        &self,
        request: &ProtocolEnvelope,
    ) -> Result<ResponseEnvelope, TransportError> {
        self.session.connection().exchange(request).await
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.session.is_dead()
    }

    pub(crate) fn mark(&self, health: SessionHealth) {
        self.session.set_health(health);
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.session.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.session.touch();
    }
}
