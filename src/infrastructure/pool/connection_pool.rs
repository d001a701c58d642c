//! Endpoint-keyed session pool.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{PoolError, Result};
use super::metrics::{PoolMetrics, PoolMetricsSnapshot};
use super::session::{PooledSession, SessionHandle, SessionHealth};
use super::sweeps::{self, HealthSweepReport};
use crate::domain::models::{Endpoint, PoolConfig};
use crate::domain::ports::Transport;

/// Pool tuning.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Concurrent leases per session when the transport multiplexes.
    pub max_sessions_per_endpoint: usize,
    pub idle_timeout: Duration,
    pub health_interval: Duration,
    pub cleanup_interval: Duration,
    pub probe_timeout: Duration,
    pub degraded_latency: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

impl From<&PoolConfig> for PoolSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_sessions_per_endpoint: config.max_sessions_per_endpoint,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            health_interval: Duration::from_secs(config.health_interval_secs),
            cleanup_interval: Duration::from_secs(config.cleanup_interval_secs),
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
            degraded_latency: Duration::from_millis(config.degraded_latency_ms),
        }
    }
}

/// Per-endpoint slot. The mutex serializes session creation for one
/// endpoint without touching any other endpoint.
pub(crate) type Slot = Arc<Mutex<Option<Arc<PooledSession>>>>;

pub(crate) struct PoolInner {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) settings: PoolSettings,
    /// Slots are never removed, so every caller for an endpoint locks the
    /// same mutex.
    pub(crate) slots: DashMap<Endpoint, Slot>,
    pub(crate) metrics: PoolMetrics,
    closed: AtomicBool,
}

impl PoolInner {
    /// Current slots, cloned out so no map shard stays locked across awaits.
    pub(crate) fn slots_snapshot(&self) -> Vec<(Endpoint, Slot)> {
        self.slots
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }
}

/// Cache of live sessions keyed by endpoint.
///
/// At most one session is cached per endpoint. A session is lent to one
/// call at a time unless its transport declares multiplexing, in which case
/// up to `max_sessions_per_endpoint` calls share it.
///
/// # Example
///
/// ```rust,no_run
/// use meshwork::adapters::transport::HttpTransport;
/// use meshwork::domain::models::Endpoint;
/// use meshwork::infrastructure::pool::{ConnectionPool, PoolSettings};
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let pool = ConnectionPool::new(Arc::new(HttpTransport::new()), PoolSettings::default());
/// let handle = pool.acquire(&Endpoint::localhost(8001)).await?;
/// pool.release(handle);
/// pool.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
    cancel: CancellationToken,
    sweeps: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionPool {
    /// Create a pool and spawn its health and cleanup sweeps.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, settings: PoolSettings) -> Self {
        let pool = Self::manual(transport, settings);
        let handles = sweeps::spawn(&pool.inner, &pool.cancel);
        if let Ok(mut sweeps) = pool.sweeps.lock() {
            sweeps.extend(handles);
        }
        pool
    }

    /// Create a pool without background sweeps. Sweeps run only when
    /// [`run_health_sweep`](Self::run_health_sweep) or
    /// [`run_cleanup_sweep`](Self::run_cleanup_sweep) are called.
    pub fn manual(transport: Arc<dyn Transport>, settings: PoolSettings) -> Self {
        info!(
            transport = transport.name(),
            max_sessions_per_endpoint = settings.max_sessions_per_endpoint,
            idle_timeout_secs = settings.idle_timeout.as_secs(),
            "session pool created"
        );
        Self {
            inner: Arc::new(PoolInner {
                transport,
                settings,
                slots: DashMap::new(),
                metrics: PoolMetrics::default(),
                closed: AtomicBool::new(false),
            }),
            cancel: CancellationToken::new(),
            sweeps: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    /// Lease the session for `endpoint`, opening one if none is cached.
    ///
    /// Concurrent callers for the same endpoint serialize on that endpoint's
    /// slot, so only the first opens a session. A cached session marked dead
    /// is replaced. Session creation failures are returned as
    /// [`PoolError::Connection`] without retrying.
    ///
    /// A caller waiting on a session that is closed or marked dead before
    /// its lease is granted goes back to the slot and gets the replacement.
    pub async fn acquire(&self, endpoint: &Endpoint) -> Result<SessionHandle> {
        loop {
            if self.inner.closed.load(Ordering::Acquire) {
                return Err(PoolError::ShutDown);
            }

            let (session, reused) = self.cached_or_open(endpoint).await?;
            match session.lease(reused).await {
                Some(handle) if !handle.is_dead() => return Ok(handle),
                _ => debug!(
                    endpoint = %endpoint,
                    session_id = %session.id(),
                    "session retired while waiting for a lease"
                ),
            }
        }
    }

    async fn cached_or_open(&self, endpoint: &Endpoint) -> Result<(Arc<PooledSession>, bool)> {
        let slot = Arc::clone(self.inner.slots.entry(endpoint.clone()).or_default().value());

        let (outcome, stale) = {
            let mut cached = slot.lock().await;
            let stale = cached.take_if(|session| session.is_dead());
            let outcome = if let Some(session) = cached.as_ref() {
                self.inner.metrics.record_reused();
                Ok((Arc::clone(session), true))
            } else {
                match self.inner.transport.connect(endpoint).await {
                    Ok(connection) => {
                        let leases = if connection.supports_multiplexing() {
                            self.inner.settings.max_sessions_per_endpoint
                        } else {
                            1
                        };
                        let session =
                            Arc::new(PooledSession::new(endpoint.clone(), connection, leases));
                        self.inner.metrics.record_created();
                        info!(
                            endpoint = %endpoint,
                            session_id = %session.id(),
                            leases,
                            "opened pooled session"
                        );
                        *cached = Some(Arc::clone(&session));
                        Ok((session, false))
                    }
                    Err(source) => {
                        warn!(endpoint = %endpoint, error = %source, "failed to open session");
                        Err(PoolError::Connection {
                            endpoint: endpoint.clone(),
                            source,
                        })
                    }
                }
            };
            (outcome, stale)
        };

        if let Some(stale) = stale {
            debug!(endpoint = %endpoint, session_id = %stale.id(), "replacing dead session");
            self.inner.metrics.record_evicted(1);
            stale.close().await;
        }

        outcome
    }

    /// Return a session to the pool without closing it.
    pub fn release(&self, handle: SessionHandle) {
        debug!(
            endpoint = %handle.endpoint(),
            session_id = %handle.session_id(),
            "released session"
        );
        drop(handle);
    }

    /// Return a session that failed at the transport level. It is marked
    /// dead so the next acquire opens a fresh one.
    pub fn invalidate(&self, handle: SessionHandle) {
        warn!(
            endpoint = %handle.endpoint(),
            session_id = %handle.session_id(),
            "invalidating session"
        );
        handle.mark(SessionHealth::Dead);
        drop(handle);
    }

    /// Health of the session cached for `endpoint`, if any.
    pub fn session_health(&self, endpoint: &Endpoint) -> Option<SessionHealth> {
        let slot = Arc::clone(self.inner.slots.get(endpoint)?.value());
        let cached = slot.try_lock().ok()?;
        cached.as_ref().map(|s| s.health())
    }

    /// Number of cached sessions. Slots locked by an in-progress acquire
    /// are not counted.
    pub fn session_count(&self) -> usize {
        self.inner
            .slots_snapshot()
            .iter()
            .filter(|(_, slot)| slot.try_lock().is_ok_and(|cached| cached.is_some()))
            .count()
    }

    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Probe every cached session once.
    pub async fn run_health_sweep(&self) -> HealthSweepReport {
        sweeps::health_sweep(&self.inner).await
    }

    /// Evict idle and dead sessions once. Returns the number evicted.
    pub async fn run_cleanup_sweep(&self) -> usize {
        sweeps::cleanup_sweep(&self.inner).await
    }

    /// Stop both sweeps, wait for them, then close every cached session.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down session pool");
        self.cancel.cancel();

        let handles = self
            .sweeps
            .lock()
            .map(|mut sweeps| std::mem::take(&mut *sweeps))
            .unwrap_or_default();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "sweep task ended abnormally");
            }
        }

        let mut closed = 0_usize;
        for (_, slot) in self.inner.slots_snapshot() {
            let session = slot.lock().await.take();
            if let Some(session) = session {
                session.close().await;
                closed += 1;
            }
        }
        info!(closed, "session pool shut down");
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
