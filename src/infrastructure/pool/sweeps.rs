//! Background health and cleanup sweeps.
//!
//! Both sweeps snapshot the slot table, use `try_lock` on each slot so they
//! never wait behind an acquire that is opening a session, and do their slow
//! work (probing, closing) with no slot lock held.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection_pool::PoolInner;
use super::session::{PooledSession, SessionHealth};

/// Outcome of one health sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSweepReport {
    pub probed: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub dead: usize,
}

pub(crate) async fn health_sweep(inner: &PoolInner) -> HealthSweepReport {
    let sessions: Vec<Arc<PooledSession>> = inner
        .slots_snapshot()
        .into_iter()
        .filter_map(|(_, slot)| {
            slot.try_lock()
                .ok()
                .and_then(|cached| cached.as_ref().map(Arc::clone))
        })
        .filter(|session| !session.is_dead())
        .collect();

    let probe_timeout = inner.settings.probe_timeout;
    let degraded_latency = inner.settings.degraded_latency;

    let results = join_all(sessions.iter().map(|session| async move {
        let started = Instant::now();
        let outcome = tokio::time::timeout(probe_timeout, session.connection().probe()).await;
        let health = match outcome {
            Ok(Ok(())) if started.elapsed() > degraded_latency => SessionHealth::Degraded,
            Ok(Ok(())) => SessionHealth::Healthy,
            Ok(Err(e)) => {
                warn!(endpoint = %session.endpoint(), error = %e, "session probe failed");
                SessionHealth::Dead
            }
            Err(_) => {
                warn!(
                    endpoint = %session.endpoint(),
                    timeout_ms = u64::try_from(probe_timeout.as_millis()).unwrap_or(u64::MAX),
                    "session probe timed out"
                );
                SessionHealth::Dead
            }
        };
        session.set_health(health);
        health
    }))
    .await;

    let mut report = HealthSweepReport {
        probed: results.len(),
        ..HealthSweepReport::default()
    };
    for health in results {
        inner
            .metrics
            .record_health_check(health == SessionHealth::Dead);
        match health {
            SessionHealth::Healthy => report.healthy += 1,
            SessionHealth::Degraded => report.degraded += 1,
            SessionHealth::Dead => report.dead += 1,
        }
    }

    debug!(
        probed = report.probed,
        degraded = report.degraded,
        dead = report.dead,
        "health sweep finished"
    );
    report
}

pub(crate) async fn cleanup_sweep(inner: &PoolInner) -> usize {
    let idle_timeout = inner.settings.idle_timeout;
    let mut evicted = Vec::new();

    for (endpoint, slot) in inner.slots_snapshot() {
        let Ok(mut cached) = slot.try_lock() else {
            continue;
        };
        let expired = cached.take_if(|session| {
            session.is_dead() || (session.outstanding() == 0 && session.idle_for() >= idle_timeout)
        });
        if let Some(session) = expired {
            debug!(
                endpoint = %endpoint,
                session_id = %session.id(),
                health = session.health().as_str(),
                idle_secs = session.idle_for().as_secs(),
                "evicting session"
            );
            evicted.push(session);
        }
    }

    let count = evicted.len();
    join_all(evicted.iter().map(|session| session.close())).await;
    inner.metrics.record_evicted(count as u64);

    if count > 0 {
        info!(evicted = count, "cleanup sweep evicted sessions");
    }
    count
}

/// Spawn the periodic sweeps. Each skips its immediate first tick and exits
/// when `cancel` fires.
pub(crate) fn spawn(inner: &Arc<PoolInner>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
    let health_interval = inner.settings.health_interval;
    let cleanup_interval = inner.settings.cleanup_interval;

    let health = spawn_loop(
        "health",
        health_interval,
        Arc::clone(inner),
        cancel.clone(),
        |inner| async move {
            health_sweep(&inner).await;
        },
    );
    let cleanup = spawn_loop(
        "cleanup",
        cleanup_interval,
        Arc::clone(inner),
        cancel.clone(),
        |inner| async move {
            cleanup_sweep(&inner).await;
        },
    );
    vec![health, cleanup]
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    inner: Arc<PoolInner>,
    cancel: CancellationToken,
    sweep: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<PoolInner>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);

        // Skip first tick (fires immediately)
        interval.tick().await;

        info!(sweep = name, interval_secs = period.as_secs(), "started pool sweep");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => sweep(Arc::clone(&inner)).await,
            }
        }

        info!(sweep = name, "pool sweep stopped");
    })
}
