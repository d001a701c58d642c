use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Pool counters. Purely observational.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    sessions_created: AtomicU64,
    sessions_reused: AtomicU64,
    health_checks_performed: AtomicU64,
    health_check_failures: AtomicU64,
    sessions_evicted: AtomicU64,
}

/// Point-in-time copy of [`PoolMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMetricsSnapshot {
    pub sessions_created: u64,
    pub sessions_reused: u64,
    pub health_checks_performed: u64,
    pub health_check_failures: u64,
    pub sessions_evicted: u64,
}

impl PoolMetrics {
    pub(crate) fn record_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reused(&self) {
        self.sessions_reused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_health_check(&self, failed: bool) {
        self.health_checks_performed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.health_check_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_evicted(&self, count: u64) {
        self.sessions_evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_reused: self.sessions_reused.load(Ordering::Relaxed),
            health_checks_performed: self.health_checks_performed.load(Ordering::Relaxed),
            health_check_failures: self.health_check_failures.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
        }
    }
}

impl PoolMetricsSnapshot {
    /// Share of acquisitions served by an existing session.
    #[allow(clippy::cast_precision_loss)]
    pub fn reuse_rate(&self) -> f64 {
        let total = self.sessions_created + self.sessions_reused;
        if total == 0 {
            0.0
        } else {
            self.sessions_reused as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = PoolMetrics::default();
        metrics.record_created();
        metrics.record_reused();
        metrics.record_reused();
        metrics.record_reused();
        metrics.record_health_check(false);
        metrics.record_health_check(true);
        metrics.record_evicted(2);

        let snap = metrics.snapshot();
        assert_eq!(snap.sessions_created, 1);
        assert_eq!(snap.sessions_reused, 3);
        assert_eq!(snap.health_checks_performed, 2);
        assert_eq!(snap.health_check_failures, 1);
        assert_eq!(snap.sessions_evicted, 2);
        assert!((snap.reuse_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_reuse_rate() {
        assert!(PoolMetricsSnapshot::default().reuse_rate().abs() < f64::EPSILON);
    }
}
