//! Session pool
//!
//! Amortizes session setup across calls to the same endpoint:
//! - One cached session per endpoint, created lazily under a per-endpoint lock
//! - Leases returned on drop, so cancelled calls release their session
//! - Periodic health sweep (probe, mark degraded or dead)
//! - Periodic cleanup sweep (evict idle and dead sessions)

pub mod connection_pool;
pub mod error;
pub mod metrics;
pub mod session;
pub mod sweeps;

pub use connection_pool::{ConnectionPool, PoolSettings};
pub use error::PoolError;
pub use metrics::{PoolMetrics, PoolMetricsSnapshot};
pub use session::{PooledSession, SessionHandle, SessionHealth};
pub use sweeps::HealthSweepReport;
