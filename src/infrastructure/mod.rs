//! Infrastructure layer module
//!
//! - Session pool with health and cleanup sweeps
//! - Agent-to-agent protocol client with retry
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)

pub mod a2a;
pub mod config;
pub mod logging;
pub mod pool;
