//! Configuration loading and validation
//!
//! Defaults, `.meshwork/config.yaml`, `.meshwork/local.yaml` and
//! `MESHWORK_*` environment variables are merged with figment, then checked
//! for agent port conflicts, invalid tiers and out-of-range thresholds.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
