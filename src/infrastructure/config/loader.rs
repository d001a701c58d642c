use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Yaml};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;

use crate::domain::models::AgentTier;
use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Invalid {0}: must be greater than 0")]
    ZeroValue(&'static str),

    #[error("Invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error("Invalid backoff: initial_backoff_ms ({0}) exceeds max_backoff_ms ({1})")]
    InvalidBackoff(u64, u64),

    #[error("Invalid pass threshold for {domain}: {value}. Must be between 0 and 1")]
    InvalidPassThreshold { domain: String, value: f64 },

    #[error("Invalid weight for metric {metric} in {domain}: {value}. Cannot be negative")]
    InvalidMetricWeight {
        domain: String,
        metric: String,
        value: f64,
    },

    #[error("Agent {0} has port 0")]
    InvalidPort(String),

    #[error("Agent {agent} has invalid tier {tier}. Must be 1, 2 or 3")]
    InvalidTier { agent: String, tier: u8 },

    #[error("Duplicate agent id: {0}")]
    DuplicateAgent(String),

    #[error("Agents {first} and {second} both use port {address}")]
    PortConflict {
        first: String,
        second: String,
        address: String,
    },

    #[error("Agent id cannot be empty")]
    EmptyAgentId,
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .meshwork/config.yaml (project config)
    /// 3. .meshwork/local.yaml (local overrides, optional)
    /// 4. Environment variables (MESHWORK_* prefix, `__` separates nesting)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".")
    }

    /// [`load`](Self::load) with the `.meshwork/` directory resolved
    /// against `root` instead of the working directory.
    pub fn load_from_dir(root: impl AsRef<Path>) -> Result<Config> {
        let dir = root.as_ref().join(".meshwork");
        let config: Config = Self::base()
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("MESHWORK_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific YAML or JSON file
    ///
    /// The format follows the extension (`.json` is JSON, anything else
    /// YAML). Unlike [`load`](Self::load), a missing file is an error.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.is_file() {
            anyhow::bail!("Config file not found: {}", path.display());
        }

        let figment = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::base().merge(Json::file(path)),
            _ => Self::base().merge(Yaml::file(path)),
        };

        let config: Config = figment
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn base() -> Figment {
        Figment::new().merge(Serialized::defaults(Config::default()))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        Self::validate_pool(config)?;

        // Retry config
        if config.retry.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.retry.max_retries));
        }

        if config.retry.initial_backoff_ms > config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        Self::validate_quality(config)?;

        if config.workflow.max_parallel == 0 {
            return Err(ConfigError::ZeroValue("workflow.max_parallel"));
        }
        if config.workflow.task_timeout_secs == 0 {
            return Err(ConfigError::ZeroValue("workflow.task_timeout_secs"));
        }

        Self::validate_agents(config)
    }

    fn validate_pool(config: &Config) -> Result<(), ConfigError> {
        let pool = &config.pool;
        let checks = [
            ("pool.max_sessions_per_endpoint", pool.max_sessions_per_endpoint as u64),
            ("pool.idle_timeout_secs", pool.idle_timeout_secs),
            ("pool.health_interval_secs", pool.health_interval_secs),
            ("pool.cleanup_interval_secs", pool.cleanup_interval_secs),
            ("pool.probe_timeout_ms", pool.probe_timeout_ms),
            ("pool.request_timeout_secs", pool.request_timeout_secs),
        ];
        match checks.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(ConfigError::ZeroValue(name)),
            None => Ok(()),
        }
    }

    fn validate_quality(config: &Config) -> Result<(), ConfigError> {
        let threshold = config.quality.default_pass_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidPassThreshold {
                domain: "default".to_string(),
                value: threshold,
            });
        }

        for domain in &config.quality.domains {
            if !(0.0..=1.0).contains(&domain.pass_threshold) {
                return Err(ConfigError::InvalidPassThreshold {
                    domain: domain.name.clone(),
                    value: domain.pass_threshold,
                });
            }
            for (metric, threshold) in &domain.metrics {
                if threshold.weight < 0.0 || threshold.weight.is_nan() {
                    return Err(ConfigError::InvalidMetricWeight {
                        domain: domain.name.clone(),
                        metric: metric.clone(),
                        value: threshold.weight,
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_agents(config: &Config) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        let mut addresses: BTreeMap<String, &str> = BTreeMap::new();

        for agent in &config.agents {
            if agent.agent_id.is_empty() {
                return Err(ConfigError::EmptyAgentId);
            }
            if !seen.insert(agent.agent_id.as_str()) {
                return Err(ConfigError::DuplicateAgent(agent.agent_id.clone()));
            }
            if AgentTier::try_from(agent.tier).is_err() {
                return Err(ConfigError::InvalidTier {
                    agent: agent.agent_id.clone(),
                    tier: agent.tier,
                });
            }

            let port = config
                .port_overrides
                .get(&agent.agent_id)
                .copied()
                .unwrap_or(agent.port);
            if port == 0 {
                return Err(ConfigError::InvalidPort(agent.agent_id.clone()));
            }

            let address = format!("{}:{port}", agent.host);
            if let Some(first) = addresses.insert(address.clone(), &agent.agent_id) {
                return Err(ConfigError::PortConflict {
                    first: first.to_string(),
                    second: agent.agent_id.clone(),
                    address,
                });
            }
        }
        Ok(())
    }
}
