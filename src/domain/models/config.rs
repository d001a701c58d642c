use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::agent::Capability;
use super::quality::QualityDomainConfig;
use super::workflow::{ExecutionStrategy, FailurePolicy};

/// Main configuration structure for meshwork
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Deployment environment label (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Session pool tuning
    #[serde(default)]
    pub pool: PoolConfig,

    /// Protocol retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Quality domains and thresholds
    #[serde(default)]
    pub quality: QualityConfig,

    /// Workflow execution defaults
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Known agents
    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    /// Per-agent port overrides, applied on top of `agents`
    #[serde(default)]
    pub port_overrides: BTreeMap<String, u16>,

    /// Feature flags
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            logging: LoggingConfig::default(),
            pool: PoolConfig::default(),
            retry: RetryConfig::default(),
            quality: QualityConfig::default(),
            workflow: WorkflowConfig::default(),
            agents: vec![],
            port_overrides: BTreeMap::new(),
            features: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Whether a feature flag is on. Unknown flags are off.
    pub fn is_feature_enabled(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.agent_id == agent_id)
    }

    /// Insert an agent, replacing any existing entry with the same id.
    pub fn add_agent(&mut self, agent: AgentConfig) {
        match self.agents.iter_mut().find(|a| a.agent_id == agent.agent_id) {
            Some(existing) => *existing = agent,
            None => self.agents.push(agent),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Also log to stdout when a log directory is set
    #[serde(default = "default_true")]
    pub enable_stdout: bool,

    /// Rotation for file output (daily, hourly, never)
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            enable_stdout: true,
            rotation: default_rotation(),
        }
    }
}

/// Session pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PoolConfig {
    /// Concurrent leases per endpoint when the transport multiplexes
    #[serde(default = "default_max_sessions_per_endpoint")]
    pub max_sessions_per_endpoint: usize,

    /// Idle time after which the cleanup sweep evicts a session
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Health sweep period
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,

    /// Cleanup sweep period
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Liveness probe timeout
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Probes slower than this mark a session degraded
    #[serde(default = "default_degraded_latency_ms")]
    pub degraded_latency_ms: u64,

    /// Per-transmission request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

const fn default_max_sessions_per_endpoint() -> usize {
    10
}

const fn default_idle_timeout_secs() -> u64 {
    300
}

const fn default_health_interval_secs() -> u64 {
    300
}

const fn default_cleanup_interval_secs() -> u64 {
    600
}

const fn default_probe_timeout_ms() -> u64 {
    5_000
}

const fn default_degraded_latency_ms() -> u64 {
    1_000
}

const fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_endpoint: default_max_sessions_per_endpoint(),
            idle_timeout_secs: default_idle_timeout_secs(),
            health_interval_secs: default_health_interval_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            degraded_latency_ms: default_degraded_latency_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Total transmissions per call, first attempt included
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    200
}

const fn default_max_backoff_ms() -> u64 {
    5_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Quality framework configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QualityConfig {
    /// Pass threshold for domains that do not set their own
    #[serde(default = "default_pass_threshold")]
    pub default_pass_threshold: f64,

    /// Domains that override or extend the built-in set
    #[serde(default)]
    pub domains: Vec<QualityDomainConfig>,
}

const fn default_pass_threshold() -> f64 {
    0.8
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            default_pass_threshold: default_pass_threshold(),
            domains: vec![],
        }
    }
}

/// What the engine does with a result that fails its quality gate.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPolicy {
    /// Fail the node.
    #[default]
    Reject,
    /// Re-dispatch with the issue list appended to the instruction.
    RetryWithFeedback,
    /// Accept the result and keep the issues on record.
    PassThrough,
}

/// Workflow engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkflowConfig {
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default)]
    pub strategy: ExecutionStrategy,

    /// Batch size for the hybrid strategy
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Upper bound on one node dispatch, protocol retries included
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    #[serde(default)]
    pub quality_policy: QualityPolicy,

    /// Extra dispatches allowed by `retry_with_feedback`
    #[serde(default = "default_quality_retries")]
    pub quality_retries: u32,
}

const fn default_max_parallel() -> usize {
    4
}

const fn default_task_timeout_secs() -> u64 {
    300
}

const fn default_quality_retries() -> u32 {
    1
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            strategy: ExecutionStrategy::default(),
            max_parallel: default_max_parallel(),
            task_timeout_secs: default_task_timeout_secs(),
            quality_policy: QualityPolicy::default(),
            quality_retries: default_quality_retries(),
        }
    }
}

/// One addressable agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    pub agent_id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default = "default_host")]
    pub host: String,

    pub port: u16,

    #[serde(default = "default_path")]
    pub path: String,

    /// 1 orchestrator, 2 specialist, 3 service
    #[serde(default = "default_tier")]
    pub tier: u8,

    #[serde(default)]
    pub description: String,

    /// Additional capabilities beyond those implied by the flags below
    #[serde(default)]
    pub capabilities: Vec<Capability>,

    #[serde(default)]
    pub quality_domain: Option<String>,

    /// Grants the tool-use capability
    #[serde(default = "default_true")]
    pub tools_enabled: bool,

    /// Grants the delegation capability
    #[serde(default = "default_true")]
    pub a2a_enabled: bool,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

const fn default_tier() -> u8 {
    3
}

impl AgentConfig {
    pub fn new(agent_id: impl Into<String>, port: u16, tier: u8) -> Self {
        let agent_id = agent_id.into();
        Self {
            name: agent_id.clone(),
            agent_id,
            host: default_host(),
            port,
            path: default_path(),
            tier,
            description: String::new(),
            capabilities: vec![],
            quality_domain: None,
            tools_enabled: true,
            a2a_enabled: true,
        }
    }
}
