pub mod agent;
pub mod config;
pub mod endpoint;
pub mod envelope;
pub mod quality;
pub mod report;
pub mod task;
pub mod workflow;

pub use agent::{AgentProfile, AgentTier, Capability};
pub use config::{
    AgentConfig, Config, LoggingConfig, PoolConfig, QualityConfig, QualityPolicy, RetryConfig,
    WorkflowConfig,
};
pub use endpoint::Endpoint;
pub use envelope::{
    EnvelopeMetadata, Message, Part, ProtocolEnvelope, ResponseEnvelope, Role, RpcError,
};
pub use quality::{
    MetricThreshold, QualityDomainConfig, QualityIssue, QualityResult, Severity, GENERIC_DOMAIN,
};
pub use report::{FailureKind, FailureReport, NodeOutcome, RunReport, RunState};
pub use task::{TaskId, TaskNode, TaskState};
pub use workflow::{ExecutionStrategy, FailurePolicy, TaskDecomposition, WorkflowGraph};
