//! Service layer
//!
//! Coordinates the infrastructure into a workflow run: resolves agents,
//! dispatches nodes over the protocol client, gates results on quality and
//! drives the graph to completion.

pub mod a2a_dispatcher;
pub mod agent_directory;
pub mod quality_framework;
pub mod workflow_engine;

pub use a2a_dispatcher::ProtocolDispatcher;
pub use agent_directory::{profile_from_config, AgentDirectory, DirectoryError};
pub use quality_framework::{extract_metric, QualityFramework};
pub use workflow_engine::{
    EngineSettings, ExecutionEvent, GraphMutation, MutationError, MutationHandle, WorkflowEngine,
    WorkflowRun,
};
