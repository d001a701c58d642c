//! Meshwork - multi-tier agent coordination
//!
//! An orchestrator decomposes a request into a task graph, delegates each task
//! to a downstream agent over an agent-to-agent protocol and quality-checks the
//! results before they flow upward.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, graph algorithms, ports and errors
//! - **Adapters** (`adapters`): HTTP and in-process transports
//! - **Infrastructure Layer** (`infrastructure`): session pool, protocol client,
//!   configuration and logging
//! - **Service Layer** (`services`): quality framework, agent directory,
//!   protocol dispatcher and workflow engine
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use meshwork::adapters::transport::HttpTransport;
//! use meshwork::infrastructure::a2a::{ProtocolClient, ProtocolClientConfig};
//! use meshwork::infrastructure::config::ConfigLoader;
//! use meshwork::infrastructure::pool::{ConnectionPool, PoolSettings};
//! use meshwork::services::{
//!     AgentDirectory, EngineSettings, ProtocolDispatcher, QualityFramework, WorkflowEngine,
//! };
//! use meshwork::domain::models::{TaskDecomposition, TaskNode};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let pool = Arc::new(ConnectionPool::new(
//!         Arc::new(HttpTransport::new()),
//!         PoolSettings::from(&config.pool),
//!     ));
//!     let client = Arc::new(ProtocolClient::new(
//!         Arc::clone(&pool),
//!         ProtocolClientConfig::from_config("orchestrator", &config),
//!     ));
//!     let directory = Arc::new(AgentDirectory::from_config(&config)?);
//!     let engine = WorkflowEngine::new(
//!         Arc::new(ProtocolDispatcher::new(client, directory)),
//!         Arc::new(QualityFramework::new(&config.quality)),
//!         EngineSettings::from(&config.workflow),
//!     );
//!
//!     let report = engine
//!         .run(TaskDecomposition::new(vec![TaskNode::new(
//!             "market", "analyst", "Assess the EU market",
//!         )]))
//!         .await?;
//!     println!("{:?}", report.state);
//!
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{
    Config, Endpoint, ProtocolEnvelope, ResponseEnvelope, RunReport, TaskDecomposition, TaskNode,
    WorkflowGraph,
};
pub use domain::{GraphError, GraphResult};
pub use infrastructure::a2a::{ProtocolClient, ProtocolError};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use infrastructure::pool::ConnectionPool;
pub use services::{QualityFramework, WorkflowEngine};
