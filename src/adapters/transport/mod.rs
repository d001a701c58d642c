//! Transport adapters.

pub mod http;
pub mod in_process;

pub use http::{HttpConnection, HttpTransport, HttpTransportConfig, AGENT_CARD_PATH};
pub use in_process::{AgentHandler, InProcessConnection, InProcessTransport};
