//! Agent-to-agent protocol client
//!
//! Sends request envelopes to remote agents over pooled sessions, matches
//! responses by request id and retries transient failures with exponential
//! backoff.

pub mod client;
pub mod error;
pub mod retry;

pub use client::{validate_response, ProtocolClient, ProtocolClientConfig};
pub use error::{ProtocolError, Result};
pub use retry::RetryPolicy;
