//! Domain layer for meshwork
//!
//! Core models (envelopes, task graphs, quality domains), graph errors and
//! the port traits implemented by infrastructure.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{GraphError, GraphResult};
