use thiserror::Error;

use crate::domain::models::Endpoint;
use crate::domain::ports::TransportError;

/// Session pool errors
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Failed to open session to {endpoint}: {source}")]
    Connection {
        endpoint: Endpoint,
        #[source]
        source: TransportError,
    },

    #[error("Session pool is shut down")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, PoolError>;
