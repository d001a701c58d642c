//! Network destinations for downstream agents.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical destination of one downstream agent.
///
/// Endpoints are the identity key of the session pool: two endpoints that
/// compare equal always share the same pooled session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Request path on the remote agent (defaults to `/`).
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    "/".to_string()
}

impl Endpoint {
    /// Create an endpoint for `host:port` with the root path.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: default_path(),
        }
    }

    /// Endpoint on the loopback interface.
    pub fn localhost(port: u16) -> Self {
        Self::new("localhost", port)
    }

    /// Override the request path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self
    }

    /// `host:port` form, used for logging and conflict detection.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Plain-HTTP URL for this endpoint.
    pub fn http_url(&self) -> String {
        format!("http://{}{}", self.authority(), self.path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path == "/" {
            write!(f, "{}", self.authority())
        } else {
            write!(f, "{}{}", self.authority(), self.path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_url() {
        let ep = Endpoint::localhost(8001);
        assert_eq!(ep.to_string(), "localhost:8001");
        assert_eq!(ep.http_url(), "http://localhost:8001/");

        let ep = ep.with_path("a2a");
        assert_eq!(ep.to_string(), "localhost:8001/a2a");
        assert_eq!(ep.http_url(), "http://localhost:8001/a2a");
    }

    #[test]
    fn test_path_is_part_of_identity() {
        let a = Endpoint::new("10.0.0.1", 9000);
        let b = Endpoint::new("10.0.0.1", 9000).with_path("/rpc");
        assert_ne!(a, b);
        assert_eq!(a.authority(), b.authority());
    }
}
