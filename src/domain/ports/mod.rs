//! Port trait definitions (Hexagonal Architecture)
//!
//! - Transport / Connection: carriers that move envelopes to an endpoint
//! - TaskDispatcher: hands one workflow node to its agent
//!
//! Infrastructure and adapters implement these so that the pool, the
//! protocol client and the workflow engine stay independent of any
//! particular wire format or agent topology.

pub mod dispatcher;
pub mod transport;

pub use dispatcher::{DispatchContext, DispatchError, TaskDispatcher};
pub use transport::{Connection, Transport, TransportError};
