//! Agent-to-agent protocol envelopes.
//!
//! Requests and responses are JSON-RPC style units. A request carries one
//! message (role plus ordered parts) and a metadata map used for session,
//! correlation and trace propagation across multi-hop call chains.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Protocol version stamped on every envelope.
pub const RPC_VERSION: &str = "2.0";

/// Method used for ordinary task delegation.
pub const DEFAULT_METHOD: &str = "message/send";

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The calling side.
    User,
    /// The answering agent.
    Agent,
}

/// One typed part of a message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    /// Free text.
    Text {
        /// Text content.
        text: String,
    },
    /// Structured JSON payload.
    Data {
        /// Arbitrary JSON value.
        data: Value,
    },
}

impl Part {
    /// Text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Structured part.
    pub const fn data(data: Value) -> Self {
        Self::Data { data }
    }

    /// Text content if this is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Data { .. } => None,
        }
    }

    /// Payload if this is a data part.
    pub const fn as_data(&self) -> Option<&Value> {
        match self {
            Self::Data { data } => Some(data),
            Self::Text { .. } => None,
        }
    }
}

/// A message body: role plus ordered parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
    #[serde(default, alias = "messageId")]
    pub message_id: String,
}

impl Message {
    /// Create a message with a fresh message id.
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            role,
            parts,
            message_id: Uuid::new_v4().to_string(),
        }
    }

    /// Single-part text message.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![Part::text(text)])
    }

    /// Concatenate all text parts, newline separated.
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Envelope metadata.
///
/// The well-known keys are typed; everything else a caller supplies is kept
/// verbatim in `extra` and serialized alongside them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Caller-defined keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Request parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeParams {
    pub message: Message,
    #[serde(default)]
    pub metadata: EnvelopeMetadata,
}

/// A protocol request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolEnvelope {
    #[serde(alias = "jsonrpc")]
    pub rpc_version: String,
    pub id: String,
    pub method: String,
    pub params: EnvelopeParams,
}

impl ProtocolEnvelope {
    /// Build an envelope with a fresh request id.
    pub fn new(method: impl Into<String>, message: Message) -> Self {
        Self {
            rpc_version: RPC_VERSION.to_string(),
            id: Uuid::new_v4().to_string(),
            method: method.into(),
            params: EnvelopeParams {
                message,
                metadata: EnvelopeMetadata::default(),
            },
        }
    }

    /// `message/send` request carrying a single user text part.
    pub fn request(text: impl Into<String>) -> Self {
        Self::new(DEFAULT_METHOD, Message::text(Role::User, text))
    }

    /// Override the request id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.params.metadata.session_id = Some(session_id.into());
        self
    }

    pub fn with_source_agent(mut self, agent: impl Into<String>) -> Self {
        self.params.metadata.source_agent = Some(agent.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.params.metadata.correlation_id = Some(id.into());
        self
    }

    pub fn with_trace_id(mut self, id: impl Into<String>) -> Self {
        self.params.metadata.trace_id = Some(id.into());
        self
    }

    /// Attach a caller-defined metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.metadata.extra.insert(key.into(), value);
        self
    }

    /// Append a structured data part to the message.
    pub fn with_data(mut self, data: Value) -> Self {
        self.params.message.parts.push(Part::data(data));
        self
    }

    /// Metadata accessor.
    pub const fn metadata(&self) -> &EnvelopeMetadata {
        &self.params.metadata
    }
}

/// Structured remote error carried by a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Agent-level task failure.
    pub const TASK_FAILED: i64 = -32001;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A protocol response. Mirrors the request id and carries either a result
/// or a structured error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(alias = "jsonrpc", default = "default_rpc_version")]
    pub rpc_version: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

fn default_rpc_version() -> String {
    RPC_VERSION.to_string()
}

impl ResponseEnvelope {
    /// Successful response.
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            rpc_version: RPC_VERSION.to_string(),
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Error response.
    pub fn failure(id: impl Into<String>, error: RpcError) -> Self {
        Self {
            rpc_version: RPC_VERSION.to_string(),
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    /// Successful response whose result is an agent message with one text
    /// part, the shape agents answer `message/send` with.
    pub fn agent_reply(id: impl Into<String>, text: impl Into<String>) -> Self {
        let message = Message::text(Role::Agent, text);
        Self::success(id, serde_json::json!({ "message": message }))
    }

    /// Parse `result.message` as an agent message, if present.
    pub fn result_message(&self) -> Option<Message> {
        self.result
            .as_ref()
            .and_then(|r| r.get("message"))
            .and_then(|m| serde_json::from_value(m.clone()).ok())
    }
}
