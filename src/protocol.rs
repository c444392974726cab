//! The DDP wire envelope: every frame exchanged with the server is a single
//! UTF-8 JSON object carrying a `msg` field that names its shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message sent from this client to the server.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Opens (or resumes) a session.
    Connect {
        version: String,
        support: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },
    /// Answers a server `ping`.
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Invokes a remote method.
    Method {
        method: String,
        params: Vec<Value>,
        id: String,
    },
    /// Opens a subscription to a published record set.
    Sub {
        name: String,
        params: Vec<Value>,
        id: String,
    },
    /// Closes a previously opened subscription.
    Unsub { id: String },
}

/// A message received from the server.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ServerMessage {
    /// The connect handshake succeeded; `session` identifies it.
    Connected { session: String },
    /// The connect handshake was rejected (protocol version mismatch).
    Failed {
        #[serde(default)]
        version: Option<String>,
    },
    /// Keepalive; must be answered with a [`ClientMessage::Pong`].
    Ping {
        #[serde(default)]
        id: Option<String>,
    },
    /// A protocol-level error not tied to any particular method or sub.
    Error {
        #[serde(default)]
        reason: Option<String>,
        #[serde(default, rename = "offendingMessage")]
        offending_message: Option<Value>,
    },
    /// A subscription could not be satisfied.
    Nosub {
        id: String,
        #[serde(default)]
        error: Option<ServerError>,
    },
    /// A document was added to a subscribed record set.
    Added {
        collection: String,
        id: String,
        #[serde(default)]
        fields: Option<Value>,
    },
    /// A document in a subscribed record set changed.
    Changed {
        collection: String,
        id: String,
        #[serde(default)]
        fields: Option<Value>,
        #[serde(default)]
        cleared: Option<Vec<String>>,
    },
    /// A document left a subscribed record set.
    Removed { collection: String, id: String },
    /// One or more subscriptions have delivered their initial batch.
    Ready { subs: Vec<String> },
    /// The data effects of one or more method calls are now visible in any
    /// subscriptions the caller is watching.
    Updated { methods: Vec<String> },
    /// The result of a method call.
    Result {
        id: String,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<ServerError>,
    },
}

/// The error shape the server embeds in `nosub`/`result` frames.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServerError {
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ServerError {
    /// A best-effort human-readable summary, preferring `reason` then
    /// `message` then the raw `error` code.
    pub fn summary(&self) -> Option<String> {
        self.reason
            .clone()
            .or_else(|| self.message.clone())
            .or_else(|| self.error.as_ref().map(|v| v.to_string()))
    }
}

/// Encodes an object id the way DDP method payloads expect it: the MongoDB
/// extended-JSON form, not a bare string.
pub fn oid_extended_json(id: &str) -> Value {
    serde_json::json!({ "$type": "oid", "$value": id })
}
