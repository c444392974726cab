//! Crate-wide error type.
//!
//! Every fallible operation in this crate returns [`Result`], whose error
//! side is a single [`Error`] enum rolled up from the lower-level failure
//! modes of each layer (transport, wire codec, query engine, session
//! bookkeeping).

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying WebSocket transport failed to open, send, or receive.
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// The configured connection URL could not be parsed.
    #[error("invalid connection url {0:?}: {1}")]
    InvalidUrl(String, url::ParseError),

    /// A frame could not be encoded or decoded as a DDP message.
    #[error("protocol codec error: {0}")]
    Protocol(#[from] serde_json::Error),

    /// A collection was constructed with an empty or otherwise invalid name.
    #[error("invalid collection name: {0:?}")]
    InvalidCollectionName(String),

    /// A document carried an `_id` that is not a 24 hex character object id.
    #[error("invalid document id: {0:?}")]
    InvalidId(String),

    /// The local query engine rejected a selector or modifier.
    #[error("query engine error: {message}")]
    QueryEngine {
        message: String,
        /// Engine-specific numeric code, when the failure maps to one.
        code: Option<i32>,
    },

    /// A mutation was attempted on a DDP-backed collection before its
    /// subscription reached the `ready` state.
    #[error("collection is not ready: subscription has not become ready yet")]
    NotReady,

    /// The server rejected a subscription with a `nosub` message.
    #[error("subscription {id} failed: {reason:?}")]
    SubscriptionFailed { id: String, reason: Option<String> },

    /// The server reported an error result for a method call.
    #[error("method {id} failed: {reason:?}")]
    MethodFailed { id: String, reason: Option<String> },

    /// The server sent a top-level `error` frame not tied to any pending
    /// method or subscription.
    #[error("server reported a protocol error: {0:?}")]
    ServerError(Option<String>),

    /// The session reported `failed` during the connect handshake.
    #[error("server rejected the connect handshake (version mismatch)")]
    ConnectRejected,
}

impl Error {
    pub(crate) fn query_engine(message: impl Into<String>) -> Self {
        Error::QueryEngine {
            message: message.into(),
            code: None,
        }
    }
}
