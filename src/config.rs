//! Connection configuration.

use std::time::Duration;

/// The default DDP endpoint published servers listen on.
pub const DEFAULT_URL: &str = "ws://localhost:3000/websocket";

/// How long [`WebSocketTransport::connect`](crate::transport::WebSocketTransport::connect)
/// waits for the initial TCP/TLS/WebSocket upgrade before giving up, absent
/// an explicit [`SessionConfig::connect_timeout`].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for opening a [`Session`](crate::session::Session).
///
/// This client has no on-disk configuration of its own — unlike a server,
/// there is nothing to read from a file at startup — so this is a small
/// struct built directly in code, mirroring how the original took these as
/// constructor parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The WebSocket URL to connect to.
    pub url: String,
    /// A previously issued session id to present during the connect
    /// handshake. Reconnect/resume is not implemented: nothing currently
    /// causes the server accepting this id to matter, but the field keeps
    /// the handshake shape correct for servers that do care.
    pub session: Option<String>,
    /// How long to wait for the transport to open before failing with
    /// [`Error::Transport`](crate::error::Error::Transport). `None` waits
    /// indefinitely.
    pub connect_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            url: DEFAULT_URL.to_string(),
            session: None,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
        }
    }
}

impl SessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        SessionConfig {
            url: url.into(),
            ..SessionConfig::default()
        }
    }
}
