//! The WebSocket transport: owns the socket and exposes a minimal
//! send/receive surface. [`Session`](crate::session::Session) depends only
//! on the [`Transport`] trait, so the wire protocol logic never touches
//! `tokio-tungstenite` directly.

use crate::error::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// A duplex channel of UTF-8 text frames.
#[async_trait::async_trait(?Send)]
pub trait Transport {
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Awaits the next text frame, or `Ok(None)` once the peer closes the
    /// connection cleanly.
    async fn recv_text(&mut self) -> Result<Option<String>>;
}

/// A [`Transport`] backed by a real WebSocket connection.
pub struct WebSocketTransport {
    socket: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

impl WebSocketTransport {
    /// Opens a WebSocket connection to `url` (e.g.
    /// `ws://localhost:3000/websocket`), waiting indefinitely for the
    /// upgrade to complete.
    pub async fn connect(url: &str) -> Result<Self> {
        let parsed = url::Url::parse(url).map_err(|err| Error::InvalidUrl(url.to_string(), err))?;
        let (socket, _response) = connect_async(parsed).await?;
        Ok(WebSocketTransport { socket })
    }

    /// Like [`WebSocketTransport::connect`], but fails with
    /// [`Error::Transport`] if the upgrade hasn't completed within
    /// `timeout`. Used by [`SessionConfig`](crate::config::SessionConfig)'s
    /// `connect_timeout`.
    pub async fn connect_with_timeout(url: &str, timeout: Duration) -> Result<Self> {
        bound_by_timeout(timeout, Self::connect(url)).await
    }
}

/// Races `fut` against `timeout`, mapping expiry to the same
/// [`Error::Transport`] variant a real I/O timeout would produce. Factored
/// out of [`WebSocketTransport::connect_with_timeout`] so the expiry
/// behaviour can be exercised without a real socket.
async fn bound_by_timeout<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Transport(tokio_tungstenite::tungstenite::Error::Io(
            std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
        ))),
    }
}

#[async_trait::async_trait(?Send)]
impl Transport for WebSocketTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        tracing::debug!(frame = %text, "-> ddp");
        self.socket.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    async fn recv_text(&mut self) -> Result<Option<String>> {
        loop {
            match self.socket.next().await {
                None => return Ok(None),
                Some(Ok(WsMessage::Text(text))) => {
                    tracing::debug!(frame = %text, "<- ddp");
                    return Ok(Some(text));
                }
                Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => continue,
                Some(Ok(WsMessage::Close(_))) => return Ok(None),
                Some(Ok(other)) => {
                    tracing::warn!(?other, "dropping non-text ddp frame");
                    continue;
                }
                Some(Err(err)) => return Err(Error::Transport(err)),
            }
        }
    }
}
