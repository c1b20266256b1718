//! Duplex transport seam and its WebSocket implementation.
//!
//! The [`ConnectionManager`](crate::ConnectionManager) only talks to a
//! [`Transport`] obtained from a [`Connector`]. Production code uses
//! [`WsConnector`]; tests substitute the fakes in `test_utils`.

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use alo_core::ConnectionError;

/// One frame read from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    /// A text frame carrying a JSON envelope.
    Text(String),
    /// The peer closed the link, with its close code if it sent one.
    Close(Option<u16>),
    /// Ping, pong, or binary traffic. Only counts as liveness.
    Control,
}

/// An open duplex link.
///
/// `recv` must be cancel-safe: the manager polls it inside `tokio::select!`.
#[trait_variant::make(Transport: Send)]
pub trait LocalTransport {
    /// Write one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), ConnectionError>;

    /// Read the next frame. `None` once the link has ended.
    async fn recv(&mut self) -> Option<Result<TransportFrame, ConnectionError>>;

    /// Best-effort close. Never fails.
    async fn close(&mut self);
}

/// Opens transports to a URL.
#[trait_variant::make(Connector: Send)]
pub trait LocalConnector {
    type Link: Transport + 'static;

    /// Establish a link. Rejections of the credential map to
    /// [`ConnectionError::Unauthorized`].
    async fn connect(&self, url: &Url) -> Result<Self::Link, ConnectionError>;
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connects over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Link = WsLink;

    async fn connect(&self, url: &Url) -> Result<WsLink, ConnectionError> {
        match connect_async(url.as_str()).await {
            Ok((stream, _response)) => Ok(WsLink { stream }),
            Err(WsError::Http(response)) => {
                let status = response.status().as_u16();
                if status == 401 || status == 403 {
                    Err(ConnectionError::Unauthorized)
                } else {
                    Err(ConnectionError::handshake(format!(
                        "upgrade rejected with HTTP {status}"
                    )))
                }
            }
            Err(err) => Err(ConnectionError::handshake(err.to_string())),
        }
    }
}

/// An open WebSocket.
pub struct WsLink {
    stream: WsStream,
}

impl std::fmt::Debug for WsLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsLink").finish_non_exhaustive()
    }
}

impl Transport for WsLink {
    async fn send_text(&mut self, text: String) -> Result<(), ConnectionError> {
        self.stream
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|err| {
                debug!("WebSocket write failed: {}", err);
                ConnectionError::Closed
            })
    }

    async fn recv(&mut self) -> Option<Result<TransportFrame, ConnectionError>> {
        let frame = self.stream.next().await?;
        Some(match frame {
            Ok(WsMessage::Text(text)) => Ok(TransportFrame::Text(text.as_str().to_string())),
            Ok(WsMessage::Close(frame)) => {
                Ok(TransportFrame::Close(frame.map(|f| u16::from(f.code))))
            }
            Ok(_) => Ok(TransportFrame::Control),
            Err(err) => {
                debug!("WebSocket read failed: {}", err);
                Err(ConnectionError::Closed)
            }
        })
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
