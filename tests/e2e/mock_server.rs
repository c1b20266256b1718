//! Loopback chat server for integration testing
//!
//! Accepts real WebSocket upgrades on `127.0.0.1` with `tokio-tungstenite`
//! and hands every accepted socket to the test as a [`ServerConn`].
//!
//! # Limitations
//!
//! - **Single token**: upgrades whose `token` query parameter differs from
//!   the configured one are rejected with HTTP 401
//! - **No persistence**: the server does not store or fan out messages; the
//!   test scripts every inbound frame itself
//! - **No REST**: pair it with `alo_net::test_utils::FakeApi`

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use url::Url;

/// Default wait for anything the server expects from the client.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MockChatServer {
    addr: SocketAddr,
    accepted: mpsc::UnboundedReceiver<ServerConn>,
}

impl MockChatServer {
    /// Bind an ephemeral port and start accepting upgrades for `token`.
    pub async fn start(token: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, accepted) = mpsc::unbounded_channel();
        let token = token.to_string();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    if let Some(conn) = upgrade(stream, &token).await {
                        let _ = tx.send(conn);
                    }
                });
            }
        });

        Self { addr, accepted }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Next accepted socket.
    pub async fn accept(&mut self) -> ServerConn {
        tokio::time::timeout(RECV_TIMEOUT, self.accepted.recv())
            .await
            .expect("timed out waiting for a client connection")
            .expect("accept loop stopped")
    }
}

async fn upgrade(stream: TcpStream, token: &str) -> Option<ServerConn> {
    let mut seen_token = None;
    let check = |request: &Request, response: Response| {
        let query_token = Url::parse(&format!("ws://localhost{}", request.uri()))
            .ok()
            .and_then(|url| {
                url.query_pairs()
                    .find(|(key, _)| key == "token")
                    .map(|(_, value)| value.into_owned())
            });
        seen_token = query_token.clone();
        if query_token.as_deref() == Some(token) {
            Ok(response)
        } else {
            let mut rejection = ErrorResponse::new(Some("invalid token".to_string()));
            *rejection.status_mut() = StatusCode::UNAUTHORIZED;
            Err(rejection)
        }
    };

    let ws = tokio_tungstenite::accept_hdr_async(stream, check).await.ok()?;
    Some(ServerConn {
        ws,
        token: seen_token,
    })
}

/// Server side of one accepted socket.
pub struct ServerConn {
    ws: WebSocketStream<TcpStream>,
    pub token: Option<String>,
}

impl ServerConn {
    /// Next non-heartbeat envelope from the client.
    pub async fn recv_event(&mut self) -> Value {
        tokio::time::timeout(RECV_TIMEOUT, async {
            while let Some(frame) = self.ws.next().await {
                let Ok(WsMessage::Text(text)) = frame else {
                    continue;
                };
                let Ok(envelope) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                if envelope["event"] != "ping" {
                    return envelope;
                }
            }
            panic!("client closed the socket");
        })
        .await
        .expect("timed out waiting for a client frame")
    }

    pub async fn send_event(&mut self, event: &str, payload: Value) {
        let text = json!({ "event": event, "payload": payload }).to_string();
        self.ws.send(WsMessage::Text(text.into())).await.unwrap();
    }

    /// Close with an application close code.
    pub async fn close_with(mut self, code: u16) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "closing".into(),
        };
        let _ = self.ws.close(Some(frame)).await;
    }
}
