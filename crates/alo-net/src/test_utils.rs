//! Test fakes for the transport and REST seams.
//!
//! - [`FakeConnector`] hands out in-memory links; each successful connect
//!   yields a [`FakeServer`] through [`FakeServers`] so a test can observe
//!   outbound frames and inject inbound ones.
//! - [`FakeApi`] is an in-memory [`ChatApi`] with scripted failures.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use alo_core::prelude::*;
use alo_core::protocol::Envelope;
use alo_core::{ConnectionError, Conversation, Message};

use crate::rest::{ChatApi, NewConversation};
use crate::transport::{Connector, Transport, TransportFrame};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// FakeConnector
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ConnectorShared {
    /// Outcomes consumed one per attempt, before `default_failure` applies.
    script: VecDeque<std::result::Result<(), ConnectionError>>,
    default_failure: Option<ConnectionError>,
    attempts: u32,
    urls: Vec<Url>,
}

/// In-memory [`Connector`].
#[derive(Clone)]
pub struct FakeConnector {
    shared: Arc<Mutex<ConnectorShared>>,
    servers: mpsc::UnboundedSender<FakeServer>,
}

/// Server-side ends of every link the connector opened, in order.
pub struct FakeServers {
    rx: mpsc::UnboundedReceiver<FakeServer>,
}

impl FakeServers {
    pub async fn next(&mut self) -> Option<FakeServer> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<FakeServer> {
        self.rx.try_recv().ok()
    }
}

impl FakeConnector {
    pub fn new() -> (Self, FakeServers) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                shared: Arc::new(Mutex::new(ConnectorShared::default())),
                servers: tx,
            },
            FakeServers { rx },
        )
    }

    /// Fail the next attempt with `err`.
    pub fn fail_next(&self, err: ConnectionError) {
        lock(&self.shared).script.push_back(Err(err));
    }

    /// Let the next attempt succeed even while a default failure is set.
    pub fn succeed_next(&self) {
        lock(&self.shared).script.push_back(Ok(()));
    }

    /// Fail every unscripted attempt (server unreachable). `None` restores success.
    pub fn set_unreachable(&self, err: Option<ConnectionError>) {
        lock(&self.shared).default_failure = err;
    }

    pub fn attempts(&self) -> u32 {
        lock(&self.shared).attempts
    }

    pub fn last_url(&self) -> Option<Url> {
        lock(&self.shared).urls.last().cloned()
    }
}

impl Connector for FakeConnector {
    type Link = FakeLink;

    async fn connect(&self, url: &Url) -> std::result::Result<FakeLink, ConnectionError> {
        let outcome = {
            let mut shared = lock(&self.shared);
            shared.attempts += 1;
            shared.urls.push(url.clone());
            match shared.script.pop_front() {
                Some(outcome) => outcome,
                None => match &shared.default_failure {
                    Some(err) => Err(err.clone()),
                    None => Ok(()),
                },
            }
        };
        outcome?;

        let (to_server, received) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let server = FakeServer {
            received,
            to_client,
            url: url.clone(),
        };
        self.servers
            .send(server)
            .map_err(|_| ConnectionError::handshake("no fake server listening"))?;

        Ok(FakeLink {
            to_server,
            from_server,
        })
    }
}

/// Client end of an in-memory link.
pub struct FakeLink {
    to_server: mpsc::UnboundedSender<String>,
    from_server: mpsc::UnboundedReceiver<TransportFrame>,
}

impl Transport for FakeLink {
    async fn send_text(&mut self, text: String) -> std::result::Result<(), ConnectionError> {
        self.to_server
            .send(text)
            .map_err(|_| ConnectionError::Closed)
    }

    async fn recv(&mut self) -> Option<std::result::Result<TransportFrame, ConnectionError>> {
        self.from_server.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.from_server.close();
    }
}

/// Server end of an in-memory link. Dropping it ends the link.
pub struct FakeServer {
    received: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<TransportFrame>,
    url: Url,
}

impl FakeServer {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Next raw frame written by the client.
    pub async fn recv(&mut self) -> Option<String> {
        self.received.recv().await
    }

    /// Next frame written by the client, skipping heartbeats.
    pub async fn recv_event(&mut self) -> Option<Envelope> {
        loop {
            let text = self.received.recv().await?;
            match serde_json::from_str::<Envelope>(&text) {
                Ok(env) if env.event == "ping" => continue,
                Ok(env) => return Some(env),
                Err(_) => continue,
            }
        }
    }

    /// Frames already written by the client, without waiting.
    pub fn drain(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(text) = self.received.try_recv() {
            frames.push(text);
        }
        frames
    }

    pub fn push(&self, text: impl Into<String>) {
        let _ = self.to_client.send(TransportFrame::Text(text.into()));
    }

    pub fn push_event(&self, event: &str, payload: Value) {
        let envelope = Envelope {
            event: event.to_string(),
            payload,
        };
        if let Ok(text) = serde_json::to_string(&envelope) {
            self.push(text);
        }
    }

    /// Send a control frame (liveness only).
    pub fn push_control(&self) {
        let _ = self.to_client.send(TransportFrame::Control);
    }

    pub fn close(&self, code: Option<u16>) {
        let _ = self.to_client.send(TransportFrame::Close(code));
    }
}

// ---------------------------------------------------------------------------
// FakeApi
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ApiShared {
    conversations: Vec<Conversation>,
    messages: HashMap<String, Vec<Message>>,
    /// Operation name → HTTP status for its next call.
    failures: HashMap<&'static str, u16>,
    calls: Vec<String>,
}

/// In-memory [`ChatApi`].
///
/// Operation names for [`FakeApi::fail_next`]: `fetch_conversations`,
/// `fetch_messages`, `create_conversation`, `set_pinned`, `clear_messages`,
/// `delete_conversation`.
#[derive(Clone, Default)]
pub struct FakeApi {
    shared: Arc<Mutex<ApiShared>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversations(self, conversations: Vec<Conversation>) -> Self {
        lock(&self.shared).conversations = conversations;
        self
    }

    pub fn set_messages(&self, conversation_id: &str, messages: Vec<Message>) {
        lock(&self.shared)
            .messages
            .insert(conversation_id.to_string(), messages);
    }

    /// Fail the next call to `op`. Status 401/403 yields `Error::Unauthorized`.
    pub fn fail_next(&self, op: &'static str, status: u16) {
        lock(&self.shared).failures.insert(op, status);
    }

    /// Log of calls as `"<op> <args>"`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.shared).calls.clone()
    }

    fn record(&self, op: &'static str, args: &str) -> Result<()> {
        let mut shared = lock(&self.shared);
        shared.calls.push(format!("{op} {args}").trim_end().to_string());
        match shared.failures.remove(op) {
            Some(401) | Some(403) => Err(Error::Unauthorized),
            Some(status) => Err(Error::api(status, format!("{op} failed"))),
            None => Ok(()),
        }
    }
}

impl ChatApi for FakeApi {
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>> {
        self.record("fetch_conversations", "")?;
        Ok(lock(&self.shared).conversations.clone())
    }

    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.record("fetch_messages", conversation_id)?;
        Ok(lock(&self.shared)
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_conversation(&self, request: &NewConversation) -> Result<Conversation> {
        self.record("create_conversation", &request.member_ids.join(","))?;
        let mut shared = lock(&self.shared);
        let id = format!("conv-{}", shared.conversations.len() + 1);
        let mut conversation =
            Conversation::new(id, request.kind).with_members(request.member_ids.clone());
        conversation.name = request.name.clone();
        shared.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn set_pinned(&self, conversation_id: &str, pinned: bool) -> Result<()> {
        self.record("set_pinned", &format!("{conversation_id} {pinned}"))
    }

    async fn clear_messages(&self, conversation_id: &str) -> Result<()> {
        self.record("clear_messages", conversation_id)
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        self.record("delete_conversation", conversation_id)
    }
}
