//! Connection Manager for the chat WebSocket.
//!
//! The [`ConnectionManager`] owns one link per session. A background task
//! holds the transport, flushes the outbound queue, emits heartbeats, and
//! reconnects with backoff when the link drops without being asked to.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    ConnectionManager                          │
//! │                                                               │
//! │  send() ──push──▶ outbox (shared VecDeque) ◀──drain── task    │
//! │         ──Flush──▶ cmd chan ─────────────────────────▶ task   │
//! │                                                               │
//! │  subscribe() ◀──── watch<ConnectionState> ◀────────── task    │
//! │  take_inbound() ◀── mpsc<String> (text frames) ◀───── task    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## States
//!
//! `Idle → Connecting → Open → Closing → Idle`. An unexpected close moves
//! `Open → Reconnecting { attempt }`; exhausting the retry ceiling or an
//! auth rejection ends in `Failed { reason }`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use url::Url;

use alo_core::logging::redact_token;
use alo_core::protocol::{Envelope, OutboundEvent, CLOSE_CODE_UNAUTHORIZED};
use alo_core::{ConnectionError, Credential};

use crate::backoff::ReconnectPolicy;
use crate::transport::{Connector, Transport, TransportFrame};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Observable state of the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// No link and no attempt in progress.
    Idle,
    /// First attempt of a link in progress.
    Connecting,
    /// Link is up; frames flow both ways.
    Open,
    /// Caller asked to disconnect; waiting for the link to wind down.
    Closing,
    /// Link dropped; the background task is retrying.
    Reconnecting {
        /// The current reconnection attempt number (1-indexed).
        attempt: u32,
    },
    /// Gave up. A new `connect()` or `send()` starts over.
    Failed { reason: ConnectionError },
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ConnectionState::Failed { .. })
    }

    /// Terminal for a waiting `connect()` caller.
    fn is_settled(&self) -> bool {
        matches!(
            self,
            ConnectionState::Open | ConnectionState::Failed { .. } | ConnectionState::Idle
        )
    }
}

/// Timing and endpoint settings for a [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// WebSocket endpoint without the token, e.g. `ws://localhost:8000/ws`.
    pub ws_url: String,
    /// Keepalive interval while open.
    pub heartbeat: Duration,
    /// Treat the link as lost after this long without inbound traffic.
    pub idle_timeout: Option<Duration>,
    /// Upper bound on a graceful close during `disconnect()`.
    pub close_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8000/ws".to_string(),
            heartbeat: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(30)),
            close_timeout: Duration::from_secs(2),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Build `ws_url?token=<token>`.
pub fn connection_url(ws_url: &str, token: &str) -> Result<Url, ConnectionError> {
    let mut url = Url::parse(ws_url)
        .map_err(|e| ConnectionError::handshake(format!("invalid WebSocket URL: {e}")))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

// ---------------------------------------------------------------------------
// Internal types
// ---------------------------------------------------------------------------

/// Messages from the manager to the link task.
#[derive(Debug)]
enum LinkCommand {
    /// New frames are in the outbox.
    Flush,
    /// Close the link and stop.
    Close,
}

enum LinkExit {
    /// Close command or manager dropped.
    Requested,
    /// Link ended without being asked to.
    Lost(ConnectionError),
}

type Outbox = Arc<Mutex<VecDeque<String>>>;

fn lock(outbox: &Outbox) -> MutexGuard<'_, VecDeque<String>> {
    outbox.lock().unwrap_or_else(|e| e.into_inner())
}

struct ActiveLink {
    token: String,
    cmd_tx: mpsc::UnboundedSender<LinkCommand>,
    task: JoinHandle<()>,
}

impl ActiveLink {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Everything the link task needs, moved into it on spawn.
struct LinkContext<C> {
    connector: Arc<C>,
    url: Url,
    settings: ConnectionSettings,
    outbox: Outbox,
    state: Arc<watch::Sender<ConnectionState>>,
    inbound: mpsc::UnboundedSender<String>,
}

impl<C> LinkContext<C> {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

/// Owns the session's link, its outbound queue, and the reconnect loop.
///
/// Dropping the manager aborts the link task.
pub struct ConnectionManager<C> {
    connector: Arc<C>,
    settings: ConnectionSettings,
    state: Arc<watch::Sender<ConnectionState>>,
    outbox: Outbox,
    inbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Option<mpsc::UnboundedReceiver<String>>,
    credential: Option<Credential>,
    link: Option<ActiveLink>,
}

impl<C> std::fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &*self.state.borrow())
            .field("queued", &lock(&self.outbox).len())
            .finish_non_exhaustive()
    }
}

impl<C> ConnectionManager<C>
where
    C: Connector + Sync + 'static,
{
    pub fn new(connector: C, settings: ConnectionSettings) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            connector: Arc::new(connector),
            settings,
            state: Arc::new(state),
            outbox: Arc::new(Mutex::new(VecDeque::new())),
            inbound_tx,
            inbound_rx: Some(inbound_rx),
            credential: None,
            link: None,
        }
    }

    /// Open the link for `credential` and wait until it is open.
    ///
    /// Joins the in-flight attempt when called again with the same token.
    /// A different token closes the previous link (and drops its queue)
    /// first.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::Unauthorized`] if the server rejects the token.
    /// - [`ConnectionError::Handshake`] if the transport cannot be opened.
    pub async fn connect(&mut self, credential: &Credential) -> Result<(), ConnectionError> {
        if let Some(link) = &self.link {
            if link.token == credential.token && self.link_alive() {
                debug!("connect() with the current token, joining the existing link");
                return self.wait_until_settled().await;
            }
        }

        let token_changed = self
            .credential
            .as_ref()
            .is_some_and(|current| current.token != credential.token);
        if token_changed {
            info!("Session token changed, closing the previous connection");
            self.disconnect().await;
        }

        self.credential = Some(credential.clone());
        self.spawn_link(false)?;
        self.wait_until_settled().await
    }

    /// Close the link, drop the queue, and forget the credential.
    ///
    /// Always ends in [`ConnectionState::Idle`].
    pub async fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            self.state.send_replace(ConnectionState::Closing);
            let _ = link.cmd_tx.send(LinkCommand::Close);
            let mut task = link.task;
            if tokio::time::timeout(self.settings.close_timeout, &mut task)
                .await
                .is_err()
            {
                warn!(
                    "Link task did not stop within {:?}, aborting it",
                    self.settings.close_timeout
                );
                task.abort();
            }
        }

        let dropped = {
            let mut queue = lock(&self.outbox);
            let n = queue.len();
            queue.clear();
            n
        };
        if dropped > 0 {
            debug!("Dropped {} queued frame(s) on disconnect", dropped);
        }

        self.credential = None;
        self.state.send_replace(ConnectionState::Idle);
        info!("Disconnected");
    }

    /// Queue `{event, payload}` for transmission.
    ///
    /// Never blocks and never fails. While the link is down the frame waits
    /// in order; if no attempt is in flight one is started.
    pub fn send(&mut self, event: &str, payload: Value) {
        let envelope = Envelope {
            event: event.to_string(),
            payload,
        };
        match serde_json::to_string(&envelope) {
            Ok(text) => self.send_text(text),
            Err(e) => warn!("Dropping unserializable {} frame: {}", event, e),
        }
    }

    pub fn send_event(&mut self, event: &OutboundEvent) {
        self.send(event.name(), event.payload());
    }

    /// Queue an already-serialized frame.
    pub fn send_text(&mut self, text: String) {
        lock(&self.outbox).push_back(text);

        if self.link_alive() {
            if let Some(link) = &self.link {
                if link.cmd_tx.send(LinkCommand::Flush).is_ok() {
                    return;
                }
            }
        }

        if self.credential.is_none() {
            debug!(
                "Queued frame with no session ({} pending)",
                lock(&self.outbox).len()
            );
            return;
        }

        info!("No link running, reconnecting to deliver queued frames");
        if let Err(e) = self.spawn_link(true) {
            warn!("Could not start reconnect: {}", e);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Take the receiver of inbound text frames. Returns `None` after the
    /// first call.
    pub fn take_inbound(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.inbound_rx.take()
    }

    /// Number of frames waiting to be written.
    pub fn queued(&self) -> usize {
        lock(&self.outbox).len()
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// A link task exists and has not given up.
    fn link_alive(&self) -> bool {
        self.link.as_ref().is_some_and(ActiveLink::is_running) && !self.state.borrow().is_failed()
    }

    fn spawn_link(&mut self, retry_first: bool) -> Result<(), ConnectionError> {
        let Some(credential) = &self.credential else {
            return Err(ConnectionError::Closed);
        };
        let url = connection_url(&self.settings.ws_url, &credential.token)?;
        let token = credential.token.clone();

        if let Some(old) = self.link.take() {
            old.task.abort();
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        self.state.send_replace(ConnectionState::Connecting);

        let ctx = LinkContext {
            connector: Arc::clone(&self.connector),
            url,
            settings: self.settings.clone(),
            outbox: Arc::clone(&self.outbox),
            state: Arc::clone(&self.state),
            inbound: self.inbound_tx.clone(),
        };
        let task = tokio::spawn(run_link_task(ctx, cmd_rx, retry_first));

        self.link = Some(ActiveLink {
            token,
            cmd_tx,
            task,
        });
        Ok(())
    }

    async fn wait_until_settled(&self) -> Result<(), ConnectionError> {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(ConnectionState::is_settled).await {
            Ok(state) => state.clone(),
            Err(_) => return Err(ConnectionError::Closed),
        };
        match state {
            ConnectionState::Open => Ok(()),
            ConnectionState::Failed { reason } => Err(reason),
            _ => Err(ConnectionError::Superseded),
        }
    }
}

impl<C> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Link task
// ---------------------------------------------------------------------------

/// Background task owning the transport.
///
/// `retry_first` decides whether a failed first attempt enters the
/// reconnect loop (queue-triggered) or fails straight away (`connect()`).
async fn run_link_task<C>(
    ctx: LinkContext<C>,
    mut cmd_rx: mpsc::UnboundedReceiver<LinkCommand>,
    retry_first: bool,
) where
    C: Connector + Sync,
{
    let policy = ctx.settings.reconnect.clone();
    let display_url = redact_token(ctx.url.as_str());
    let mut attempt: u32 = 0;
    let mut can_retry = retry_first;
    let mut last_error = ConnectionError::Closed;

    loop {
        if attempt > 0 {
            if policy.exhausted(attempt) {
                error!(
                    "Exceeded {} reconnection attempts, giving up",
                    policy.max_attempts
                );
                ctx.set_state(ConnectionState::Failed { reason: last_error });
                return;
            }
            ctx.set_state(ConnectionState::Reconnecting { attempt });
            let delay = policy.delay(attempt);
            warn!(
                "Connection lost, retrying in {:?} (attempt {})",
                delay, attempt
            );
            if !sleep_unless_closed(delay, &mut cmd_rx).await {
                debug!("Close requested during backoff");
                return;
            }
        } else {
            ctx.set_state(ConnectionState::Connecting);
        }

        debug!("Connecting to {}", display_url);
        let outcome = tokio::select! {
            result = ctx.connector.connect(&ctx.url) => result,
            _ = wait_for_close(&mut cmd_rx) => {
                debug!("Close requested during connect");
                return;
            }
        };

        match outcome {
            Ok(link) => {
                info!("Connected to {}", display_url);
                ctx.set_state(ConnectionState::Open);
                attempt = 0;
                can_retry = true;

                match run_io_loop(link, &ctx, &mut cmd_rx).await {
                    LinkExit::Requested => {
                        debug!("Link task exiting");
                        return;
                    }
                    LinkExit::Lost(reason) if reason.is_auth() => {
                        warn!("Server closed the link: session token rejected");
                        ctx.set_state(ConnectionState::Failed { reason });
                        return;
                    }
                    LinkExit::Lost(reason) => {
                        last_error = reason;
                        attempt = 1;
                    }
                }
            }
            Err(reason) if reason.is_auth() => {
                warn!("Server rejected the session token");
                ctx.set_state(ConnectionState::Failed { reason });
                return;
            }
            Err(reason) => {
                warn!("Connection attempt {} failed: {}", attempt, reason);
                if !can_retry {
                    ctx.set_state(ConnectionState::Failed { reason });
                    return;
                }
                last_error = reason;
                attempt += 1;
            }
        }
    }
}

/// Run one link's read/write select loop.
async fn run_io_loop<C, T>(
    mut link: T,
    ctx: &LinkContext<C>,
    cmd_rx: &mut mpsc::UnboundedReceiver<LinkCommand>,
) -> LinkExit
where
    T: Transport,
{
    // Frames queued while the link was down go out before anything else.
    if let Err(reason) = flush_outbox(&mut link, &ctx.outbox).await {
        return LinkExit::Lost(reason);
    }

    let ping = OutboundEvent::Ping.to_text().ok();
    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + ctx.settings.heartbeat,
        ctx.settings.heartbeat.max(Duration::from_millis(1)),
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let idle_timeout = ctx.settings.idle_timeout;
    let idle = tokio::time::sleep(idle_timeout.unwrap_or(Duration::from_secs(86_400)));
    tokio::pin!(idle);

    loop {
        tokio::select! {
            // ── Incoming frame ──────────────────────────────────────────
            frame = link.recv() => {
                if let Some(timeout) = idle_timeout {
                    idle.as_mut().reset(Instant::now() + timeout);
                }
                match frame {
                    Some(Ok(TransportFrame::Text(text))) => {
                        if ctx.inbound.send(text).is_err() {
                            debug!("Inbound receiver dropped, discarding frame");
                        }
                    }
                    Some(Ok(TransportFrame::Control)) => {}
                    Some(Ok(TransportFrame::Close(code))) => {
                        debug!("Received Close frame (code {:?})", code);
                        if code == Some(CLOSE_CODE_UNAUTHORIZED) {
                            return LinkExit::Lost(ConnectionError::Unauthorized);
                        }
                        return LinkExit::Lost(ConnectionError::Closed);
                    }
                    Some(Err(reason)) => {
                        warn!("Link read error: {}", reason);
                        return LinkExit::Lost(reason);
                    }
                    None => {
                        debug!("Link stream ended");
                        return LinkExit::Lost(ConnectionError::Closed);
                    }
                }
            }

            // ── Commands from the manager ───────────────────────────────
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(LinkCommand::Flush) => {
                        if let Err(reason) = flush_outbox(&mut link, &ctx.outbox).await {
                            warn!("Write failed, frame kept for the next link");
                            return LinkExit::Lost(reason);
                        }
                    }
                    Some(LinkCommand::Close) | None => {
                        link.close().await;
                        return LinkExit::Requested;
                    }
                }
            }

            // ── Keepalive ───────────────────────────────────────────────
            _ = heartbeat.tick() => {
                if let Some(ping) = &ping {
                    if let Err(reason) = link.send_text(ping.clone()).await {
                        warn!("Heartbeat write failed");
                        return LinkExit::Lost(reason);
                    }
                }
            }

            // ── Receive liveness ────────────────────────────────────────
            _ = &mut idle, if idle_timeout.is_some() => {
                warn!("No inbound traffic for {:?}, treating link as lost", idle_timeout);
                link.close().await;
                return LinkExit::Lost(ConnectionError::Closed);
            }
        }
    }
}

/// Write every queued frame in order. A frame is popped only after its
/// write succeeds.
async fn flush_outbox<T: Transport>(link: &mut T, outbox: &Outbox) -> Result<(), ConnectionError> {
    loop {
        let next = lock(outbox).front().cloned();
        let Some(frame) = next else {
            return Ok(());
        };
        link.send_text(frame.clone()).await?;
        let mut queue = lock(outbox);
        if queue.front() == Some(&frame) {
            queue.pop_front();
        }
    }
}

/// Resolve once a Close command arrives or the manager goes away.
async fn wait_for_close(cmd_rx: &mut mpsc::UnboundedReceiver<LinkCommand>) {
    loop {
        match cmd_rx.recv().await {
            Some(LinkCommand::Flush) => continue,
            Some(LinkCommand::Close) | None => return,
        }
    }
}

/// Sleep for `delay`. Returns `false` if a close was requested meanwhile.
async fn sleep_unless_closed(
    delay: Duration,
    cmd_rx: &mut mpsc::UnboundedReceiver<LinkCommand>,
) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = wait_for_close(cmd_rx) => false,
    }
}
