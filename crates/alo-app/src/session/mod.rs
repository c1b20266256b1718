//! Session - one signed-in identity and everything it owns
//!
//! A [`Session`] ties the connection manager, the REST collaborator, and the
//! state slices together. All mutation happens on the task driving the
//! session: the caller awaits [`Session::next_update`] in its event loop and
//! invokes user actions between updates.
//!
//! ```text
//!            ┌────────────── Session ──────────────┐
//!  UI ──────►│ send_message / open_conversation ...│──► ChatApi (REST)
//!            │                                     │
//!  inbound ─►│ Dispatcher ─► ChatStore, FriendStore│──► NotificationSink
//!  frames    │     │         TypingTracker         │
//!            │     └──────► Reconciler             │──► ConnectionManager
//!            └─────────────────────────────────────┘
//! ```

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use alo_core::prelude::*;
use alo_core::{Conversation, Credential, FileRef, Message, MessageKind, OutboundEvent};
use alo_net::{
    ChatApi, ConnectionManager, ConnectionSettings, ConnectionState, Connector, NewConversation,
};

use crate::config::{Settings, SyncSettings};
use crate::dispatcher::{DispatchAction, DispatchTargets, Dispatched, Dispatcher, SyncEvent};
use crate::friends::FriendStore;
use crate::notifications::NotificationSink;
use crate::reconciler::Reconciler;
use crate::store::ChatStore;
use crate::typing::{Typist, TypingTracker};

#[cfg(test)]
mod tests;

/// What [`Session::next_update`] applied.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// An inbound frame was dispatched
    Sync(SyncEvent),

    /// These provisional sends passed their deadline and are now `failed`
    SendsFailed(Vec<String>),

    /// Typing indicators expired in these conversations
    TypingExpired(Vec<String>),

    /// The connection moved to a new state
    Connection(ConnectionState),
}

pub struct Session<C, A, S> {
    credential: Credential,
    connection: ConnectionManager<C>,
    api: A,
    sink: S,

    store: ChatStore,
    friends: FriendStore,
    typing: TypingTracker,
    reconciler: Reconciler,
    dispatcher: Dispatcher,

    inbound: Option<mpsc::UnboundedReceiver<String>>,
    state_rx: watch::Receiver<ConnectionState>,
    refresh_pending: bool,
}

impl<C, A, S> Session<C, A, S>
where
    C: Connector + Sync + 'static,
    A: ChatApi,
    S: NotificationSink,
{
    pub fn new(
        settings: &Settings,
        credential: Credential,
        connector: C,
        api: A,
        sink: S,
    ) -> Self {
        Self::with_connection_settings(
            settings.connection_settings(),
            settings.sync.clone(),
            credential,
            connector,
            api,
            sink,
        )
    }

    pub fn with_connection_settings(
        connection: ConnectionSettings,
        sync: SyncSettings,
        credential: Credential,
        connector: C,
        api: A,
        sink: S,
    ) -> Self {
        let mut connection = ConnectionManager::new(connector, connection);
        let inbound = connection.take_inbound();
        let state_rx = connection.subscribe();
        let user_id = credential.user_id.clone();

        Self {
            credential,
            connection,
            api,
            sink,
            store: ChatStore::new(),
            friends: FriendStore::new(),
            typing: TypingTracker::new(sync.typing_ttl()),
            reconciler: Reconciler::new(user_id.clone(), sync.send_timeout()),
            dispatcher: Dispatcher::new(user_id, sync.dedup_capacity),
            inbound,
            state_rx,
            refresh_pending: false,
        }
    }

    // ─────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────

    /// Connect and load the conversation list.
    ///
    /// # Errors
    ///
    /// Auth failures from either the socket or REST come back as errors
    /// for which [`Error::is_auth`] is true; the caller should log out.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting session for user {}", self.credential.user_id);
        self.connection
            .connect(&self.credential)
            .await
            .context("Connecting to the chat server failed")?;
        // Transitions up to now were awaited by `connect` itself.
        let _ = self.state_rx.borrow_and_update();

        let conversations = self
            .api
            .fetch_conversations()
            .await
            .context("Initial sync failed")?;
        info!("Initial sync loaded {} conversation(s)", conversations.len());
        self.store.set_conversations(conversations);
        Ok(())
    }

    /// Disconnect and drop every piece of session state.
    pub async fn logout(&mut self) {
        info!("Logging out user {}", self.credential.user_id);
        self.connection.disconnect().await;
        self.store.reset();
        self.friends.reset();
        self.typing.reset();
        self.reconciler.clear();
        self.dispatcher.reset();
        self.inbound = None;
        self.refresh_pending = false;
    }

    /// Wait for the next inbound frame, send deadline, typing expiry, or
    /// connection change, and apply it.
    ///
    /// Returns `None` once the session has been logged out.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            let deadline = earliest(self.reconciler.next_deadline(), self.typing.next_expiry());
            let inbound = self.inbound.as_mut()?;

            tokio::select! {
                biased;

                frame = inbound.recv() => {
                    let raw = frame?;
                    let dispatched = self.handle_frame(&raw);
                    if self.refresh_pending {
                        self.refresh_pending = false;
                        if let Err(e) = self.refresh_conversations().await {
                            warn!("Conversation refresh failed: {}", e);
                            // Try again after the next frame.
                            self.refresh_pending = e.is_recoverable();
                        }
                    }
                    return Some(SessionUpdate::Sync(dispatched.event));
                }

                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                    let state = self.state_rx.borrow_and_update().clone();
                    debug!("Connection state: {:?}", state);
                    return Some(SessionUpdate::Connection(state));
                }

                _ = sleep_until(deadline) => {
                    let now = Instant::now();
                    let failed = self.reconciler.expire_due(&mut self.store, now);
                    let expired = self.typing.prune(now);
                    if !failed.is_empty() {
                        return Some(SessionUpdate::SendsFailed(failed));
                    }
                    if !expired.is_empty() {
                        return Some(SessionUpdate::TypingExpired(expired));
                    }
                }
            }
        }
    }

    /// Apply one raw inbound frame synchronously.
    ///
    /// A message for an unknown conversation schedules a conversation list
    /// refresh that [`Session::next_update`] performs.
    pub fn handle_frame(&mut self, raw: &str) -> Dispatched {
        let mut targets = DispatchTargets {
            store: &mut self.store,
            friends: &mut self.friends,
            typing: &mut self.typing,
            reconciler: &mut self.reconciler,
            sink: &mut self.sink,
        };
        let dispatched = self.dispatcher.dispatch(raw, &mut targets, Instant::now());
        if let Some(DispatchAction::RefreshConversations { conversation_id }) = &dispatched.action {
            debug!("Scheduling conversation refresh for {}", conversation_id);
            self.refresh_pending = true;
        }
        dispatched
    }

    /// Fetch the conversation list and merge it in: unknown conversations are
    /// added, known ones take the server's metadata and keep local counters.
    pub async fn refresh_conversations(&mut self) -> Result<()> {
        let fetched = self.api.fetch_conversations().await?;
        for conversation in fetched.into_iter().rev() {
            let updated = self.store.update_conversation(&conversation.id, |local| {
                local.kind = conversation.kind;
                local.name = conversation.name.clone();
                local.members = conversation.members.clone();
                local.created_at = conversation.created_at;
                if local.last_message.is_none() {
                    local.last_message = conversation.last_message.clone();
                }
            });
            if !updated {
                self.store.add_conversation(conversation);
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────
    // Conversations
    // ─────────────────────────────────────────────────────────

    /// Make `conversation_id` active and load its history.
    ///
    /// The unread counter resets immediately and the server is told the
    /// conversation was read when there was anything unread.
    pub async fn open_conversation(&mut self, conversation_id: &str) -> Result<()> {
        let unread = self.store.set_active(Some(conversation_id));
        if unread > 0 {
            self.connection.send_event(&OutboundEvent::MarkAllRead {
                conversation_id: conversation_id.to_string(),
            });
        }

        let messages = self.api.fetch_messages(conversation_id).await?;
        debug!(
            "Loaded {} message(s) for {}",
            messages.len(),
            conversation_id
        );
        self.store.set_messages(conversation_id, messages);
        Ok(())
    }

    pub fn close_conversation(&mut self) {
        self.store.set_active(None);
    }

    /// Create a conversation through REST and insert it at the head.
    pub async fn create_conversation(&mut self, request: &NewConversation) -> Result<Conversation> {
        let conversation = self.api.create_conversation(request).await?;
        info!("Created conversation {}", conversation.id);
        self.store.add_conversation(conversation.clone());
        Ok(conversation)
    }

    /// Flip the pin flag locally, confirm with the server, roll back on failure.
    pub async fn toggle_pin(&mut self, conversation_id: &str) -> Result<bool> {
        let snapshot = self
            .store
            .snapshot(conversation_id)
            .ok_or_else(|| Error::conversation_not_found(conversation_id))?;
        let pinned = self
            .store
            .toggle_pin(conversation_id)
            .ok_or_else(|| Error::conversation_not_found(conversation_id))?;

        if let Err(e) = self.api.set_pinned(conversation_id, pinned).await {
            warn!("Pin change for {} rejected: {}", conversation_id, e);
            self.store.restore(snapshot);
            return Err(e);
        }
        Ok(pinned)
    }

    /// Empty a conversation locally, confirm with the server, roll back on failure.
    pub async fn clear_conversation(&mut self, conversation_id: &str) -> Result<()> {
        let snapshot = self
            .store
            .snapshot(conversation_id)
            .ok_or_else(|| Error::conversation_not_found(conversation_id))?;
        self.store.clear_messages(conversation_id);

        if let Err(e) = self.api.clear_messages(conversation_id).await {
            warn!("Clearing {} failed: {}", conversation_id, e);
            self.store.restore(snapshot);
            return Err(e);
        }
        self.reconciler.forget_conversation(conversation_id);
        Ok(())
    }

    /// Remove a conversation locally, confirm with the server, roll back on failure.
    pub async fn delete_conversation(&mut self, conversation_id: &str) -> Result<()> {
        let snapshot = self
            .store
            .snapshot(conversation_id)
            .ok_or_else(|| Error::conversation_not_found(conversation_id))?;
        self.store.remove_conversation(conversation_id);

        if let Err(e) = self.api.delete_conversation(conversation_id).await {
            warn!("Deleting {} failed: {}", conversation_id, e);
            self.store.restore(snapshot);
            return Err(e);
        }
        self.reconciler.forget_conversation(conversation_id);
        info!("Deleted conversation {}", conversation_id);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────

    /// Show the message immediately as `sending` and queue it for the server.
    pub fn send_message(
        &mut self,
        conversation_id: &str,
        content: impl Into<String>,
        kind: MessageKind,
        file: Option<FileRef>,
    ) -> Message {
        let (message, frame) = self.reconciler.send_optimistic(
            &mut self.store,
            conversation_id,
            content,
            kind,
            file,
            Instant::now(),
        );
        self.connection.send_event(&frame);
        message
    }

    /// Resend a `failed` message. Returns `false` if it is not failed.
    pub fn retry_message(&mut self, client_id: &str) -> bool {
        match self
            .reconciler
            .retry(&mut self.store, client_id, Instant::now())
        {
            Some(frame) => {
                self.connection.send_event(&frame);
                true
            }
            None => false,
        }
    }

    pub fn send_typing(&mut self, conversation_id: &str) {
        self.connection.send_event(&OutboundEvent::Typing {
            conversation_id: conversation_id.to_string(),
        });
    }

    pub fn mark_read(&mut self, conversation_id: &str, message_id: &str) {
        self.connection.send_event(&OutboundEvent::MarkRead {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
        });
    }

    // ─────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────

    pub fn set_focused(&mut self, focused: bool) {
        self.dispatcher.set_focused(focused);
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn user_id(&self) -> &str {
        &self.credential.user_id
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub fn friends(&self) -> &FriendStore {
        &self.friends
    }

    /// Friends and requests are loaded by the caller's REST layer.
    pub fn friends_mut(&mut self) -> &mut FriendStore {
        &mut self.friends
    }

    pub fn typist(&self, conversation_id: &str) -> Option<&Typist> {
        self.typing.typist(conversation_id, Instant::now())
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Observe connection state changes independently of `next_update`.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub fn is_pending(&self, client_id: &str) -> bool {
        self.reconciler.is_pending(client_id)
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
