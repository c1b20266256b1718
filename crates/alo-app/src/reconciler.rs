//! Optimistic-send reconciler.
//!
//! Every local send is materialized as a `sending` [`Message`] whose id is a
//! provisional `local-<uuid>`. The reconciler remembers the outbound frame
//! and a deadline for each one until the server's echo resolves it:
//!
//! ```text
//!   send_optimistic ──► Sending ──echo──► Sent (server id, same position)
//!                          │  ▲
//!                 deadline │  │ retry
//!                          ▼  │
//!                         Failed ──late echo──► Sent
//! ```

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use uuid::Uuid;

use alo_core::prelude::*;
use alo_core::{FileRef, Message, MessageKind, MessageStatus, OutboundEvent, PROVISIONAL_PREFIX};

use crate::store::ChatStore;

#[derive(Debug, Clone)]
struct PendingSend {
    conversation_id: String,
    /// `None` once the send has failed and waits for a retry.
    deadline: Option<Instant>,
    frame: OutboundEvent,
}

#[derive(Debug)]
pub struct Reconciler {
    user_id: String,
    send_timeout: Duration,
    pending: HashMap<String, PendingSend>,
}

/// A fresh provisional id.
pub fn provisional_id() -> String {
    format!("{}{}", PROVISIONAL_PREFIX, Uuid::new_v4())
}

impl Reconciler {
    pub fn new(user_id: impl Into<String>, send_timeout: Duration) -> Self {
        Self {
            user_id: user_id.into(),
            send_timeout,
            pending: HashMap::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Insert a `sending` message and return it with the frame to transmit.
    ///
    /// Never fails: the network is not touched here.
    pub fn send_optimistic(
        &mut self,
        store: &mut ChatStore,
        conversation_id: &str,
        content: impl Into<String>,
        kind: MessageKind,
        file: Option<FileRef>,
        now: Instant,
    ) -> (Message, OutboundEvent) {
        let client_id = provisional_id();
        let content = content.into();
        let message = Message {
            id: client_id.clone(),
            client_id: Some(client_id.clone()),
            conversation_id: conversation_id.to_string(),
            sender_id: self.user_id.clone(),
            content: content.clone(),
            kind,
            file: file.clone(),
            status: MessageStatus::Sending,
            created_at: Utc::now(),
        };
        let frame = OutboundEvent::SendMessage {
            conversation_id: conversation_id.to_string(),
            content,
            kind,
            client_id: client_id.clone(),
            file,
        };

        store.insert_message(message.clone(), false);
        self.pending.insert(
            client_id.clone(),
            PendingSend {
                conversation_id: conversation_id.to_string(),
                deadline: Some(now + self.send_timeout),
                frame: frame.clone(),
            },
        );
        debug!("Optimistic send {} in {}", client_id, conversation_id);

        (message, frame)
    }

    /// Collapse the provisional message into the server's record.
    ///
    /// Works for `sending` and `failed` entries alike. Returns `false` when
    /// no provisional message with `client_id` exists in the conversation.
    pub fn resolve(
        &mut self,
        store: &mut ChatStore,
        conversation_id: &str,
        client_id: &str,
        server: Message,
    ) -> bool {
        let status = if server.status.rank() > MessageStatus::Sent.rank() {
            server.status
        } else {
            MessageStatus::Sent
        };
        let resolved = Message {
            client_id: Some(client_id.to_string()),
            status,
            ..server
        };
        let server_id = resolved.id.clone();

        let replaced = store.replace_provisional(conversation_id, client_id, resolved);
        if replaced {
            self.pending.remove(client_id);
            debug!("Resolved {} -> {}", client_id, server_id);
        }
        replaced
    }

    /// Resolve using only the server id; the provisional record supplies
    /// everything else.
    pub fn resolve_id(
        &mut self,
        store: &mut ChatStore,
        conversation_id: &str,
        client_id: &str,
        server_id: &str,
    ) -> bool {
        let Some(provisional) = store.find_by_client_id(conversation_id, client_id).cloned() else {
            return false;
        };
        let server = Message {
            id: server_id.to_string(),
            status: MessageStatus::Sent,
            ..provisional
        };
        self.resolve(store, conversation_id, client_id, server)
    }

    /// Mark every send whose deadline has passed as `failed`.
    /// Returns the client ids that failed.
    pub fn expire_due(&mut self, store: &mut ChatStore, now: Instant) -> Vec<String> {
        let mut failed = Vec::new();
        let mut gone = Vec::new();

        for (client_id, pending) in self.pending.iter_mut() {
            let Some(deadline) = pending.deadline else {
                continue;
            };
            if deadline > now {
                continue;
            }
            pending.deadline = None;
            if store.update_status(&pending.conversation_id, client_id, MessageStatus::Failed) {
                warn!("Send {} timed out", client_id);
                failed.push(client_id.clone());
            } else {
                gone.push(client_id.clone());
            }
        }
        for client_id in gone {
            self.pending.remove(&client_id);
        }
        failed.sort();
        failed
    }

    /// The nearest deadline among in-flight sends.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().filter_map(|p| p.deadline).min()
    }

    /// Put a failed send back to `sending` with a fresh deadline and return
    /// the frame to retransmit (same client id).
    pub fn retry(
        &mut self,
        store: &mut ChatStore,
        client_id: &str,
        now: Instant,
    ) -> Option<OutboundEvent> {
        let pending = self.pending.get_mut(client_id)?;
        if pending.deadline.is_some() {
            return None;
        }
        let conversation_id = pending.conversation_id.clone();
        if !store.update_status(&conversation_id, client_id, MessageStatus::Sending) {
            self.pending.remove(client_id);
            return None;
        }
        pending.deadline = Some(now + self.send_timeout);
        debug!("Retrying send {}", client_id);
        Some(pending.frame.clone())
    }

    pub fn is_pending(&self, client_id: &str) -> bool {
        self.pending.contains_key(client_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Forget sends belonging to a conversation that went away.
    pub fn forget_conversation(&mut self, conversation_id: &str) {
        self.pending
            .retain(|_, p| p.conversation_id != conversation_id);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
