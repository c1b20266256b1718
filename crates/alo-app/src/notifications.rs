//! Notification side effects.
//!
//! The dispatcher raises [`Notification`]s through a [`NotificationSink`]
//! supplied by the caller. [`NotificationCenter`] is the in-memory sink the
//! UI can render as toasts.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// What triggered a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Message,
    FriendRequest,
    FriendAccepted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub content: String,
    /// Set for message notifications so the UI can jump to it.
    pub conversation_id: Option<String>,
}

/// Receiver of notification side effects.
pub trait NotificationSink {
    fn notify(&mut self, notification: &Notification);
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&mut self, _notification: &Notification) {}
}

impl NotificationSink for Vec<Notification> {
    fn notify(&mut self, notification: &Notification) {
        self.push(notification.clone());
    }
}

#[derive(Debug, Clone)]
struct Entry {
    notification: Notification,
    at: Instant,
}

/// Keeps the newest `limit` notifications, each for at most `ttl`.
#[derive(Debug, Clone)]
pub struct NotificationCenter {
    limit: usize,
    ttl: Duration,
    entries: VecDeque<Entry>,
}

impl NotificationCenter {
    pub fn new(limit: usize, ttl: Duration) -> Self {
        Self {
            limit: limit.max(1),
            ttl,
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, notification: Notification, now: Instant) {
        self.entries.push_front(Entry {
            notification,
            at: now,
        });
        self.entries.truncate(self.limit);
    }

    /// Live notifications, newest first.
    pub fn active(&self, now: Instant) -> impl Iterator<Item = &Notification> {
        let ttl = self.ttl;
        self.entries
            .iter()
            .filter(move |e| now.duration_since(e.at) < ttl)
            .map(|e| &e.notification)
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|e| now.duration_since(e.at) < ttl);
        before - self.entries.len()
    }

    /// Dismiss everything tied to a conversation (it was opened).
    pub fn dismiss_conversation(&mut self, conversation_id: &str) {
        self.entries
            .retain(|e| e.notification.conversation_id.as_deref() != Some(conversation_id));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl NotificationSink for NotificationCenter {
    fn notify(&mut self, notification: &Notification) {
        self.push(notification.clone(), Instant::now());
    }
}
