//! Domain model: conversations, messages, and relationship records.
//!
//! These are the internal (camelCase-serializable) shapes the store owns and
//! the presentation layer reads. Server-side shapes live in
//! [`crate::protocol`] and are converted at the boundary.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix carried by every locally generated provisional message id.
pub const PROVISIONAL_PREFIX: &str = "local-";

// ─────────────────────────────────────────────────────────────────────────────
// Session credential
// ─────────────────────────────────────────────────────────────────────────────

/// A token-authenticated identity.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Bearer token for REST and the `token` query parameter of the socket.
    pub token: String,
    /// The id of the signed-in user (used for authorship decisions).
    pub user_id: String,
}

impl Credential {
    pub fn new(token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"***")
            .field("user_id", &self.user_id)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversations
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    #[default]
    Private,
    Group,
    /// Notes-to-self conversation.
    #[serde(rename = "self")]
    SelfChat,
}

/// A conversation as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub members: BTreeSet<String>,
    pub is_pinned: bool,
    pub unread_count: u32,
    /// Denormalized copy of the newest message.
    pub last_message: Option<Message>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, kind: ConversationKind) -> Self {
        Self {
            id: id.into(),
            kind,
            name: None,
            members: BTreeSet::new(),
            is_pinned: false,
            unread_count: 0,
            last_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_members<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.members = members.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

/// Content kind of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    File,
    Image,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::File => "file",
            MessageKind::Image => "image",
            MessageKind::System => "system",
        }
    }
}

/// Delivery status of a message.
///
/// `Sending → Sent → Delivered → Read` only moves forward. `Failed` is
/// reachable from `Sending` when a send deadline expires, and leaves only
/// back to `Sending` through an explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Position along the delivery progression. `Failed` sits with `Sending`.
    pub fn rank(&self) -> u8 {
        match self {
            MessageStatus::Sending | MessageStatus::Failed => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
        }
    }

    /// Whether a transition from `self` to `next` is allowed.
    pub fn can_advance_to(&self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        match (*self, next) {
            (Sending, Failed) => true,
            (Failed, Sending) => true,
            (Failed, _) | (_, Failed) | (_, Sending) => false,
            (current, next) => next.rank() > current.rank(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, MessageStatus::Sending | MessageStatus::Failed)
    }
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl FileRef {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            size: None,
        }
    }
}

/// A single message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server id once confirmed; equal to `client_id` while provisional.
    pub id: String,
    /// Locally generated id of an optimistic send.
    pub client_id: Option<String>,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub file: Option<FileRef>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// True while the message still carries its provisional id.
    pub fn is_provisional(&self) -> bool {
        self.client_id.as_deref() == Some(self.id.as_str())
    }

    pub fn is_from(&self, user_id: &str) -> bool {
        self.sender_id == user_id
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Friends
// ─────────────────────────────────────────────────────────────────────────────

/// Online/offline projection of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    #[default]
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Friend {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub status: Presence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

/// An incoming friend request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    pub id: String,
    pub from_user_id: String,
    pub from_user_name: String,
    pub from_user_avatar: Option<String>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

/// A request the signed-in user has sent and is still pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentRequest {
    pub id: String,
    pub to_user_id: String,
    pub to_user_name: String,
    pub to_user_avatar: Option<String>,
    pub created_at: DateTime<Utc>,
}
