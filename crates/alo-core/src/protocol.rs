//! Wire protocol for the chat WebSocket and the REST record shapes.
//!
//! Every frame in either direction is a JSON envelope:
//!
//! ```text
//! { "event": "message:new", "payload": { ... } }
//! ```
//!
//! The server emits Mongo-style records (`_id`, snake_case fields, per-user
//! status lists). The `Wire*` types below accept both that shape and the
//! camelCase shape, and convert into the [`crate::model`] types.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::model::{
    Conversation, ConversationKind, FileRef, Friend, FriendRequest, Message, MessageKind,
    MessageStatus, Presence, RequestStatus,
};

/// Event names used on the socket.
pub mod event {
    pub const MESSAGE_SEND: &str = "message:send";
    pub const MESSAGE_NEW: &str = "message:new";
    pub const MESSAGE_STATUS: &str = "message:status";
    pub const MESSAGE_READ: &str = "message:read";
    pub const MESSAGE_READ_ALL: &str = "message:read_all";
    pub const CONVERSATION_NEW: &str = "conversation:new";
    pub const CONVERSATION_DELETED: &str = "conversation:deleted";
    pub const USER_STATUS: &str = "user:status";
    pub const USER_TYPING: &str = "user:typing";
    pub const FRIEND_REQUEST_RECEIVED: &str = "friend:request_received";
    pub const FRIEND_REQUEST_ACCEPTED: &str = "friend:request_accepted";
    pub const PING: &str = "ping";
}

/// Close code the server uses when it rejects the socket token.
pub const CLOSE_CODE_UNAUTHORIZED: u16 = 4001;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The `{event, payload}` wrapper shared by both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default, alias = "data")]
    pub payload: Value,
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Frames the client sends.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    SendMessage {
        conversation_id: String,
        content: String,
        kind: MessageKind,
        client_id: String,
        file: Option<FileRef>,
    },
    Typing {
        conversation_id: String,
    },
    MarkRead {
        conversation_id: String,
        message_id: String,
    },
    MarkAllRead {
        conversation_id: String,
    },
    Ping,
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::SendMessage { .. } => event::MESSAGE_SEND,
            OutboundEvent::Typing { .. } => event::USER_TYPING,
            OutboundEvent::MarkRead { .. } => event::MESSAGE_READ,
            OutboundEvent::MarkAllRead { .. } => event::MESSAGE_READ_ALL,
            OutboundEvent::Ping => event::PING,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            OutboundEvent::SendMessage {
                conversation_id,
                content,
                kind,
                client_id,
                file,
            } => {
                let mut payload = json!({
                    "conversationId": conversation_id,
                    "content": content,
                    "type": kind.as_str(),
                    "clientId": client_id,
                });
                if let Some(file) = file {
                    payload["fileUrl"] = json!(file.url);
                    payload["fileName"] = json!(file.name);
                }
                payload
            }
            OutboundEvent::Typing { conversation_id } => {
                json!({ "conversationId": conversation_id })
            }
            OutboundEvent::MarkRead {
                conversation_id,
                message_id,
            } => json!({ "conversationId": conversation_id, "messageId": message_id }),
            OutboundEvent::MarkAllRead { conversation_id } => {
                json!({ "conversationId": conversation_id })
            }
            OutboundEvent::Ping => json!({}),
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope {
            event: self.name().to_string(),
            payload: self.payload(),
        }
    }

    /// Serialize to the text frame written on the socket.
    pub fn to_text(&self) -> Result<String> {
        serde_json::to_string(&self.to_envelope()).map_err(Error::from)
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A recognized inbound event with its typed payload.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    MessageNew(WireMessage),
    MessageStatus(StatusUpdate),
    MessageReadAll(ReadAll),
    ConversationNew(WireConversation),
    ConversationDeleted { conversation_id: String },
    UserStatus(PresenceUpdate),
    UserTyping(TypingUpdate),
    FriendRequestReceived(WireFriendRequest),
    FriendRequestAccepted(FriendAccepted),
}

/// Result of parsing one raw text frame.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Event(InboundEvent),
    /// Well-formed envelope with an event tag we do not handle.
    Unknown { event: String },
    /// Not an envelope, or a known event whose payload does not fit.
    Malformed(String),
}

/// Parse a raw WebSocket text frame.
///
/// Never fails: unknown tags and malformed input are reported as variants
/// so the dispatch loop can skip them and keep going.
pub fn parse_frame(text: &str) -> InboundFrame {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(e) => return InboundFrame::Malformed(format!("not an envelope: {e}")),
    };

    let Envelope { event, payload } = envelope;
    let parsed = match event.as_str() {
        event::MESSAGE_NEW => from_payload(payload).map(InboundEvent::MessageNew),
        event::MESSAGE_STATUS => from_payload(payload).map(InboundEvent::MessageStatus),
        event::MESSAGE_READ_ALL => from_payload(payload).map(InboundEvent::MessageReadAll),
        event::CONVERSATION_NEW => {
            // Either the record itself or `{ "conversation": record }`.
            let record = match payload {
                Value::Object(mut map) if map.contains_key("conversation") => {
                    map.remove("conversation").unwrap_or(Value::Null)
                }
                other => other,
            };
            from_payload(record).map(InboundEvent::ConversationNew)
        }
        event::CONVERSATION_DELETED => from_payload::<ConversationRef>(payload).map(|r| {
            InboundEvent::ConversationDeleted {
                conversation_id: r.conversation_id,
            }
        }),
        event::USER_STATUS => from_payload(payload).map(InboundEvent::UserStatus),
        event::USER_TYPING => from_payload(payload).map(InboundEvent::UserTyping),
        event::FRIEND_REQUEST_RECEIVED => {
            from_payload(payload).map(InboundEvent::FriendRequestReceived)
        }
        event::FRIEND_REQUEST_ACCEPTED => {
            from_payload(payload).map(InboundEvent::FriendRequestAccepted)
        }
        _ => return InboundFrame::Unknown { event },
    };

    match parsed {
        Ok(ev) => InboundFrame::Event(ev),
        Err(e) => InboundFrame::Malformed(format!("{event}: {e}")),
    }
}

fn from_payload<T: for<'de> Deserialize<'de>>(payload: Value) -> serde_json::Result<T> {
    serde_json::from_value(payload)
}

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationRef {
    #[serde(alias = "conversation_id", alias = "id")]
    conversation_id: String,
}

/// `message:status`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    #[serde(alias = "conversation_id")]
    pub conversation_id: String,
    #[serde(alias = "message_id")]
    pub message_id: String,
    pub status: MessageStatus,
    #[serde(default, alias = "user_id")]
    pub user_id: Option<String>,
}

/// `message:read_all`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadAll {
    #[serde(alias = "conversation_id")]
    pub conversation_id: String,
    /// The user who read the conversation.
    #[serde(alias = "user_id")]
    pub user_id: String,
}

/// `user:status`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    #[serde(alias = "user_id")]
    pub user_id: String,
    pub status: Presence,
}

/// `user:typing`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    #[serde(alias = "conversation_id")]
    pub conversation_id: String,
    #[serde(alias = "user_id")]
    pub user_id: String,
    #[serde(default, alias = "user_name")]
    pub user_name: Option<String>,
}

/// `friend:request_accepted`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendAccepted {
    #[serde(alias = "request_id")]
    pub request_id: String,
    #[serde(alias = "new_friend")]
    pub new_friend: WireFriend,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Message status as the server sends it: a single value or a per-user list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireStatus {
    Single(MessageStatus),
    PerUser(Vec<WireStatusEntry>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WireStatusEntry {
    pub status: MessageStatus,
}

impl WireStatus {
    /// Collapse to one status; a per-user list yields its furthest entry.
    pub fn collapse(&self) -> Option<MessageStatus> {
        match self {
            WireStatus::Single(status) => Some(*status),
            WireStatus::PerUser(entries) => entries
                .iter()
                .map(|e| e.status)
                .max_by_key(MessageStatus::rank),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WireFile {
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// A message record from the socket or REST.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default, alias = "client_id")]
    pub client_id: Option<String>,
    #[serde(alias = "conversation_id")]
    pub conversation_id: String,
    #[serde(alias = "sender_id")]
    pub sender_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub file: Option<WireFile>,
    #[serde(default, alias = "file_url")]
    pub file_url: Option<String>,
    #[serde(default, alias = "file_name")]
    pub file_name: Option<String>,
    #[serde(default)]
    pub status: Option<WireStatus>,
    #[serde(default, alias = "created_at", deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl WireMessage {
    pub fn file_ref(&self) -> Option<FileRef> {
        if let Some(file) = &self.file {
            return Some(FileRef {
                url: file.url.clone(),
                name: file.name.clone(),
                size: file.size,
            });
        }
        self.file_url.as_ref().map(|url| FileRef {
            url: url.clone(),
            name: self.file_name.clone().unwrap_or_default(),
            size: None,
        })
    }

    /// Convert to the store's model. Records from the server are at least `sent`.
    pub fn into_message(self) -> Message {
        let file = self.file_ref();
        let status = self
            .status
            .as_ref()
            .and_then(WireStatus::collapse)
            .filter(|s| !s.is_pending())
            .unwrap_or(MessageStatus::Sent);
        Message {
            id: self.id,
            client_id: self.client_id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            content: self.content,
            kind: self.kind,
            file,
            status,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Conversation members arrive as bare ids or as `{user_id, role, ...}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireMember {
    Id(String),
    Entry {
        #[serde(alias = "userId")]
        user_id: String,
    },
}

impl WireMember {
    pub fn user_id(&self) -> &str {
        match self {
            WireMember::Id(id) => id,
            WireMember::Entry { user_id } => user_id,
        }
    }
}

/// A conversation record from REST or `conversation:new`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireConversation {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: ConversationKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub members: Vec<WireMember>,
    #[serde(default, alias = "is_pinned", alias = "pinned")]
    pub is_pinned: bool,
    #[serde(default, alias = "unread_count")]
    pub unread_count: u32,
    #[serde(default, alias = "last_message")]
    pub last_message: Option<WireMessage>,
    #[serde(default, alias = "created_at", deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl WireConversation {
    pub fn into_conversation(self) -> Conversation {
        Conversation {
            id: self.id,
            kind: self.kind,
            name: self.name,
            members: self
                .members
                .iter()
                .map(|m| m.user_id().to_string())
                .collect(),
            is_pinned: self.is_pinned,
            unread_count: self.unread_count,
            last_message: self.last_message.map(WireMessage::into_message),
            created_at: self.created_at.unwrap_or_else(Utc::now),
        }
    }
}

/// A user record as embedded in friend payloads.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFriend {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, alias = "display_name")]
    pub display_name: Option<String>,
    #[serde(default, alias = "avatar_url")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub status: Presence,
}

impl WireFriend {
    pub fn into_friend(self) -> Friend {
        let display_name = self
            .display_name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.username.clone());
        Friend {
            id: self.id,
            username: self.username,
            display_name,
            avatar_url: self.avatar_url,
            status: self.status,
        }
    }
}

/// `friend:request_received`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFriendRequest {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(alias = "from_user_id")]
    pub from_user_id: String,
    #[serde(default, alias = "from_user_name")]
    pub from_user_name: String,
    #[serde(default, alias = "from_user_avatar")]
    pub from_user_avatar: Option<String>,
    #[serde(default)]
    pub status: RequestStatus,
    #[serde(default, alias = "created_at", deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl WireFriendRequest {
    pub fn into_request(self) -> FriendRequest {
        FriendRequest {
            id: self.id,
            from_user_id: self.from_user_id,
            from_user_name: self.from_user_name,
            from_user_avatar: self.from_user_avatar,
            status: self.status,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Accept RFC 3339, naive ISO-8601 (assumed UTC), or epoch milliseconds.
fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_timestamp))
}

/// Parse a server timestamp value. Returns `None` for anything unrecognized.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            }),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}
