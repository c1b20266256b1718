//! # alo-core - Domain Types and Wire Protocol
//!
//! Foundation crate for alo-sync. Provides the chat domain model, the
//! WebSocket/REST wire shapes, error handling, and logging setup.
//!
//! This crate has **zero internal dependencies**.
//!
//! ## Public API
//!
//! ### Domain Model (`model`)
//! - [`Conversation`], [`Message`], [`MessageStatus`] - what the store holds
//! - [`Friend`], [`FriendRequest`], [`SentRequest`] - relationship records
//! - [`Credential`] - token plus user id for a signed-in session
//!
//! ### Protocol (`protocol`)
//! - [`parse_frame()`] - classify a raw text frame into [`InboundFrame`]
//! - [`OutboundEvent`] - frames the client sends
//!
//! ### Error Handling (`error`)
//! - [`Error`], [`Result`], [`ResultExt`]
//! - [`ConnectionError`] - cloneable connect failure reason
//!
//! ## Prelude
//!
//! ```rust
//! use alo_core::prelude::*;
//! ```

pub mod dedup;
pub mod error;
pub mod logging;
pub mod model;
pub mod protocol;

/// Prelude for common imports used throughout the alo crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

pub use dedup::BoundedIdSet;
pub use error::{ConnectionError, Error, Result, ResultExt};
pub use model::{
    Conversation, ConversationKind, Credential, FileRef, Friend, FriendRequest, Message,
    MessageKind, MessageStatus, Presence, RequestStatus, SentRequest, PROVISIONAL_PREFIX,
};
pub use protocol::{parse_frame, Envelope, InboundEvent, InboundFrame, OutboundEvent};
