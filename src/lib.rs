//! alo-sync - real-time synchronization core for the Alo chat client
//!
//! A library consumed by UI code. It keeps one authenticated WebSocket
//! connection alive, applies server events to an in-memory chat model, and
//! reconciles optimistic sends with the server's acknowledgements.
//!
//! The work is split across three crates, re-exported here:
//!
//! - [`alo_core`] - domain model, wire protocol, errors, logging
//! - [`alo_net`] - connection manager, transports, REST client
//! - [`alo_app`] - stores, dispatcher, reconciler, [`Session`]
//!
//! ```ignore
//! use alo_sync::prelude::*;
//!
//! let settings = alo_sync::alo_app::load_settings();
//! let api = RestClient::new(&settings.server.api_url, &token);
//! let mut session = Session::new(
//!     &settings,
//!     Credential::new(token, user_id),
//!     WsConnector,
//!     api,
//!     NotificationCenter::new(settings.sync.notification_limit, settings.sync.notification_ttl()),
//! );
//! session.start().await?;
//! while let Some(update) = session.next_update().await {
//!     // redraw
//! }
//! ```

pub use alo_app;
pub use alo_core;
pub use alo_net;

pub use alo_app::{Session, SessionUpdate, Settings, SyncEvent};
pub use alo_core::{Error, Result};

/// Everything a UI needs to drive a session
pub mod prelude {
    pub use alo_app::{
        ChatStore, FriendStore, Notification, NotificationCenter, NotificationSink, Session,
        SessionUpdate, Settings, SyncEvent,
    };
    pub use alo_core::{
        Conversation, ConversationKind, Credential, Error, FileRef, Message, MessageKind,
        MessageStatus, Presence, Result,
    };
    pub use alo_net::{ConnectionState, NewConversation, RestClient, WsConnector};
}
