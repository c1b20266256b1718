//! alo-app - Conversation state and session orchestration for alo-sync
//!
//! This crate owns the chat state (conversations, messages, friends, typing,
//! notifications), routes inbound frames into it, reconciles optimistic sends,
//! and drives everything from a single [`Session`].

pub mod config;
pub mod dispatcher;
pub mod friends;
pub mod notifications;
pub mod reconciler;
pub mod session;
pub mod store;
pub mod typing;

// Re-export primary types
pub use config::{load_settings, Settings, SyncSettings};
pub use dispatcher::{DispatchAction, DispatchTargets, Dispatched, Dispatcher, SyncEvent};
pub use friends::FriendStore;
pub use notifications::{
    Notification, NotificationCenter, NotificationKind, NotificationSink, NullSink,
};
pub use reconciler::Reconciler;
pub use session::{Session, SessionUpdate};
pub use store::{ChatStore, ConversationSnapshot};
pub use typing::{Typist, TypingTracker};
