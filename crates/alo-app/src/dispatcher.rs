//! Event dispatcher - routes inbound frames to the stores
//!
//! [`Dispatcher::dispatch`] parses one raw frame and applies it to the
//! state slices in [`DispatchTargets`]. It never fails: unknown events and
//! malformed frames are dropped so the next frame is still processed.

use tokio::time::Instant;

use alo_core::prelude::*;
use alo_core::protocol::{FriendAccepted, StatusUpdate, TypingUpdate, WireMessage};
use alo_core::{
    parse_frame, BoundedIdSet, Conversation, ConversationKind, InboundEvent, InboundFrame,
    Message, MessageStatus, Presence,
};

use crate::friends::FriendStore;
use crate::notifications::{Notification, NotificationKind, NotificationSink};
use crate::reconciler::Reconciler;
use crate::store::ChatStore;
use crate::typing::TypingTracker;

/// The state slices a dispatch may touch.
pub struct DispatchTargets<'a> {
    pub store: &'a mut ChatStore,
    pub friends: &'a mut FriendStore,
    pub typing: &'a mut TypingTracker,
    pub reconciler: &'a mut Reconciler,
    pub sink: &'a mut dyn NotificationSink,
}

/// What a dispatched frame changed.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    // ─────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────
    /// A message was appended to a conversation
    MessageAdded {
        conversation_id: String,
        message_id: String,
    },

    /// A provisional message was replaced by its server record
    MessageResolved {
        conversation_id: String,
        client_id: String,
        message_id: String,
    },

    /// A single message advanced its status
    MessageStatus {
        conversation_id: String,
        message_id: String,
        status: MessageStatus,
    },

    /// `user_id` read the conversation; `changed` messages became `read`
    ConversationRead {
        conversation_id: String,
        user_id: String,
        changed: usize,
    },

    // ─────────────────────────────────────────────────────────
    // Conversations
    // ─────────────────────────────────────────────────────────
    ConversationAdded { conversation_id: String },

    ConversationRemoved { conversation_id: String },

    // ─────────────────────────────────────────────────────────
    // People
    // ─────────────────────────────────────────────────────────
    Presence { user_id: String, status: Presence },

    Typing {
        conversation_id: String,
        user_id: String,
    },

    FriendRequest { request_id: String },

    FriendAdded { friend_id: String },

    // ─────────────────────────────────────────────────────────
    // No-ops
    // ─────────────────────────────────────────────────────────
    /// A `message:new` whose id was already processed
    Duplicate { message_id: String },

    /// Unknown event, malformed frame, or an event that changed nothing
    Ignored,
}

/// Follow-up work the session should perform after a dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchAction {
    /// A message arrived for a conversation we had never seen; reload the list
    RefreshConversations { conversation_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub event: SyncEvent,
    pub action: Option<DispatchAction>,
}

impl Dispatched {
    fn event(event: SyncEvent) -> Self {
        Self {
            event,
            action: None,
        }
    }

    fn ignored() -> Self {
        Self::event(SyncEvent::Ignored)
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    user_id: String,
    seen: BoundedIdSet,
    focused: bool,
}

impl Dispatcher {
    pub fn new(user_id: impl Into<String>, dedup_capacity: usize) -> Self {
        Self {
            user_id: user_id.into(),
            seen: BoundedIdSet::new(dedup_capacity),
            focused: true,
        }
    }

    /// Whether the app window has focus. Messages in the active conversation
    /// still notify while unfocused.
    pub fn set_focused(&mut self, focused: bool) {
        self.focused = focused;
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    /// Forget processed message ids.
    pub fn reset(&mut self) {
        self.seen.clear();
    }

    /// Parse and apply one raw text frame.
    pub fn dispatch(
        &mut self,
        raw: &str,
        targets: &mut DispatchTargets<'_>,
        now: Instant,
    ) -> Dispatched {
        match parse_frame(raw) {
            InboundFrame::Event(event) => self.apply(event, targets, now),
            InboundFrame::Unknown { event } => {
                debug!("Ignoring unknown event '{}'", event);
                Dispatched::ignored()
            }
            InboundFrame::Malformed(reason) => {
                debug!("Dropping malformed frame: {}", reason);
                Dispatched::ignored()
            }
        }
    }

    /// Apply an already parsed event.
    pub fn apply(
        &mut self,
        event: InboundEvent,
        targets: &mut DispatchTargets<'_>,
        now: Instant,
    ) -> Dispatched {
        match event {
            InboundEvent::MessageNew(wire) => self.on_message_new(wire, targets),
            InboundEvent::MessageStatus(update) => on_message_status(update, targets),
            InboundEvent::MessageReadAll(read) => {
                let changed = targets
                    .store
                    .mark_all_read(&read.conversation_id, &read.user_id);
                Dispatched::event(SyncEvent::ConversationRead {
                    conversation_id: read.conversation_id,
                    user_id: read.user_id,
                    changed,
                })
            }
            InboundEvent::ConversationNew(wire) => {
                let conversation = Conversation {
                    unread_count: 0,
                    ..wire.into_conversation()
                };
                let conversation_id = conversation.id.clone();
                if targets.store.add_conversation(conversation) {
                    Dispatched::event(SyncEvent::ConversationAdded { conversation_id })
                } else {
                    Dispatched::ignored()
                }
            }
            InboundEvent::ConversationDeleted { conversation_id } => {
                targets.reconciler.forget_conversation(&conversation_id);
                match targets.store.remove_conversation(&conversation_id) {
                    Some(_) => Dispatched::event(SyncEvent::ConversationRemoved { conversation_id }),
                    None => Dispatched::ignored(),
                }
            }
            InboundEvent::UserStatus(update) => {
                if targets.friends.set_presence(&update.user_id, update.status) {
                    Dispatched::event(SyncEvent::Presence {
                        user_id: update.user_id,
                        status: update.status,
                    })
                } else {
                    Dispatched::ignored()
                }
            }
            InboundEvent::UserTyping(update) => self.on_typing(update, targets, now),
            InboundEvent::FriendRequestReceived(wire) => {
                let request = wire.into_request();
                let request_id = request.id.clone();
                let notification = Notification {
                    kind: NotificationKind::FriendRequest,
                    sender_id: request.from_user_id.clone(),
                    sender_name: request.from_user_name.clone(),
                    sender_avatar: request.from_user_avatar.clone(),
                    content: "sent you a friend request".to_string(),
                    conversation_id: None,
                };
                if !targets.friends.add_request(request) {
                    return Dispatched::ignored();
                }
                targets.sink.notify(&notification);
                Dispatched::event(SyncEvent::FriendRequest { request_id })
            }
            InboundEvent::FriendRequestAccepted(accepted) => on_friend_accepted(accepted, targets),
        }
    }

    fn on_message_new(&mut self, wire: WireMessage, targets: &mut DispatchTargets<'_>) -> Dispatched {
        let message = wire.into_message();
        if !self.seen.insert(&message.id) {
            debug!("Duplicate message {}", message.id);
            return Dispatched::event(SyncEvent::Duplicate {
                message_id: message.id,
            });
        }

        let own = message.is_from(&self.user_id);
        let conversation_id = message.conversation_id.clone();
        let message_id = message.id.clone();
        targets.typing.clear(&conversation_id, &message.sender_id);

        // Echo of our own optimistic send.
        if own {
            if let Some(client_id) = message.client_id.clone() {
                if targets
                    .reconciler
                    .resolve(targets.store, &conversation_id, &client_id, message.clone())
                {
                    return Dispatched::event(SyncEvent::MessageResolved {
                        conversation_id,
                        client_id,
                        message_id,
                    });
                }
                debug!("No provisional message for {}, inserting", client_id);
            }
        }

        let mut action = None;
        let increment = if targets.store.contains_conversation(&conversation_id) {
            !own && !targets.store.is_active(&conversation_id)
        } else {
            let stub = Conversation {
                unread_count: u32::from(!own),
                ..Conversation::new(&conversation_id, ConversationKind::Private)
                    .with_members([message.sender_id.clone(), self.user_id.clone()])
            };
            targets.store.add_conversation(stub);
            action = Some(DispatchAction::RefreshConversations {
                conversation_id: conversation_id.clone(),
            });
            false
        };

        let should_notify = !own && (!targets.store.is_active(&conversation_id) || !self.focused);
        let notification = should_notify.then(|| message_notification(&message, targets.friends));

        if !targets.store.insert_message(message, increment) {
            return Dispatched::event(SyncEvent::Duplicate { message_id });
        }
        if let Some(notification) = notification {
            targets.sink.notify(&notification);
        }

        Dispatched {
            event: SyncEvent::MessageAdded {
                conversation_id,
                message_id,
            },
            action,
        }
    }

    fn on_typing(
        &mut self,
        update: TypingUpdate,
        targets: &mut DispatchTargets<'_>,
        now: Instant,
    ) -> Dispatched {
        if update.user_id == self.user_id {
            return Dispatched::ignored();
        }
        let name = update
            .user_name
            .or_else(|| targets.friends.display_name(&update.user_id).map(str::to_string));
        targets
            .typing
            .set(&update.conversation_id, &update.user_id, name, now);
        Dispatched::event(SyncEvent::Typing {
            conversation_id: update.conversation_id,
            user_id: update.user_id,
        })
    }
}

fn on_message_status(update: StatusUpdate, targets: &mut DispatchTargets<'_>) -> Dispatched {
    if targets
        .store
        .update_status(&update.conversation_id, &update.message_id, update.status)
    {
        Dispatched::event(SyncEvent::MessageStatus {
            conversation_id: update.conversation_id,
            message_id: update.message_id,
            status: update.status,
        })
    } else {
        Dispatched::ignored()
    }
}

fn on_friend_accepted(accepted: FriendAccepted, targets: &mut DispatchTargets<'_>) -> Dispatched {
    let friend = accepted.new_friend.into_friend();
    let friend_id = friend.id.clone();
    let notification = Notification {
        kind: NotificationKind::FriendAccepted,
        sender_id: friend.id.clone(),
        sender_name: friend.display_name.clone(),
        sender_avatar: friend.avatar_url.clone(),
        content: "accepted your friend request".to_string(),
        conversation_id: None,
    };
    if !targets.friends.request_accepted(&accepted.request_id, friend) {
        return Dispatched::ignored();
    }
    targets.sink.notify(&notification);
    Dispatched::event(SyncEvent::FriendAdded { friend_id })
}

fn message_notification(message: &Message, friends: &FriendStore) -> Notification {
    let sender_name = friends
        .display_name(&message.sender_id)
        .unwrap_or(&message.sender_id)
        .to_string();
    let content = match &message.file {
        Some(file) if message.content.is_empty() => file.name.clone(),
        _ => message.content.clone(),
    };
    Notification {
        kind: NotificationKind::Message,
        sender_id: message.sender_id.clone(),
        sender_name,
        sender_avatar: friends.avatar(&message.sender_id).map(str::to_string),
        content,
        conversation_id: Some(message.conversation_id.clone()),
    }
}
