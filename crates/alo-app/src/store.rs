//! Conversation/Message store.
//!
//! The single owner of every [`Conversation`] and [`Message`] record. All
//! mutations are plain functions of the current state and their arguments;
//! nothing here performs I/O.

use std::collections::HashMap;

use alo_core::{Conversation, Message, MessageStatus};

/// Saved copy of one conversation, used to undo an optimistic mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSnapshot {
    index: usize,
    conversation: Conversation,
    messages: Option<Vec<Message>>,
    was_active: bool,
}

impl ConversationSnapshot {
    pub fn conversation_id(&self) -> &str {
        &self.conversation.id
    }
}

/// The authoritative in-memory chat model.
#[derive(Debug, Default, Clone)]
pub struct ChatStore {
    /// Insertion order. Pin toggles stably re-sort it.
    conversations: Vec<Conversation>,
    messages: HashMap<String, Vec<Message>>,
    active: Option<String>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ─────────────────────────────────────────────────────────
    // Conversations
    // ─────────────────────────────────────────────────────────

    /// Replace the conversation list (initial sync). Message lists are kept.
    pub fn set_conversations(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations;
        sort_pinned_first(&mut self.conversations);
    }

    /// Insert at the head of the list unless the id is already present.
    pub fn add_conversation(&mut self, conversation: Conversation) -> bool {
        if self.contains_conversation(&conversation.id) {
            return false;
        }
        self.conversations.insert(0, conversation);
        sort_pinned_first(&mut self.conversations);
        true
    }

    pub fn contains_conversation(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    /// Apply `f` to the conversation with `id`. Returns `false` if absent.
    pub fn update_conversation<F>(&mut self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Conversation),
    {
        match self.conversations.iter_mut().find(|c| c.id == id) {
            Some(conversation) => {
                f(conversation);
                true
            }
            None => false,
        }
    }

    /// Conversations with pinned ones first, stable within each group.
    pub fn conversations(&self) -> Vec<&Conversation> {
        let (pinned, unpinned): (Vec<&Conversation>, Vec<&Conversation>) =
            self.conversations.iter().partition(|c| c.is_pinned);
        pinned.into_iter().chain(unpinned).collect()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Remove a conversation and its messages.
    pub fn remove_conversation(&mut self, id: &str) -> Option<Conversation> {
        let index = self.position(id)?;
        let removed = self.conversations.remove(index);
        self.messages.remove(id);
        if self.active.as_deref() == Some(id) {
            self.active = None;
        }
        Some(removed)
    }

    pub fn set_pinned(&mut self, id: &str, pinned: bool) -> bool {
        let changed = self.update_conversation(id, |c| c.is_pinned = pinned);
        if changed {
            sort_pinned_first(&mut self.conversations);
        }
        changed
    }

    /// Flip the pin flag. Returns the new value.
    pub fn toggle_pin(&mut self, id: &str) -> Option<bool> {
        let pinned = !self.conversation(id)?.is_pinned;
        self.set_pinned(id, pinned);
        Some(pinned)
    }

    // ─────────────────────────────────────────────────────────
    // Active conversation and unread counters
    // ─────────────────────────────────────────────────────────

    /// Switch the active conversation. The newly active one's unread
    /// counter resets to 0; its previous value is returned.
    pub fn set_active(&mut self, id: Option<&str>) -> u32 {
        self.active = id.map(str::to_string);
        let mut previous = 0;
        if let Some(id) = id {
            self.update_conversation(id, |c| {
                previous = c.unread_count;
                c.unread_count = 0;
            });
        }
        previous
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.as_deref() == Some(id)
    }

    pub fn unread_count(&self, id: &str) -> u32 {
        self.conversation(id).map_or(0, |c| c.unread_count)
    }

    pub fn total_unread(&self) -> u32 {
        self.conversations.iter().map(|c| c.unread_count).sum()
    }

    // ─────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────

    /// Messages of a conversation in arrival order.
    pub fn messages(&self, conversation_id: &str) -> &[Message] {
        self.messages
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn message(&self, conversation_id: &str, message_id: &str) -> Option<&Message> {
        self.messages(conversation_id)
            .iter()
            .find(|m| m.id == message_id)
    }

    pub fn find_by_client_id(&self, conversation_id: &str, client_id: &str) -> Option<&Message> {
        self.messages(conversation_id)
            .iter()
            .find(|m| m.client_id.as_deref() == Some(client_id))
    }

    pub fn contains_message(&self, conversation_id: &str, message_id: &str) -> bool {
        self.message(conversation_id, message_id).is_some()
    }

    /// Replace the history of a conversation with a fetched page.
    ///
    /// Local messages still `sending`/`failed` that the page does not
    /// contain are kept after it.
    pub fn set_messages(&mut self, conversation_id: &str, fetched: Vec<Message>) {
        let pending: Vec<Message> = self
            .messages
            .remove(conversation_id)
            .unwrap_or_default()
            .into_iter()
            .filter(|m| m.status.is_pending())
            .filter(|m| {
                !fetched.iter().any(|f| {
                    f.id == m.id || (f.client_id.is_some() && f.client_id == m.client_id)
                })
            })
            .collect();

        let mut list = fetched;
        list.extend(pending);
        if let Some(last) = list.last().cloned() {
            self.update_conversation(conversation_id, |c| c.last_message = Some(last));
        }
        self.messages.insert(conversation_id.to_string(), list);
    }

    /// Append a message unless one with the same id (or the same client id)
    /// is already stored. Updates the `last_message` projection and, when
    /// asked, the unread counter.
    pub fn insert_message(&mut self, message: Message, increment_unread: bool) -> bool {
        let conversation_id = message.conversation_id.clone();
        let list = self.messages.entry(conversation_id.clone()).or_default();
        let duplicate = list.iter().any(|m| {
            m.id == message.id || (message.client_id.is_some() && m.client_id == message.client_id)
        });
        if duplicate {
            return false;
        }
        list.push(message.clone());

        self.update_conversation(&conversation_id, |c| {
            c.last_message = Some(message);
            if increment_unread {
                c.unread_count += 1;
            }
        });
        true
    }

    /// Apply `f` to one message, keeping the `last_message` projection in step.
    pub fn update_message<F>(&mut self, conversation_id: &str, message_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        let Some(message) = self
            .messages
            .get_mut(conversation_id)
            .and_then(|list| list.iter_mut().find(|m| m.id == message_id))
        else {
            return false;
        };
        f(message);
        let updated = message.clone();
        self.sync_last_message(conversation_id, message_id, &updated);
        true
    }

    /// Move a message's status forward. Regressions are ignored.
    pub fn update_status(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        status: MessageStatus,
    ) -> bool {
        let allowed = self
            .message(conversation_id, message_id)
            .is_some_and(|m| m.status.can_advance_to(status));
        allowed && self.update_message(conversation_id, message_id, |m| m.status = status)
    }

    /// Mark every delivered message not authored by `reader` as read.
    /// Returns how many changed.
    ///
    /// Messages still `sending` or `failed` are left alone: they are local
    /// copies awaiting their echo, and the echo carries the server's status.
    pub fn mark_all_read(&mut self, conversation_id: &str, reader: &str) -> usize {
        let Some(list) = self.messages.get_mut(conversation_id) else {
            return 0;
        };
        let mut changed = 0;
        for message in list.iter_mut() {
            if message.is_from(reader) || message.status.is_pending() {
                continue;
            }
            if message.status.can_advance_to(MessageStatus::Read) {
                message.status = MessageStatus::Read;
                changed += 1;
            }
        }
        let last = list.last().cloned();
        if changed > 0 {
            if let Some(last) = last {
                self.update_conversation(conversation_id, |c| {
                    if c.last_message.as_ref().is_some_and(|m| m.id == last.id) {
                        c.last_message = Some(last);
                    }
                });
            }
        }
        changed
    }

    /// Replace the provisional message carrying `client_id` with `resolved`,
    /// in place. If `resolved.id` is already stored elsewhere the provisional
    /// entry is dropped instead. Returns `false` if no provisional entry exists.
    pub fn replace_provisional(
        &mut self,
        conversation_id: &str,
        client_id: &str,
        resolved: Message,
    ) -> bool {
        let Some(list) = self.messages.get_mut(conversation_id) else {
            return false;
        };
        let Some(index) = list
            .iter()
            .position(|m| m.client_id.as_deref() == Some(client_id) && m.status.is_pending())
        else {
            return false;
        };

        let already_stored = list
            .iter()
            .enumerate()
            .any(|(i, m)| i != index && m.id == resolved.id);
        if already_stored {
            list.remove(index);
        } else {
            list[index] = resolved.clone();
        }

        self.update_conversation(conversation_id, |c| {
            let points_at_provisional = c
                .last_message
                .as_ref()
                .is_some_and(|m| m.client_id.as_deref() == Some(client_id));
            if points_at_provisional {
                c.last_message = Some(resolved);
            }
        });
        true
    }

    /// Empty a conversation's history.
    pub fn clear_messages(&mut self, conversation_id: &str) {
        self.messages.insert(conversation_id.to_string(), Vec::new());
        self.update_conversation(conversation_id, |c| c.last_message = None);
    }

    // ─────────────────────────────────────────────────────────
    // Snapshots
    // ─────────────────────────────────────────────────────────

    pub fn snapshot(&self, id: &str) -> Option<ConversationSnapshot> {
        let index = self.position(id)?;
        Some(ConversationSnapshot {
            index,
            conversation: self.conversations[index].clone(),
            messages: self.messages.get(id).cloned(),
            was_active: self.is_active(id),
        })
    }

    /// Put a conversation back exactly as it was captured.
    pub fn restore(&mut self, snapshot: ConversationSnapshot) {
        let ConversationSnapshot {
            index,
            conversation,
            messages,
            was_active,
        } = snapshot;
        let id = conversation.id.clone();

        if let Some(current) = self.position(&id) {
            self.conversations.remove(current);
        }
        let index = index.min(self.conversations.len());
        self.conversations.insert(index, conversation);
        sort_pinned_first(&mut self.conversations);

        match messages {
            Some(list) => {
                self.messages.insert(id.clone(), list);
            }
            None => {
                self.messages.remove(&id);
            }
        }
        if was_active {
            self.active = Some(id);
        }
    }

    /// Drop everything (logout).
    pub fn reset(&mut self) {
        self.conversations.clear();
        self.messages.clear();
        self.active = None;
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.conversations.iter().position(|c| c.id == id)
    }

    fn sync_last_message(&mut self, conversation_id: &str, message_id: &str, updated: &Message) {
        self.update_conversation(conversation_id, |c| {
            if c.last_message.as_ref().is_some_and(|m| m.id == message_id) {
                c.last_message = Some(updated.clone());
            }
        });
    }
}

/// Stable: relative order inside the pinned and unpinned groups is kept.
fn sort_pinned_first(conversations: &mut [Conversation]) {
    conversations.sort_by_key(|c| !c.is_pinned);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alo_core::{ConversationKind, MessageKind};
    use chrono::Utc;

    fn conv(id: &str) -> Conversation {
        Conversation::new(id, ConversationKind::Private).with_members(["me", "peer"])
    }

    fn msg(conv: &str, id: &str, sender: &str) -> Message {
        Message {
            id: id.to_string(),
            client_id: None,
            conversation_id: conv.to_string(),
            sender_id: sender.to_string(),
            content: format!("body of {id}"),
            kind: MessageKind::Text,
            file: None,
            status: MessageStatus::Sent,
            created_at: Utc::now(),
        }
    }

    fn provisional(conv: &str, client_id: &str) -> Message {
        Message {
            client_id: Some(client_id.to_string()),
            status: MessageStatus::Sending,
            ..msg(conv, client_id, "me")
        }
    }

    fn ids(store: &ChatStore) -> Vec<&str> {
        store.conversations().iter().map(|c| c.id.as_str()).collect()
    }

    fn store_with(ids: &[&str]) -> ChatStore {
        let mut store = ChatStore::new();
        store.set_conversations(ids.iter().map(|id| conv(id)).collect());
        store
    }

    #[test]
    fn test_add_conversation_prepends_once() {
        let mut store = store_with(&["a", "b"]);
        assert!(store.add_conversation(conv("c")));
        assert!(!store.add_conversation(conv("a")));
        assert_eq!(ids(&store), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_pin_moves_before_unpinned_and_keeps_group_order() {
        let mut store = store_with(&["a", "b", "c", "d"]);

        store.set_pinned("c", true);
        assert_eq!(ids(&store), vec!["c", "a", "b", "d"]);

        store.set_pinned("d", true);
        assert_eq!(ids(&store), vec!["c", "d", "a", "b"]);

        assert_eq!(store.toggle_pin("c"), Some(false));
        assert_eq!(ids(&store), vec!["d", "c", "a", "b"]);
        assert_eq!(store.toggle_pin("missing"), None);
    }

    #[test]
    fn test_new_conversation_lands_after_pinned() {
        let mut store = store_with(&["a", "b"]);
        store.set_pinned("b", true);
        store.add_conversation(conv("new"));
        assert_eq!(ids(&store), vec!["b", "new", "a"]);
    }

    #[test]
    fn test_insert_message_is_idempotent() {
        let mut store = store_with(&["a"]);
        assert!(store.insert_message(msg("a", "m1", "peer"), true));
        assert!(!store.insert_message(msg("a", "m1", "peer"), true));
        assert_eq!(store.messages("a").len(), 1);
        assert_eq!(store.unread_count("a"), 1);
        assert_eq!(
            store.conversation("a").unwrap().last_message.as_ref().unwrap().id,
            "m1"
        );
    }

    #[test]
    fn test_set_active_resets_unread() {
        let mut store = store_with(&["a", "b"]);
        for i in 0..3 {
            store.insert_message(msg("a", &format!("m{i}"), "peer"), true);
        }
        store.insert_message(msg("b", "x", "peer"), true);
        assert_eq!(store.total_unread(), 4);

        assert_eq!(store.set_active(Some("a")), 3);
        assert_eq!(store.unread_count("a"), 0);
        assert!(store.is_active("a"));
        assert_eq!(store.total_unread(), 1);
    }

    #[test]
    fn test_status_only_moves_forward() {
        let mut store = store_with(&["a"]);
        store.insert_message(msg("a", "m1", "me"), false);

        assert!(store.update_status("a", "m1", MessageStatus::Read));
        assert!(!store.update_status("a", "m1", MessageStatus::Delivered));
        assert_eq!(store.message("a", "m1").unwrap().status, MessageStatus::Read);
        assert!(!store.update_status("a", "nope", MessageStatus::Read));
    }

    #[test]
    fn test_mark_all_read_skips_readers_own_messages() {
        let mut store = store_with(&["a"]);
        store.insert_message(msg("a", "m1", "me"), false);
        store.insert_message(msg("a", "m2", "peer"), false);
        store.insert_message(msg("a", "m3", "me"), false);

        let changed = store.mark_all_read("a", "peer");

        assert_eq!(changed, 2);
        assert_eq!(store.message("a", "m1").unwrap().status, MessageStatus::Read);
        assert_eq!(store.message("a", "m2").unwrap().status, MessageStatus::Sent);
        assert_eq!(store.message("a", "m3").unwrap().status, MessageStatus::Read);
        assert_eq!(
            store.conversation("a").unwrap().last_message.as_ref().unwrap().status,
            MessageStatus::Read
        );
    }

    #[test]
    fn test_replace_provisional_in_place() {
        let mut store = store_with(&["a"]);
        store.insert_message(msg("a", "m0", "peer"), false);
        store.insert_message(provisional("a", "local-1"), false);
        store.insert_message(msg("a", "m2", "peer"), false);

        let resolved = Message {
            id: "srv-1".into(),
            client_id: Some("local-1".into()),
            status: MessageStatus::Sent,
            ..msg("a", "srv-1", "me")
        };
        assert!(store.replace_provisional("a", "local-1", resolved));

        let ids: Vec<_> = store.messages("a").iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m0", "srv-1", "m2"]);
        assert!(!store.replace_provisional("a", "local-1", msg("a", "x", "me")));
    }

    #[test]
    fn test_replace_provisional_rewrites_last_message() {
        let mut store = store_with(&["a"]);
        store.insert_message(provisional("a", "local-1"), false);

        store.replace_provisional("a", "local-1", msg("a", "srv-1", "me"));

        let last = store.conversation("a").unwrap().last_message.clone().unwrap();
        assert_eq!(last.id, "srv-1");
    }

    #[test]
    fn test_replace_provisional_drops_when_server_copy_present() {
        let mut store = store_with(&["a"]);
        store.insert_message(provisional("a", "local-1"), false);
        store.insert_message(msg("a", "srv-1", "me"), false);

        assert!(store.replace_provisional("a", "local-1", msg("a", "srv-1", "me")));
        assert_eq!(store.messages("a").len(), 1);
        assert_eq!(store.messages("a")[0].id, "srv-1");
    }

    #[test]
    fn test_set_messages_keeps_unconfirmed_local_sends() {
        let mut store = store_with(&["a"]);
        store.insert_message(msg("a", "old", "peer"), false);
        store.insert_message(provisional("a", "local-1"), false);
        store.insert_message(provisional("a", "local-2"), false);

        let mut echoed = msg("a", "srv-2", "me");
        echoed.client_id = Some("local-2".into());
        store.set_messages("a", vec![msg("a", "h1", "peer"), echoed]);

        let ids: Vec<_> = store.messages("a").iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["h1", "srv-2", "local-1"]);
    }

    #[test]
    fn test_clear_messages_unsets_last_message() {
        let mut store = store_with(&["a"]);
        store.insert_message(msg("a", "m1", "peer"), false);

        store.clear_messages("a");

        assert!(store.messages("a").is_empty());
        assert!(store.conversation("a").unwrap().last_message.is_none());
    }

    #[test]
    fn test_remove_conversation_clears_active_and_messages() {
        let mut store = store_with(&["a", "b"]);
        store.insert_message(msg("a", "m1", "peer"), false);
        store.set_active(Some("a"));

        assert!(store.remove_conversation("a").is_some());

        assert_eq!(store.active_id(), None);
        assert!(store.messages("a").is_empty());
        assert_eq!(ids(&store), vec!["b"]);
        assert!(store.remove_conversation("a").is_none());
    }

    #[test]
    fn test_snapshot_restores_removed_conversation() {
        let mut store = store_with(&["a", "b", "c"]);
        store.insert_message(msg("b", "m1", "peer"), false);
        store.set_active(Some("b"));
        let snapshot = store.snapshot("b").unwrap();

        store.remove_conversation("b");
        store.restore(snapshot);

        assert_eq!(ids(&store), vec!["a", "b", "c"]);
        assert_eq!(store.messages("b").len(), 1);
        assert!(store.is_active("b"));
    }

    #[test]
    fn test_snapshot_restores_pin_flag() {
        let mut store = store_with(&["a", "b"]);
        let snapshot = store.snapshot("b").unwrap();

        store.set_pinned("b", true);
        store.restore(snapshot);

        assert!(!store.conversation("b").unwrap().is_pinned);
        assert_eq!(ids(&store), vec!["a", "b"]);
    }

    #[test]
    fn test_snapshot_restores_position_after_pin() {
        let mut store = store_with(&["a", "b", "c"]);
        let snapshot = store.snapshot("c").unwrap();

        store.set_pinned("c", true);
        assert_eq!(ids(&store), vec!["c", "a", "b"]);
        store.restore(snapshot);

        assert_eq!(ids(&store), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_snapshot_restore_keeps_other_pins_ahead() {
        let mut store = store_with(&["a", "b", "c"]);
        store.set_pinned("a", true);
        let snapshot = store.snapshot("c").unwrap();

        store.set_pinned("c", true);
        store.restore(snapshot);

        assert_eq!(ids(&store), vec!["a", "b", "c"]);
        assert!(store.conversation("a").unwrap().is_pinned);
    }

    #[test]
    fn test_mark_all_read_leaves_unconfirmed_sends() {
        let mut store = store_with(&["a"]);
        store.insert_message(msg("a", "m1", "me"), false);
        store.insert_message(provisional("a", "local-1"), false);

        let changed = store.mark_all_read("a", "peer");

        assert_eq!(changed, 1);
        assert_eq!(
            store.message("a", "local-1").unwrap().status,
            MessageStatus::Sending
        );
    }
}
