//! Typing indicators with expiry.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Someone currently typing in a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Typist {
    pub user_id: String,
    pub user_name: Option<String>,
    pub expires_at: Instant,
}

/// One typist per conversation; the latest event wins.
#[derive(Debug, Clone)]
pub struct TypingTracker {
    ttl: Duration,
    active: HashMap<String, Typist>,
}

impl TypingTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            active: HashMap::new(),
        }
    }

    pub fn set(
        &mut self,
        conversation_id: &str,
        user_id: &str,
        user_name: Option<String>,
        now: Instant,
    ) {
        self.active.insert(
            conversation_id.to_string(),
            Typist {
                user_id: user_id.to_string(),
                user_name,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Clear the indicator, e.g. when that user's message arrives.
    pub fn clear(&mut self, conversation_id: &str, user_id: &str) -> bool {
        let matches = self
            .active
            .get(conversation_id)
            .is_some_and(|t| t.user_id == user_id);
        if matches {
            self.active.remove(conversation_id);
        }
        matches
    }

    /// The live typist, if any, as of `now`.
    pub fn typist(&self, conversation_id: &str, now: Instant) -> Option<&Typist> {
        self.active
            .get(conversation_id)
            .filter(|t| t.expires_at > now)
    }

    /// Drop expired indicators. Returns the conversations that changed.
    pub fn prune(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .active
            .iter()
            .filter(|(_, t)| t.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.active.remove(id);
        }
        expired
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.active.values().map(|t| t.expires_at).min()
    }

    pub fn reset(&mut self) {
        self.active.clear();
    }
}
