//! Friends, incoming requests, and sent requests.

use alo_core::{Friend, FriendRequest, Presence, SentRequest};

#[derive(Debug, Default, Clone)]
pub struct FriendStore {
    friends: Vec<Friend>,
    requests: Vec<FriendRequest>,
    sent: Vec<SentRequest>,
}

impl FriendStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn friends(&self) -> &[Friend] {
        &self.friends
    }

    pub fn friend(&self, id: &str) -> Option<&Friend> {
        self.friends.iter().find(|f| f.id == id)
    }

    pub fn set_friends(&mut self, friends: Vec<Friend>) {
        self.friends = friends;
    }

    pub fn add_friend(&mut self, friend: Friend) -> bool {
        if self.friend(&friend.id).is_some() {
            return false;
        }
        self.friends.push(friend);
        true
    }

    pub fn remove_friend(&mut self, id: &str) -> Option<Friend> {
        let index = self.friends.iter().position(|f| f.id == id)?;
        Some(self.friends.remove(index))
    }

    /// Returns `false` for users that are not friends.
    pub fn set_presence(&mut self, user_id: &str, status: Presence) -> bool {
        match self.friends.iter_mut().find(|f| f.id == user_id) {
            Some(friend) => {
                friend.status = status;
                true
            }
            None => false,
        }
    }

    pub fn online_count(&self) -> usize {
        self.friends
            .iter()
            .filter(|f| f.status == Presence::Online)
            .count()
    }

    /// Display name of a known user, from friends or incoming requests.
    pub fn display_name(&self, user_id: &str) -> Option<&str> {
        self.friend(user_id)
            .map(|f| f.display_name.as_str())
            .or_else(|| {
                self.requests
                    .iter()
                    .find(|r| r.from_user_id == user_id)
                    .map(|r| r.from_user_name.as_str())
            })
    }

    pub fn avatar(&self, user_id: &str) -> Option<&str> {
        self.friend(user_id).and_then(|f| f.avatar_url.as_deref())
    }

    // ----

    pub fn requests(&self) -> &[FriendRequest] {
        &self.requests
    }

    pub fn set_requests(&mut self, requests: Vec<FriendRequest>) {
        self.requests = requests;
    }

    /// Newest first. Duplicate ids are ignored.
    pub fn add_request(&mut self, request: FriendRequest) -> bool {
        if self.requests.iter().any(|r| r.id == request.id) {
            return false;
        }
        self.requests.insert(0, request);
        true
    }

    pub fn remove_request(&mut self, id: &str) -> Option<FriendRequest> {
        let index = self.requests.iter().position(|r| r.id == id)?;
        Some(self.requests.remove(index))
    }

    pub fn sent_requests(&self) -> &[SentRequest] {
        &self.sent
    }

    pub fn set_sent_requests(&mut self, sent: Vec<SentRequest>) {
        self.sent = sent;
    }

    pub fn add_sent_request(&mut self, request: SentRequest) -> bool {
        if self.sent.iter().any(|r| r.id == request.id) {
            return false;
        }
        self.sent.insert(0, request);
        true
    }

    pub fn remove_sent_request(&mut self, id: &str) -> Option<SentRequest> {
        let index = self.sent.iter().position(|r| r.id == id)?;
        Some(self.sent.remove(index))
    }

    /// A request we sent was accepted: drop it and add the new friend.
    pub fn request_accepted(&mut self, request_id: &str, friend: Friend) -> bool {
        let friend_id = friend.id.clone();
        self.remove_sent_request(request_id);
        self.sent.retain(|r| r.to_user_id != friend_id);
        self.add_friend(friend)
    }

    pub fn reset(&mut self) {
        self.friends.clear();
        self.requests.clear();
        self.sent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alo_core::RequestStatus;
    use chrono::Utc;

    fn friend(id: &str, name: &str) -> Friend {
        Friend {
            id: id.into(),
            username: name.to_lowercase(),
            display_name: name.into(),
            avatar_url: None,
            status: Presence::Offline,
        }
    }

    fn request(id: &str, from: &str) -> FriendRequest {
        FriendRequest {
            id: id.into(),
            from_user_id: from.into(),
            from_user_name: format!("User {from}"),
            from_user_avatar: None,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
        }
    }

    fn sent(id: &str, to: &str) -> SentRequest {
        SentRequest {
            id: id.into(),
            to_user_id: to.into(),
            to_user_name: to.into(),
            to_user_avatar: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_presence_updates_known_friends_only() {
        let mut store = FriendStore::new();
        store.set_friends(vec![friend("u1", "Ana"), friend("u2", "Bo")]);

        assert!(store.set_presence("u1", Presence::Online));
        assert!(!store.set_presence("stranger", Presence::Online));
        assert_eq!(store.online_count(), 1);
        assert_eq!(store.friend("u1").unwrap().status, Presence::Online);
    }

    #[test]
    fn test_requests_dedup_and_newest_first() {
        let mut store = FriendStore::new();
        assert!(store.add_request(request("r1", "u1")));
        assert!(store.add_request(request("r2", "u2")));
        assert!(!store.add_request(request("r1", "u1")));

        let ids: Vec<_> = store.requests().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r1"]);
    }

    #[test]
    fn test_request_accepted_moves_to_friends() {
        let mut store = FriendStore::new();
        store.add_sent_request(sent("s1", "u9"));

        assert!(store.request_accepted("s1", friend("u9", "Nine")));
        assert!(store.sent_requests().is_empty());
        assert_eq!(store.friends().len(), 1);
        assert!(!store.request_accepted("s1", friend("u9", "Nine")));
    }

    #[test]
    fn test_display_name_lookup() {
        let mut store = FriendStore::new();
        store.add_friend(friend("u1", "Ana"));
        store.add_request(request("r1", "u2"));

        assert_eq!(store.display_name("u1"), Some("Ana"));
        assert_eq!(store.display_name("u2"), Some("User u2"));
        assert_eq!(store.display_name("u3"), None);
    }
}
