//! Bounded set of recently seen message ids.

use std::collections::{HashSet, VecDeque};

/// A fixed-capacity set that forgets the oldest id when full.
///
/// Used to drop duplicate deliveries of the same `message:new` after a
/// reconnect. Only the most recent `capacity` ids are remembered.
#[derive(Debug, Clone)]
pub struct BoundedIdSet {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl BoundedIdSet {
    /// Create a set remembering at most `capacity` ids (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_reports_duplicates() {
        let mut set = BoundedIdSet::new(3);
        assert!(set.insert("a"));
        assert!(!set.insert("a"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut set = BoundedIdSet::new(3);
        for id in ["a", "b", "c", "d"] {
            assert!(set.insert(id));
        }
        assert_eq!(set.len(), 3);
        assert!(!set.contains("a")); // evicted
        assert!(set.contains("d"));
        // Forgotten ids are accepted again.
        assert!(set.insert("a"));
        assert!(!set.contains("b"));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut set = BoundedIdSet::new(0);
        assert_eq!(set.capacity(), 1);
        assert!(set.insert("x"));
        assert!(set.insert("y"));
        assert!(!set.contains("x"));
    }

    #[test]
    fn test_clear() {
        let mut set = BoundedIdSet::new(2);
        set.insert("a");
        set.clear();
        assert!(set.is_empty());
        assert!(set.insert("a"));
    }
}
