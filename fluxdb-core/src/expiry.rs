//! TTL tracking with lazy heap invalidation
//!
//! A min-heap of (deadline, id) candidates next to an authoritative
//! `live` map. Superseding or removing a TTL only touches the map; stale
//! heap entries are discarded when they surface. Carries its own mutex so
//! scheduling a TTL never contends with the collection's rw-lock.

use crate::Id;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct ExpiryEntry {
    deadline: Instant,
    id: Id,
}

#[derive(Default)]
struct ExpiryState {
    heap: BinaryHeap<Reverse<ExpiryEntry>>,
    live: HashMap<Id, Instant>,
}

/// Deadline tracker for document TTLs
#[derive(Default)]
pub struct ExpiryManager {
    state: Mutex<ExpiryState>,
}

impl ExpiryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule (or replace) the TTL for an id
    pub fn set_ttl(&self, id: Id, ttl: Duration) {
        let deadline = Instant::now() + ttl;
        let mut state = self.state.lock();
        state.live.insert(id, deadline);
        state.heap.push(Reverse(ExpiryEntry { deadline, id }));
    }

    /// Cancel the TTL for an id; its heap entry is invalidated lazily
    pub fn remove_ttl(&self, id: Id) {
        self.state.lock().live.remove(&id);
    }

    /// True iff the id currently has a live deadline
    pub fn has_ttl(&self, id: Id) -> bool {
        self.state.lock().live.contains_key(&id)
    }

    /// Pop every candidate whose deadline has passed
    ///
    /// A popped entry counts only when it still matches the live map;
    /// superseded and cancelled entries are dropped silently. Returned ids
    /// are candidates: the caller rechecks presence under its write lock
    /// before deleting.
    pub fn drain_expired(&self, now: Instant) -> Vec<Id> {
        let mut state = self.state.lock();
        let mut expired = Vec::new();

        while let Some(Reverse(top)) = state.heap.peek() {
            if top.deadline > now {
                break;
            }
            let Some(Reverse(entry)) = state.heap.pop() else {
                break;
            };
            if state.live.get(&entry.id) == Some(&entry.deadline) {
                state.live.remove(&entry.id);
                expired.push(entry.id);
            }
        }

        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn later(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[test]
    fn test_drain_after_deadline() {
        let expiry = ExpiryManager::new();
        expiry.set_ttl(1, Duration::from_secs(1));
        expiry.set_ttl(2, Duration::from_secs(3));

        assert!(expiry.drain_expired(Instant::now()).is_empty());
        assert_eq!(expiry.drain_expired(later(2)), vec![1]);
        assert_eq!(expiry.drain_expired(later(4)), vec![2]);
        assert!(expiry.drain_expired(later(10)).is_empty());
    }

    #[test]
    fn test_superseded_ttl_fires_once_at_latest_deadline() {
        let expiry = ExpiryManager::new();
        expiry.set_ttl(1, Duration::from_secs(1));
        expiry.set_ttl(1, Duration::from_secs(5));

        // the stale heap entry surfaces first and is discarded
        assert!(expiry.drain_expired(later(2)).is_empty());
        assert!(expiry.has_ttl(1));
        assert_eq!(expiry.drain_expired(later(6)), vec![1]);
        assert!(!expiry.has_ttl(1));
    }

    #[test]
    fn test_remove_ttl_cancels() {
        let expiry = ExpiryManager::new();
        expiry.set_ttl(1, Duration::from_secs(1));
        expiry.remove_ttl(1);
        assert!(expiry.drain_expired(later(2)).is_empty());
    }

    #[test]
    fn test_drain_returns_deadline_order() {
        let expiry = ExpiryManager::new();
        expiry.set_ttl(3, Duration::from_secs(3));
        expiry.set_ttl(1, Duration::from_secs(1));
        expiry.set_ttl(2, Duration::from_secs(2));
        assert_eq!(expiry.drain_expired(later(5)), vec![1, 2, 3]);
    }
}
