// ABOUTME: Idempotent message ingestion across both delivery models
// ABOUTME: Accept-once identity tracking with capacity and retention eviction

use crate::config::DedupConfig;
use crate::message::IdentityKey;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Tracks which messages have already been observed, by identity key.
///
/// Push delivery can redeliver after a reconnect and poll delivery returns
/// overlapping windows; both funnel through here so the session accepts each
/// logical message exactly once until it is evicted.
pub struct DedupStore {
    seen: HashMap<IdentityKey, Instant>,
    insertion_order: VecDeque<IdentityKey>,
    capacity: usize,
    retention: Option<Duration>,
}

impl DedupStore {
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            seen: HashMap::new(),
            insertion_order: VecDeque::new(),
            capacity: config.capacity,
            retention: config.retention(),
        }
    }

    /// Returns true exactly once per identity key; false until the key is
    /// evicted by capacity pressure or the retention window.
    pub fn accept(&mut self, key: IdentityKey) -> bool {
        self.expire();

        if self.seen.contains_key(&key) {
            return false;
        }

        self.seen.insert(key.clone(), Instant::now());
        self.insertion_order.push_back(key);

        while self.seen.len() > self.capacity {
            if let Some(oldest) = self.insertion_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn expire(&mut self) {
        let Some(retention) = self.retention else {
            return;
        };
        let now = Instant::now();
        while let Some(oldest) = self.insertion_order.front() {
            match self.seen.get(oldest) {
                Some(arrived) if now.duration_since(*arrived) > retention => {
                    let key = self.insertion_order.pop_front().expect("front checked");
                    self.seen.remove(&key);
                }
                // Entries evicted by capacity may linger in the queue
                None => {
                    self.insertion_order.pop_front();
                }
                Some(_) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Topic};

    fn key(timestamp: i64, payload: &[u8]) -> IdentityKey {
        Message::new(payload.to_vec(), timestamp, Topic::new("/t")).identity_key()
    }

    fn store(capacity: usize, retention_ms: Option<u64>) -> DedupStore {
        DedupStore::new(&DedupConfig {
            capacity,
            retention_ms,
        })
    }

    #[tokio::test]
    async fn test_accept_once() {
        let mut dedup = store(16, None);
        let k = key(100, b"hello");
        assert!(dedup.accept(k.clone()));
        assert!(!dedup.accept(k.clone()));
        assert!(!dedup.accept(k));
        assert_eq!(dedup.len(), 1);
    }

    #[tokio::test]
    async fn test_same_timestamp_different_payloads_are_distinct() {
        let mut dedup = store(16, None);
        assert!(dedup.accept(key(100, b"a")));
        assert!(dedup.accept(key(100, b"b")));
        assert!(!dedup.accept(key(100, b"a")));
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_inserted() {
        let mut dedup = store(2, None);
        assert!(dedup.accept(key(1, b"one")));
        assert!(dedup.accept(key(2, b"two")));
        assert!(dedup.accept(key(3, b"three")));
        assert_eq!(dedup.len(), 2);

        // Oldest entry fell out, so it is novel again
        assert!(dedup.accept(key(1, b"one")));
        // Newer entries are still tracked... but inserting "one" evicted "two"
        assert!(!dedup.accept(key(3, b"three")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_expires_aged_entries() {
        let mut dedup = store(16, Some(5000));
        let k = key(100, b"hello");
        assert!(dedup.accept(k.clone()));
        assert!(!dedup.accept(k.clone()));

        tokio::time::advance(Duration::from_millis(6000)).await;
        assert!(dedup.accept(k));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_keeps_fresh_entries() {
        let mut dedup = store(16, Some(5000));
        let k = key(100, b"hello");
        assert!(dedup.accept(k.clone()));

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(!dedup.accept(k));
    }
}
