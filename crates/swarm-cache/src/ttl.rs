//! Insertion-time tracking for TTL expiry.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Tracks when each key was stored.
#[derive(Debug)]
pub struct TtlTracker<K> {
    stored_at: HashMap<K, Instant>,
    ttl: Option<Duration>,
}

impl<K: Hash + Eq + Clone> TtlTracker<K> {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            stored_at: HashMap::new(),
            ttl,
        }
    }

    /// Record a (re)insertion, restarting the key's lifetime.
    pub fn touch(&mut self, key: &K) {
        self.stored_at.insert(key.clone(), Instant::now());
    }

    /// Keys without a record count as expired.
    pub fn is_expired(&self, key: &K) -> bool {
        match self.ttl {
            None => false,
            Some(ttl) => match self.stored_at.get(key) {
                None => true,
                Some(at) => at.elapsed() > ttl,
            },
        }
    }

    pub fn remove(&mut self, key: &K) {
        self.stored_at.remove(key);
    }

    /// Remove all expired keys and return them.
    pub fn drain_expired(&mut self) -> Vec<K> {
        let Some(ttl) = self.ttl else {
            return Vec::new();
        };
        let now = Instant::now();
        let expired: Vec<K> = self
            .stored_at
            .iter()
            .filter(|(_, at)| now.duration_since(**at) > ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            self.stored_at.remove(k);
        }
        expired
    }

    pub fn clear(&mut self) {
        self.stored_at.clear();
    }

    pub fn len(&self) -> usize {
        self.stored_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stored_at.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_no_ttl_never_expires() {
        let mut tracker = TtlTracker::new(None);
        tracker.touch(&"a".to_string());
        assert!(!tracker.is_expired(&"a".to_string()));
        assert!(tracker.drain_expired().is_empty());
    }

    #[test]
    fn test_expiration_and_drain() {
        let mut tracker = TtlTracker::new(Some(Duration::from_millis(10)));
        tracker.touch(&1u32);
        tracker.touch(&2u32);
        thread::sleep(Duration::from_millis(20));

        assert!(tracker.is_expired(&1));
        let mut expired = tracker.drain_expired();
        expired.sort();
        assert_eq!(expired, vec![1, 2]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_unknown_key_is_expired() {
        let tracker: TtlTracker<u32> = TtlTracker::new(Some(Duration::from_secs(60)));
        assert!(tracker.is_expired(&7));
    }
}
