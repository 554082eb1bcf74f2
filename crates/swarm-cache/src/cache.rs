//! LRU cache with TTL expiry.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::ttl::TtlTracker;

struct CacheInner<K: Hash + Eq, V> {
    lru: LruCache<K, V>,
    ttl: TtlTracker<K>,
}

/// Thread-safe LRU cache whose entries expire a fixed time after insertion.
///
/// Reads return clones, so callers may freely mutate what they get back
/// without affecting the cached copy.
pub struct TtlCache<K: Hash + Eq, V> {
    inner: Arc<RwLock<CacheInner<K, V>>>,
    config: CacheConfig,
}

impl<K: Hash + Eq, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            config: self.config.clone(),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone,
{
    pub fn new(config: CacheConfig) -> Self {
        let cap = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        let inner = CacheInner {
            lru: LruCache::new(cap),
            ttl: TtlTracker::new(config.ttl),
        };
        Self {
            inner: Arc::new(RwLock::new(inner)),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.lru.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.lru.is_empty()
    }

    /// Clone of the cached value, dropping it first if it has expired.
    pub async fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.write().await;
        if inner.ttl.is_expired(key) {
            if inner.lru.pop(key).is_some() {
                debug!(key = ?key, "Cache entry expired");
            }
            inner.ttl.remove(key);
            return None;
        }
        let value = inner.lru.get(key).cloned();
        if value.is_some() {
            trace!(key = ?key, "Cache hit");
        }
        value
    }

    /// Insert a value, evicting the least recently used entry when full.
    pub async fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.write().await;
        if let Some((evicted, _)) = inner.lru.push(key.clone(), value) {
            if evicted != key {
                debug!(key = ?evicted, "Evicting LRU cache entry");
                inner.ttl.remove(&evicted);
            }
        }
        inner.ttl.touch(&key);
        trace!(key = ?key, size = inner.lru.len(), "Cache insert");
    }

    /// Cached value, or the result of `load` which is then cached.
    ///
    /// Loader errors are returned as-is and nothing is cached. Concurrent
    /// misses on the same key may both run the loader; the later insert wins.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key).await {
            return Ok(value);
        }
        let value = load().await?;
        self.insert(key, value.clone()).await;
        Ok(value)
    }

    pub async fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.write().await;
        inner.ttl.remove(key);
        inner.lru.pop(key)
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.lru.clear();
        inner.ttl.clear();
    }

    /// Drop every expired entry and return how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.write().await;
        let expired = inner.ttl.drain_expired();
        let mut count = 0;
        for key in expired {
            if inner.lru.pop(&key).is_some() {
                count += 1;
            }
        }
        if count > 0 {
            debug!(count, "Cleaned up expired cache entries");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cache(capacity: usize, ttl: Option<Duration>) -> TtlCache<String, Vec<String>> {
        let config = CacheConfig::new().with_capacity(capacity);
        let config = match ttl {
            Some(ttl) => config.with_ttl(ttl),
            None => config.without_ttl(),
        };
        TtlCache::new(config)
    }

    #[tokio::test]
    async fn test_get_returns_clone() {
        let c = cache(10, None);
        c.insert("k".into(), vec!["a".into()]).await;

        let mut got = c.get(&"k".to_string()).await.unwrap();
        got.push("b".into());

        assert_eq!(c.get(&"k".to_string()).await.unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let c = cache(2, None);
        c.insert("a".into(), vec![]).await;
        c.insert("b".into(), vec![]).await;
        c.get(&"a".to_string()).await;
        c.insert("c".into(), vec![]).await;

        assert!(c.get(&"a".to_string()).await.is_some());
        assert!(c.get(&"b".to_string()).await.is_none());
        assert_eq!(c.len().await, 2);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let c = cache(10, Some(Duration::from_millis(20)));
        c.insert("a".into(), vec![]).await;
        assert!(c.get(&"a".to_string()).await.is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(c.get(&"a".to_string()).await.is_none());
        assert!(c.is_empty().await);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let c = cache(10, Some(Duration::from_millis(10)));
        c.insert("a".into(), vec![]).await;
        c.insert("b".into(), vec![]).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(c.cleanup_expired().await, 2);
    }

    #[tokio::test]
    async fn test_get_or_try_insert_with() {
        let c = cache(10, None);
        let v: Result<_, String> = c
            .get_or_try_insert_with("k".into(), || async { Ok(vec!["x".to_string()]) })
            .await;
        assert_eq!(v.unwrap(), vec!["x".to_string()]);

        // second call must hit the cache
        let v: Result<_, String> = c
            .get_or_try_insert_with("k".into(), || async { Err("loader ran".to_string()) })
            .await;
        assert_eq!(v.unwrap(), vec!["x".to_string()]);

        let err: Result<Vec<String>, String> = c
            .get_or_try_insert_with("missing".into(), || async { Err("boom".to_string()) })
            .await;
        assert_eq!(err.unwrap_err(), "boom");
        assert!(c.get(&"missing".to_string()).await.is_none());
    }
}
