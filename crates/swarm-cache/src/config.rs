//! Configuration for the TTL cache.

use std::time::Duration;

/// Default maximum number of cached entries.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Default time-to-live for resolved agents.
pub const AGENT_TTL: Duration = Duration::from_secs(15 * 60);

/// Default time-to-live for toolkit listings.
pub const TOOLKIT_TTL: Duration = Duration::from_secs(15 * 60);

/// Default time-to-live for model sets.
pub const MODEL_TTL: Duration = Duration::from_secs(3 * 60);

/// Configuration for a [`TtlCache`](crate::TtlCache).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction.
    pub capacity: usize,

    /// Lifetime of an entry, measured from insertion. `None` never expires.
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            ttl: Some(AGENT_TTL),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn without_ttl(mut self) -> Self {
        self.ttl = None;
        self
    }
}
