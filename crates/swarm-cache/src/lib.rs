//! LRU cache with TTL expiry.
//!
//! Used by the agent resolver to memoize materialized agents, model sets and
//! toolkit listings. Entries expire a fixed time after insertion and reads
//! always hand out clones.

pub mod cache;
pub mod config;
pub mod ttl;

pub use cache::TtlCache;
pub use config::{AGENT_TTL, CacheConfig, DEFAULT_CAPACITY, MODEL_TTL, TOOLKIT_TTL};
pub use ttl::TtlTracker;
