//! In-memory response cache with per-entry expiry
//!
//! The proxy only depends on the [`ResponseCache`] trait, so any key-value
//! store with TTL semantics can back it. [`MemoryCache`] is the built-in
//! implementation on top of Moka, which evicts expired entries itself.

use bytes::Bytes;
use moka::sync::Cache as MokaCache;
use moka::Expiry;
use std::time::{Duration, Instant};
use tracing::debug;

/// Key-value store with time-to-live semantics.
pub trait ResponseCache: Send + Sync {
    /// Returns the stored value unless it is missing or expired.
    fn get(&self, key: &str) -> Option<Bytes>;

    /// Stores `value`, replacing any previous entry for `key`.
    fn set(&self, key: &str, value: Bytes, ttl: Duration);
}

/// Entry in the memory cache
#[derive(Debug, Clone)]
struct CacheEntry {
    data: Bytes,
    ttl: Duration,
}

/// Expires each entry after the TTL it was stored with.
struct EntryTtl;

impl Expiry<String, CacheEntry> for EntryTtl {
    fn expire_after_create(&self, _key: &String, value: &CacheEntry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Memory cache of response bodies backed by Moka.
#[derive(Clone)]
pub struct MemoryCache {
    cache: MokaCache<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        let cache = MokaCache::builder().expire_after(EntryTtl).build();
        debug!("Memory cache created with per-entry TTL");
        Self { cache }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        // Moka applies evictions lazily; flush them so the count is exact.
        self.cache.run_pending_tasks();
        usize::try_from(self.cache.entry_count()).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, key: &str) -> Option<Bytes> {
        self.cache.get(key).map(|entry| entry.data)
    }

    fn set(&self, key: &str, value: Bytes, ttl: Duration) {
        self.cache.insert(key.to_string(), CacheEntry { data: value, ttl });
    }
}
