//! Cache backend trait and stored value types.
//!
//! This module defines what the query cache needs from a backing store.
//! The store itself (array, Redis, memcached, ...) is a collaborator; this
//! crate only ships the in-process [`InMemoryCacheBackend`].
//!
//! [`InMemoryCacheBackend`]: super::memory_backend::InMemoryCacheBackend

use std::time::Duration;

use async_trait::async_trait;
use qcache_core::{CacheTag, QcacheResult};

/// A value held by a cache store.
///
/// Counters (collection versions) and serialized query results live in
/// the same store, so the backend keeps them apart by type rather than by
/// convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    /// A counter, as produced by [`CacheBackend::increment`].
    Integer(i64),
    /// An opaque payload, typically a serialized query result.
    Bytes(Vec<u8>),
}

impl CacheValue {
    /// The integer held, if this is a counter.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            CacheValue::Integer(value) => Some(*value),
            CacheValue::Bytes(_) => None,
        }
    }

    /// The payload held, if this is a byte value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CacheValue::Integer(_) => None,
            CacheValue::Bytes(bytes) => Some(bytes),
        }
    }
}

/// Pluggable key-value store addressed by a named store.
///
/// Implementations must make `increment` and `flush_tag` atomic with
/// respect to concurrent callers; the cache layer adds no locking of its
/// own.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a live (unexpired) value.
    async fn get(&self, store: &str, key: &str) -> QcacheResult<Option<CacheValue>>;

    /// Store a value under `key`, registered under every tag in `tags`.
    ///
    /// `ttl` of `None` stores the value without expiry.
    async fn put(
        &self,
        store: &str,
        key: &str,
        value: CacheValue,
        tags: &[CacheTag],
        ttl: Option<Duration>,
    ) -> QcacheResult<()>;

    /// Atomically increment the counter under `key` and return the new
    /// value. An absent key counts from zero, so the first increment
    /// returns 1.
    ///
    /// Fails with `NonNumericValue` if the key holds a byte value.
    async fn increment(&self, store: &str, key: &str) -> QcacheResult<i64>;

    /// Remove every entry registered under `tag`. Returns the number of
    /// entries removed; an unknown tag removes nothing.
    async fn flush_tag(&self, store: &str, tag: &CacheTag) -> QcacheResult<u64>;

    /// Remove every entry in the store.
    async fn flush_store(&self, store: &str) -> QcacheResult<u64>;

    /// Get store statistics.
    async fn stats(&self, store: &str) -> QcacheResult<CacheStats>;

    /// Store a value without expiry.
    async fn put_forever(
        &self,
        store: &str,
        key: &str,
        value: CacheValue,
        tags: &[CacheTag],
    ) -> QcacheResult<()> {
        self.put(store, key, value, tags, None).await
    }
}

/// Statistics about one cache store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of entries dropped because their expiry passed.
    pub expirations: u64,
    /// Number of entries removed by tag or store flushes.
    pub flushed: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
