//! In-process cache backend (the `"array"` store).
//!
//! Holds any number of named stores in memory. Nothing is persisted; a
//! process restart empties every store.
//!
//! # Atomicity
//!
//! Every operation takes the single write lock over all stores, so
//! `increment`, `flush_tag` and `flush_store` are atomic with respect to
//! each other and to concurrent `get`/`put`.
//!
//! # Expiry
//!
//! Expiry uses the tokio clock, so tests can pause and advance time.
//! Each store keeps its expiring keys ordered by deadline, and every
//! operation on a store first drops the entries whose deadline has
//! passed. Dead entries never outlive the next operation on their store.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use qcache_core::{CacheError, CacheTag, QcacheResult};
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::traits::{CacheBackend, CacheStats, CacheValue};

#[derive(Debug, Clone)]
struct Entry {
    value: CacheValue,
    expires_at: Option<Instant>,
    tags: Vec<CacheTag>,
}

#[derive(Debug, Default)]
struct Store {
    entries: HashMap<String, Entry>,
    /// Tag to member keys. May hold keys that have since been replaced or
    /// removed; flushes check membership against the entry's own tags.
    tags: HashMap<CacheTag, HashSet<String>>,
    /// Expiring keys ordered by deadline.
    expiries: BTreeSet<(Instant, String)>,
    stats: CacheStats,
}

impl Store {
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        for tag in &entry.tags {
            if let Some(members) = self.tags.get_mut(tag) {
                members.remove(key);
                if members.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
        if let Some(at) = entry.expires_at {
            self.expiries.remove(&(at, key.to_string()));
        }
        Some(entry)
    }

    fn insert(&mut self, key: String, entry: Entry) {
        self.remove(&key);
        for tag in &entry.tags {
            self.tags.entry(tag.clone()).or_default().insert(key.clone());
        }
        if let Some(at) = entry.expires_at {
            self.expiries.insert((at, key.clone()));
        }
        self.entries.insert(key, entry);
    }

    /// Drop every entry whose deadline is at or before `now`.
    fn purge_expired(&mut self, now: Instant) {
        while let Some((at, _)) = self.expiries.first() {
            if *at > now {
                break;
            }
            let Some((_, key)) = self.expiries.pop_first() else {
                break;
            };
            if self.remove(&key).is_some() {
                self.stats.expirations += 1;
            }
        }
        self.sync_entry_count();
    }

    fn clear(&mut self) -> u64 {
        let flushed = self.entries.len() as u64;
        self.entries.clear();
        self.tags.clear();
        self.expiries.clear();
        flushed
    }

    fn sync_entry_count(&mut self) {
        self.stats.entry_count = self.entries.len() as u64;
    }
}

/// In-memory cache backend with tag support.
///
/// # Example
///
/// ```ignore
/// let backend = InMemoryCacheBackend::new();
/// backend.put("array", "k", CacheValue::Bytes(b"rows".to_vec()), &[tag], None).await?;
/// backend.flush_tag("array", &tag).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    stores: RwLock<HashMap<String, Store>>,
}

impl InMemoryCacheBackend {
    /// Create a new, empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries in `store`.
    pub async fn len(&self, store: &str) -> usize {
        let now = Instant::now();
        let stores = self.stores.read().await;
        stores
            .get(store)
            .map(|s| {
                s.entries
                    .values()
                    .filter(|e| e.expires_at.map_or(true, |at| at > now))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Whether `store` has no live entries.
    pub async fn is_empty(&self, store: &str) -> bool {
        self.len(store).await == 0
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, store: &str, key: &str) -> QcacheResult<Option<CacheValue>> {
        let now = Instant::now();
        let mut stores = self.stores.write().await;
        let store = stores.entry(store.to_string()).or_default();
        store.purge_expired(now);

        let value = store.entries.get(key).map(|e| e.value.clone());
        match value {
            Some(_) => store.stats.hits += 1,
            None => store.stats.misses += 1,
        }
        Ok(value)
    }

    async fn put(
        &self,
        store: &str,
        key: &str,
        value: CacheValue,
        tags: &[CacheTag],
        ttl: Option<Duration>,
    ) -> QcacheResult<()> {
        let now = Instant::now();
        let mut stores = self.stores.write().await;
        let store = stores.entry(store.to_string()).or_default();
        store.purge_expired(now);

        store.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|ttl| now + ttl),
                tags: tags.to_vec(),
            },
        );
        store.sync_entry_count();
        Ok(())
    }

    async fn increment(&self, store_name: &str, key: &str) -> QcacheResult<i64> {
        let now = Instant::now();
        let mut stores = self.stores.write().await;
        let store = stores.entry(store_name.to_string()).or_default();
        store.purge_expired(now);

        let (current, expires_at, tags) = match store.entries.get(key) {
            None => (0, None, Vec::new()),
            Some(Entry {
                value: CacheValue::Integer(n),
                expires_at,
                tags,
            }) => (*n, *expires_at, tags.clone()),
            Some(Entry {
                value: CacheValue::Bytes(_),
                ..
            }) => {
                return Err(CacheError::NonNumericValue {
                    store: store_name.to_string(),
                    key: key.to_string(),
                }
                .into())
            }
        };

        let next = current.wrapping_add(1);
        store.insert(
            key.to_string(),
            Entry {
                value: CacheValue::Integer(next),
                expires_at,
                tags,
            },
        );
        store.sync_entry_count();
        Ok(next)
    }

    async fn flush_tag(&self, store: &str, tag: &CacheTag) -> QcacheResult<u64> {
        let now = Instant::now();
        let mut stores = self.stores.write().await;
        let Some(store) = stores.get_mut(store) else {
            return Ok(0);
        };
        store.purge_expired(now);

        let members = store.tags.remove(tag).unwrap_or_default();
        let mut flushed = 0u64;
        for key in members {
            let tagged = store
                .entries
                .get(&key)
                .is_some_and(|e| e.tags.contains(tag));
            if tagged && store.remove(&key).is_some() {
                flushed += 1;
            }
        }
        store.stats.flushed += flushed;
        store.sync_entry_count();
        Ok(flushed)
    }

    async fn flush_store(&self, store: &str) -> QcacheResult<u64> {
        let now = Instant::now();
        let mut stores = self.stores.write().await;
        let Some(store) = stores.get_mut(store) else {
            return Ok(0);
        };
        store.purge_expired(now);

        let flushed = store.clear();
        store.stats.flushed += flushed;
        store.sync_entry_count();
        Ok(flushed)
    }

    async fn stats(&self, store: &str) -> QcacheResult<CacheStats> {
        let now = Instant::now();
        let mut stores = self.stores.write().await;
        let Some(store) = stores.get_mut(store) else {
            return Ok(CacheStats::default());
        };
        store.purge_expired(now);
        Ok(store.stats.clone())
    }
}
