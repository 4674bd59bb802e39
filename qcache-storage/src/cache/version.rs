//! Per-collection version counters.
//!
//! A version is an integer stored in the cache store itself, under
//! `query_cache_version:<prefix>:<collection>`. Versioned keys embed it, so
//! bumping the version orphans every key issued before the bump without
//! enumerating or deleting them.
//!
//! # Floor
//!
//! A full-store flush removes version records along with everything else.
//! To keep versions from moving backwards, the store also holds a floor
//! under `query_cache_version:<prefix>`, raised after such a flush. An
//! absent version reads as the floor (or [`DEFAULT_VERSION`] without one),
//! and a bump always lands above it.

use std::sync::Arc;

use chrono::Utc;
use qcache_core::QcacheResult;

use super::traits::{CacheBackend, CacheValue};

/// Reserved key namespace for version records.
pub const VERSION_NAMESPACE: &str = "query_cache_version";

/// Version reported for a collection that has never been bumped.
pub const DEFAULT_VERSION: i64 = 1;

/// Reads and bumps collection versions on a backend.
pub struct VersionCounter<C: CacheBackend> {
    backend: Arc<C>,
}

impl<C: CacheBackend> Clone for VersionCounter<C> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<C: CacheBackend> VersionCounter<C> {
    pub fn new(backend: Arc<C>) -> Self {
        Self { backend }
    }

    /// Backend key holding the version of `collection` under `prefix`.
    pub fn version_key(prefix: &str, collection: &str) -> String {
        format!("{VERSION_NAMESPACE}:{prefix}:{collection}")
    }

    /// Backend key holding the version floor for `prefix`.
    pub fn floor_key(prefix: &str) -> String {
        format!("{VERSION_NAMESPACE}:{prefix}")
    }

    /// Lowest version any collection under `prefix` may report.
    pub async fn floor(&self, store: &str, prefix: &str) -> QcacheResult<i64> {
        let floor = match self.backend.get(store, &Self::floor_key(prefix)).await? {
            Some(CacheValue::Integer(v)) => v.max(DEFAULT_VERSION),
            _ => DEFAULT_VERSION,
        };
        Ok(floor)
    }

    /// Current version, or the floor when none is recorded.
    ///
    /// A non-numeric value left by an older writer also reads as the
    /// floor; the next bump replaces it.
    pub async fn current_version(
        &self,
        store: &str,
        prefix: &str,
        collection: &str,
    ) -> QcacheResult<i64> {
        let key = Self::version_key(prefix, collection);
        match self.backend.get(store, &key).await? {
            Some(CacheValue::Integer(v)) => Ok(v),
            Some(CacheValue::Bytes(_)) => {
                tracing::warn!(store, key = %key, "Non-numeric collection version, using floor");
                self.floor(store, prefix).await
            }
            None => self.floor(store, prefix).await,
        }
    }

    /// Strictly increase the version of `collection`.
    ///
    /// Uses the backend's atomic increment. If that fails (backend error
    /// or a non-numeric legacy value), writes a version derived from the
    /// wall clock instead, never lower than the current version plus one.
    /// Returns the new version.
    pub async fn bump(&self, store: &str, prefix: &str, collection: &str) -> QcacheResult<i64> {
        let key = Self::version_key(prefix, collection);

        match self.increment(store, prefix, &key).await {
            Ok(version) => {
                tracing::debug!(store, collection, version, "Bumped collection version");
                Ok(version)
            }
            Err(e) => {
                tracing::warn!(
                    store,
                    collection,
                    error = %e,
                    "Version increment failed, falling back to timestamp version"
                );
                self.bump_from_clock(store, prefix, collection, &key).await
            }
        }
    }

    /// Raise the floor for `prefix` to at least `at_least`, and above the
    /// wall clock and the previous floor. Call after `store` was flushed
    /// whole. Returns the new floor.
    pub async fn raise_floor(&self, store: &str, prefix: &str, at_least: i64) -> QcacheResult<i64> {
        let previous = self.floor(store, prefix).await.unwrap_or(DEFAULT_VERSION);
        let floor = Utc::now()
            .timestamp_millis()
            .max(previous.saturating_add(1))
            .max(at_least);

        self.backend
            .put_forever(store, &Self::floor_key(prefix), CacheValue::Integer(floor), &[])
            .await?;
        tracing::info!(store, prefix, floor, "Raised collection version floor");
        Ok(floor)
    }

    async fn increment(&self, store: &str, prefix: &str, key: &str) -> QcacheResult<i64> {
        let version = self.backend.increment(store, key).await?;
        if version > DEFAULT_VERSION {
            return Ok(version);
        }

        // The counter was absent and restarted at or below what readers
        // already see; step past it.
        let floor = self.floor(store, prefix).await?;
        if floor <= DEFAULT_VERSION {
            return self.backend.increment(store, key).await;
        }
        let lifted = floor.saturating_add(1);
        self.backend
            .put_forever(store, key, CacheValue::Integer(lifted), &[])
            .await?;
        Ok(lifted)
    }

    async fn bump_from_clock(
        &self,
        store: &str,
        prefix: &str,
        collection: &str,
        key: &str,
    ) -> QcacheResult<i64> {
        let floor = match self.current_version(store, prefix, collection).await {
            Ok(current) => current.saturating_add(1),
            Err(e) => {
                tracing::warn!(
                    store,
                    collection,
                    error = %e,
                    "Cannot read version before fallback"
                );
                DEFAULT_VERSION + 1
            }
        };
        let version = Utc::now().timestamp_millis().max(floor);

        self.backend
            .put_forever(store, key, CacheValue::Integer(version), &[])
            .await?;
        tracing::debug!(store, collection, version, "Wrote timestamp collection version");
        Ok(version)
    }
}
