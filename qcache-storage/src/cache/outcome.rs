//! Query lifecycle outcome and the delivered result wrapper.
//!
//! A read starts `Pending`, resolves to one of the [`CacheOutcome`]
//! variants, and is `Delivered` to the caller as a [`CacheRead<T>`].

use chrono::{DateTime, Utc};
use std::time::Duration;

use super::key::CacheKey;

/// How a read was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOutcome {
    /// No policy applied (none selected, policy disabled, or a cache
    /// failure forced direct execution).
    Uncached,
    /// Executed against the data source and offered to the cache.
    Miss,
    /// Served from the cache.
    Hit,
}

/// Result of a read, carrying how it was served.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    /// The query result.
    value: T,
    /// When the result was produced by the data source.
    produced_at: DateTime<Utc>,
    /// Key the result was looked up or stored under.
    key: Option<CacheKey>,
    /// Collection version folded into the key, for versioned policies.
    version: Option<i64>,
    outcome: CacheOutcome,
}

impl<T> CacheRead<T> {
    /// A result executed without the cache.
    pub fn uncached(value: T) -> Self {
        Self {
            value,
            produced_at: Utc::now(),
            key: None,
            version: None,
            outcome: CacheOutcome::Uncached,
        }
    }

    /// A freshly executed result that was offered to the cache.
    pub fn from_storage(value: T, key: CacheKey, version: Option<i64>) -> Self {
        Self {
            value,
            produced_at: Utc::now(),
            key: Some(key),
            version,
            outcome: CacheOutcome::Miss,
        }
    }

    /// A result served from the cache.
    pub fn from_cache(
        value: T,
        produced_at: DateTime<Utc>,
        key: CacheKey,
        version: Option<i64>,
    ) -> Self {
        Self {
            value,
            produced_at,
            key: Some(key),
            version,
            outcome: CacheOutcome::Hit,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Get a reference to the underlying value.
    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn outcome(&self) -> CacheOutcome {
        self.outcome
    }

    pub fn was_cache_hit(&self) -> bool {
        self.outcome == CacheOutcome::Hit
    }

    pub fn was_cache_miss(&self) -> bool {
        self.outcome == CacheOutcome::Miss
    }

    pub fn was_uncached(&self) -> bool {
        self.outcome == CacheOutcome::Uncached
    }

    pub fn key(&self) -> Option<&CacheKey> {
        self.key.as_ref()
    }

    pub fn version(&self) -> Option<i64> {
        self.version
    }

    pub fn produced_at(&self) -> DateTime<Utc> {
        self.produced_at
    }

    /// Time since the data source produced this result.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.produced_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            produced_at: self.produced_at,
            key: self.key,
            version: self.version,
            outcome: self.outcome,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
