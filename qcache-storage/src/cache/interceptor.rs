//! Query execution interceptor.
//!
//! Wraps the read path to consult or populate the cache under the policy
//! each query selects, and wraps the write path to invalidate before the
//! mutation runs. Cache failures never fail the query: reads fall back to
//! direct execution and writes proceed after logging.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qcache_core::{
    CacheError, CachePolicy, CachePolicyKind, CacheSettings, CollectionDescriptor,
    CollectionNaming, QcacheResult, ReadQuery, WriteQuery,
};
use serde::{de::DeserializeOwned, Serialize};

use super::cascade::{InvalidationOutcome, RelationCascadeInvalidator, RelationProvider};
use super::key::{CacheKey, CacheKeyBuilder};
use super::outcome::CacheRead;
use super::traits::{CacheBackend, CacheValue};
use super::version::{VersionCounter, DEFAULT_VERSION};

/// Marker trait for query results that can be cached.
///
/// Results are stored as JSON, so anything serde can round-trip
/// qualifies.
pub trait CacheableResult: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheableResult for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Executes read queries against the underlying data source.
#[async_trait]
pub trait QueryFetcher<T: CacheableResult>: Send + Sync {
    /// Run the select and return its result.
    async fn fetch(&self, query: &ReadQuery) -> QcacheResult<T>;
}

/// Executes write queries against the underlying data source.
#[async_trait]
pub trait MutationExecutor: Send + Sync {
    /// Run the mutation and return the number of affected rows.
    async fn execute(&self, query: &WriteQuery) -> QcacheResult<u64>;
}

/// Cache-aware wrapper around query execution.
///
/// # Type Parameters
///
/// - `C`: The cache backend holding results and versions
/// - `R`: The relation metadata source for cascading invalidation
///
/// # Example
///
/// ```ignore
/// let interceptor = QueryInterceptor::new(backend, relations, policy);
///
/// let read = interceptor
///     .select::<Vec<User>, _>(&ReadQuery::new(sql, users).bind(7).cache_forever(), &db)
///     .await?;
///
/// // Flushes `users` (and related collections), bumps its version, then writes
/// interceptor.execute(&WriteQuery::update(sql, users), &db).await?;
/// ```
pub struct QueryInterceptor<C, R>
where
    C: CacheBackend,
    R: RelationProvider,
{
    backend: Arc<C>,
    relations: Arc<R>,
    policy: CachePolicy,
    versions: VersionCounter<C>,
    cascade: RelationCascadeInvalidator<C>,
}

impl<C, R> QueryInterceptor<C, R>
where
    C: CacheBackend,
    R: RelationProvider,
{
    /// Create a new interceptor.
    pub fn new(backend: Arc<C>, relations: Arc<R>, policy: CachePolicy) -> Self {
        Self {
            versions: VersionCounter::new(Arc::clone(&backend)),
            cascade: RelationCascadeInvalidator::new(Arc::clone(&backend)),
            backend,
            relations,
            policy,
        }
    }

    /// Create an interceptor with its own caching toggle.
    pub fn with_settings(backend: Arc<C>, relations: Arc<R>, settings: CacheSettings) -> Self {
        Self::new(backend, relations, CachePolicy::new(settings))
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn backend(&self) -> &C {
        &self.backend
    }

    pub fn versions(&self) -> &VersionCounter<C> {
        &self.versions
    }

    /// Re-enable caching for this interceptor's session.
    pub fn enable_caching(&self) {
        self.policy.enable_caching();
    }

    /// Suppress all caching and invalidation for this interceptor's
    /// session, regardless of configuration.
    pub fn disable_caching(&self) {
        self.policy.disable_caching();
    }

    // ========================================================================
    // READ PATH
    // ========================================================================

    /// Run a read query, consulting the cache under the query's policy.
    ///
    /// Collections that are not cacheable always execute uncached, since
    /// no cascade would ever invalidate their entries. Only errors from
    /// `fetcher` are returned; cache failures degrade to an uncached
    /// execution.
    pub async fn select<T, F>(
        &self,
        query: &ReadQuery,
        fetcher: &F,
    ) -> QcacheResult<CacheRead<T>>
    where
        T: CacheableResult,
        F: QueryFetcher<T> + ?Sized,
    {
        let Some(kind) = query
            .policy
            .filter(|kind| query.collection.is_cacheable() && self.policy.is_enabled(*kind))
        else {
            return self.fetch_uncached(query, fetcher).await;
        };

        let (key, version) = match self.resolve_key(kind, query).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(
                    collection = query.collection.name(),
                    error = %e,
                    "Cannot resolve cache key, executing uncached"
                );
                return self.fetch_uncached(query, fetcher).await;
            }
        };

        let store = self.policy.store_for(kind);
        match self.backend.get(store, key.as_str()).await {
            Ok(Some(cached)) => match decode_payload::<T>(&cached) {
                Ok((produced_at, value)) => {
                    tracing::debug!(store, key = %key, "Query cache hit");
                    return Ok(CacheRead::from_cache(value, produced_at, key, version));
                }
                Err(e) => {
                    tracing::warn!(
                        store,
                        key = %key,
                        error = %e,
                        "Unreadable cached result, refetching"
                    );
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(store, error = %e, "Cache lookup failed, executing uncached");
                return self.fetch_uncached(query, fetcher).await;
            }
        }

        tracing::debug!(store, key = %key, "Query cache miss");
        let value = fetcher.fetch(query).await?;
        let read = CacheRead::from_storage(value, key, version);
        self.remember(kind, &query.collection, &read).await;
        Ok(read)
    }

    async fn fetch_uncached<T, F>(
        &self,
        query: &ReadQuery,
        fetcher: &F,
    ) -> QcacheResult<CacheRead<T>>
    where
        T: CacheableResult,
        F: QueryFetcher<T> + ?Sized,
    {
        Ok(CacheRead::uncached(fetcher.fetch(query).await?))
    }

    /// Key for `query` under `kind`. Versioned kinds read the collection
    /// version fresh on every call.
    async fn resolve_key(
        &self,
        kind: CachePolicyKind,
        query: &ReadQuery,
    ) -> QcacheResult<(CacheKey, Option<i64>)> {
        let prefix = self.policy.prefix_for(kind);
        let builder = CacheKeyBuilder::new(prefix);

        if kind.is_versioned() {
            let version = self
                .versions
                .current_version(self.policy.store_for(kind), prefix, query.collection.name())
                .await?;
            let key = builder.build_versioned_key(&query.sql, &query.bindings, version)?;
            Ok((key, Some(version)))
        } else {
            Ok((builder.build_key(&query.sql, &query.bindings)?, None))
        }
    }

    /// Store a freshly fetched result, tagged for its collection. Failures
    /// are logged only.
    async fn remember<T: CacheableResult>(
        &self,
        kind: CachePolicyKind,
        collection: &CollectionDescriptor,
        read: &CacheRead<T>,
    ) {
        let Some(key) = read.key() else {
            return;
        };
        let store = self.policy.store_for(kind);
        let tag = collection.tag_for(kind, self.policy.prefix_for(kind));

        let payload = match encode_payload(read.produced_at(), read.value()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(store, key = %key, error = %e, "Cannot serialize query result");
                return;
            }
        };

        if let Err(e) = self
            .backend
            .put(store, key.as_str(), payload, &[tag], kind.ttl())
            .await
        {
            tracing::warn!(store, key = %key, error = %e, "Failed to store query result");
        }
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    /// Invalidate the written collection, then run the mutation.
    ///
    /// Invalidation failures are logged and never block the write.
    pub async fn execute<M>(&self, query: &WriteQuery, executor: &M) -> QcacheResult<u64>
    where
        M: MutationExecutor + ?Sized,
    {
        if self.policy.can_cache_anything() {
            if let Err(e) = self.invalidate(&query.collection).await {
                tracing::error!(
                    collection = query.collection.name(),
                    kind = %query.kind,
                    error = %e,
                    "Invalidation before write failed, proceeding with write"
                );
            }
        }
        executor.execute(query).await
    }

    /// Invalidate `collection` as a write would, without writing.
    ///
    /// Flushes the collection's tags (and those of its cacheable relations)
    /// under every enabled policy, then bumps its forever-policy version.
    /// Both steps are attempted even if the first fails.
    ///
    /// If the flush escalates and wipes the forever store, the version
    /// floor is raised past the collection's previous version first, so
    /// the bump still lands above every version issued before it.
    pub async fn invalidate(
        &self,
        collection: &CollectionDescriptor,
    ) -> QcacheResult<InvalidationOutcome> {
        let previous = self.forever_version(collection).await;
        let outcome = self
            .cascade
            .invalidate(&self.policy, collection, self.relations.as_ref())
            .await;
        if let Ok(InvalidationOutcome::Escalated { stores, .. }) = &outcome {
            tracing::warn!(
                collection = collection.name(),
                ?stores,
                "Invalidation escalated to full flush"
            );
            self.restore_version_floor(stores, previous).await;
        }

        let bumped = self.bump_forever_version(collection).await;
        let outcome = outcome?;
        bumped?;
        Ok(outcome)
    }

    /// Forever-policy version of `collection`, if enabled and readable.
    async fn forever_version(&self, collection: &CollectionDescriptor) -> Option<i64> {
        let kind = CachePolicyKind::CacheAllForever;
        if !self.policy.is_enabled(kind) {
            return None;
        }
        let store = self.policy.store_for(kind);
        match self
            .versions
            .current_version(store, self.policy.prefix_for(kind), collection.name())
            .await
        {
            Ok(version) => Some(version),
            Err(e) => {
                tracing::warn!(
                    store,
                    collection = collection.name(),
                    error = %e,
                    "Cannot read version before invalidation"
                );
                None
            }
        }
    }

    /// Raise the version floor if `flushed` includes the forever store.
    async fn restore_version_floor(&self, flushed: &[String], previous: Option<i64>) {
        let kind = CachePolicyKind::CacheAllForever;
        if !self.policy.is_enabled(kind) {
            return;
        }
        let store = self.policy.store_for(kind);
        if !flushed.iter().any(|s| s == store) {
            return;
        }
        let at_least = previous.map_or(DEFAULT_VERSION, |v| v.saturating_add(1));
        if let Err(e) = self
            .versions
            .raise_floor(store, self.policy.prefix_for(kind), at_least)
            .await
        {
            tracing::error!(store, error = %e, "Failed to raise version floor after full flush");
        }
    }

    async fn bump_forever_version(&self, collection: &CollectionDescriptor) -> QcacheResult<()> {
        let kind = CachePolicyKind::CacheAllForever;
        if !self.policy.is_enabled(kind) {
            return Ok(());
        }
        self.versions
            .bump(
                self.policy.store_for(kind),
                self.policy.prefix_for(kind),
                collection.name(),
            )
            .await?;
        Ok(())
    }
}

impl<C, R> Clone for QueryInterceptor<C, R>
where
    C: CacheBackend,
    R: RelationProvider,
{
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            relations: Arc::clone(&self.relations),
            policy: self.policy.clone(),
            versions: self.versions.clone(),
            cascade: self.cascade.clone(),
        }
    }
}

// ============================================================================
// PAYLOAD FORMAT
// ============================================================================

// Format: [produced_at millis: 8 bytes LE][json value]

fn encode_payload<T: Serialize>(
    produced_at: DateTime<Utc>,
    value: &T,
) -> QcacheResult<CacheValue> {
    let json = serde_json::to_vec(value).map_err(|e| CacheError::serialization(e.to_string()))?;
    let mut bytes = Vec::with_capacity(8 + json.len());
    bytes.extend_from_slice(&produced_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(&json);
    Ok(CacheValue::Bytes(bytes))
}

fn decode_payload<T: DeserializeOwned>(value: &CacheValue) -> QcacheResult<(DateTime<Utc>, T)> {
    let bytes = value
        .as_bytes()
        .ok_or_else(|| CacheError::serialization("cached result is not a byte payload"))?;
    if bytes.len() < 8 {
        return Err(CacheError::serialization("cached result payload truncated").into());
    }
    let mut millis = [0u8; 8];
    millis.copy_from_slice(&bytes[0..8]);
    let produced_at =
        DateTime::from_timestamp_millis(i64::from_le_bytes(millis)).unwrap_or_else(Utc::now);
    let value =
        serde_json::from_slice(&bytes[8..]).map_err(|e| CacheError::serialization(e.to_string()))?;
    Ok((produced_at, value))
}
