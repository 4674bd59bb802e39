//! qcache Storage - Query Cache and Invalidation
//!
//! Wraps query execution with a cache: deterministic keys, per-collection
//! version counters, tag-scoped invalidation and a relation cascade. The
//! backing store is pluggable through [`CacheBackend`]; an in-process
//! backend ships for the default `"array"` store and for tests.

pub mod cache;

pub use cache::{
    CacheBackend, CacheKey, CacheKeyBuilder, CacheOutcome, CacheRead, CacheStats, CacheValue,
    CacheableResult, InMemoryCacheBackend, InvalidationOutcome, MutationExecutor, QueryFetcher,
    QueryInterceptor, RelationCascadeInvalidator, RelationProvider, StaticRelationProvider,
    TaggedInvalidator, VersionCounter, DEFAULT_VERSION, VERSION_NAMESPACE,
};
