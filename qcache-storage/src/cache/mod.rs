//! Query-result cache with versioned keys and tag invalidation.
//!
//! Reads opt into one of two policies: cache-all-forever (entries never
//! expire and are invalidated by bumping a per-collection version folded
//! into the key) or cache-duplicates-once (entries live for one second to
//! collapse repeated identical queries). Writes flush the written
//! collection's tags, cascade one level to related collections that opt
//! in, and bump the version.
//!
//! # Failure Containment
//!
//! No cache failure ever fails a caller's query. A read that cannot use
//! the cache executes directly and reports [`CacheOutcome::Uncached`]. A
//! targeted invalidation that hits a backend or relation failure escalates
//! to flushing every enabled store whole.
//!
//! # Example
//!
//! ```ignore
//! let interceptor = QueryInterceptor::with_settings(backend, relations, settings);
//!
//! let read = interceptor.select::<Vec<Row>, _>(&query.cache_forever(), &db).await?;
//! if read.was_cache_hit() {
//!     tracing::debug!(age = ?read.age(), "served from cache");
//! }
//! ```

pub mod cascade;
pub mod interceptor;
pub mod invalidator;
pub mod key;
pub mod memory_backend;
pub mod outcome;
pub mod traits;
pub mod version;

pub use cascade::{
    InvalidationOutcome, RelationCascadeInvalidator, RelationProvider, StaticRelationProvider,
};
pub use interceptor::{CacheableResult, MutationExecutor, QueryFetcher, QueryInterceptor};
pub use invalidator::TaggedInvalidator;
pub use key::{CacheKey, CacheKeyBuilder};
pub use memory_backend::InMemoryCacheBackend;
pub use outcome::{CacheOutcome, CacheRead};
pub use traits::{CacheBackend, CacheStats, CacheValue};
pub use version::{VersionCounter, DEFAULT_VERSION, VERSION_NAMESPACE};
