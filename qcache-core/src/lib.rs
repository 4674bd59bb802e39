//! qcache Core - Shared Types
//!
//! Pure data structures for the query-result caching layer: errors,
//! configuration, policy resolution, collection naming and query
//! descriptions. All other crates depend on this one. No I/O beyond
//! reading a configuration file.

pub mod binding;
pub mod collection;
pub mod config;
pub mod error;
pub mod policy;
pub mod query;

pub use binding::BindingValue;
pub use collection::{CacheTag, CollectionDescriptor, CollectionNaming, RelationEdge};
pub use config::{
    default_prefix, CacheSettings, PolicySettings, DEFAULT_DUPLICATES_PREFIX,
    DEFAULT_FOREVER_PREFIX, DEFAULT_STORE,
};
pub use error::{
    CacheError, ConfigError, ExecutionError, QcacheError, QcacheResult, RelationError,
};
pub use policy::{CachePolicy, CachePolicyKind, CachingToggle, DUPLICATE_WINDOW};
pub use query::{ReadQuery, WriteKind, WriteQuery};
