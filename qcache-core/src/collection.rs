//! Collections, their cache tags, and relation edges.

use serde::{Deserialize, Serialize};

use crate::CachePolicyKind;

/// Naming capability every cacheable collection type provides.
///
/// Only `collection_name` is required. The provided methods give the
/// fallback behavior: tag by collection name, no separate duplicates tag,
/// and participation in caching.
pub trait CollectionNaming {
    /// Identifying name of the collection (table or entity name).
    fn collection_name(&self) -> &str;

    /// Name used to build cache tags for this collection.
    fn cache_tag_name(&self) -> String {
        self.collection_name().to_string()
    }

    /// Override for the duplicates-once tag name.
    fn duplicate_tag_name(&self) -> Option<String> {
        None
    }

    /// Whether this collection opts in to caching and cascading
    /// invalidation.
    fn is_cacheable(&self) -> bool {
        true
    }
}

/// A label grouping cache entries for bulk invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheTag(String);

impl CacheTag {
    /// Build the tag for `name` under a policy `prefix`.
    pub fn new(prefix: &str, name: &str) -> Self {
        Self(format!("{prefix}:{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a data collection and how its cache tags are named.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    name: String,
    tag_name: String,
    duplicate_tag_name: Option<String>,
    cacheable: bool,
}

impl CollectionDescriptor {
    /// A cacheable collection tagged by its own name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            tag_name: name.clone(),
            name,
            duplicate_tag_name: None,
            cacheable: true,
        }
    }

    /// Capture the naming of any [`CollectionNaming`] implementor.
    pub fn from_naming<N: CollectionNaming + ?Sized>(naming: &N) -> Self {
        Self {
            name: naming.collection_name().to_string(),
            tag_name: naming.cache_tag_name(),
            duplicate_tag_name: naming.duplicate_tag_name(),
            cacheable: naming.is_cacheable(),
        }
    }

    pub fn with_tag_name(mut self, tag_name: impl Into<String>) -> Self {
        self.tag_name = tag_name.into();
        self
    }

    pub fn with_duplicate_tag_name(mut self, tag_name: impl Into<String>) -> Self {
        self.duplicate_tag_name = Some(tag_name.into());
        self
    }

    /// Mark the collection as not participating in caching.
    pub fn not_cacheable(mut self) -> Self {
        self.cacheable = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tag for this collection's entries under `kind`, given that kind's
    /// configured prefix.
    pub fn tag_for(&self, kind: CachePolicyKind, prefix: &str) -> CacheTag {
        match kind {
            CachePolicyKind::CacheAllForever => CacheTag::new(prefix, &self.tag_name),
            CachePolicyKind::CacheDuplicatesOnce => CacheTag::new(
                prefix,
                self.duplicate_tag_name.as_deref().unwrap_or(&self.tag_name),
            ),
        }
    }
}

impl CollectionNaming for CollectionDescriptor {
    fn collection_name(&self) -> &str {
        &self.name
    }

    fn cache_tag_name(&self) -> String {
        self.tag_name.clone()
    }

    fn duplicate_tag_name(&self) -> Option<String> {
        self.duplicate_tag_name.clone()
    }

    fn is_cacheable(&self) -> bool {
        self.cacheable
    }
}

/// A direct relation from one collection to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationEdge {
    pub source: String,
    pub related: CollectionDescriptor,
}

impl RelationEdge {
    pub fn new(source: impl Into<String>, related: CollectionDescriptor) -> Self {
        Self {
            source: source.into(),
            related,
        }
    }

    /// Whether the related side participates in cascading invalidation.
    pub fn is_cache_enabled(&self) -> bool {
        self.related.is_cacheable()
    }
}
