//! Cascading invalidation across related collections.
//!
//! Invalidating a collection also invalidates its directly related
//! collections (one level, not transitive). If any expected backend or
//! relation-metadata failure interrupts the targeted flush, every enabled
//! store is flushed whole instead: a partial invalidation could leave
//! stale entries behind, a full flush cannot.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use qcache_core::{
    CachePolicy, CollectionDescriptor, CollectionNaming, QcacheError, QcacheResult, RelationEdge,
};

use super::invalidator::TaggedInvalidator;
use super::traits::CacheBackend;

/// Source of relation metadata for collections.
#[async_trait]
pub trait RelationProvider: Send + Sync {
    /// Direct relations of `collection`.
    async fn relations_of(&self, collection: &CollectionDescriptor)
        -> QcacheResult<Vec<RelationEdge>>;
}

/// Relation metadata declared up front.
#[derive(Debug, Clone, Default)]
pub struct StaticRelationProvider {
    edges: HashMap<String, Vec<RelationEdge>>,
}

impl StaticRelationProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that `source` relates to `related`.
    pub fn relate(&mut self, source: &str, related: CollectionDescriptor) {
        self.edges
            .entry(source.to_string())
            .or_default()
            .push(RelationEdge::new(source, related));
    }

    /// Builder form of [`relate`](Self::relate).
    pub fn with_relation(mut self, source: &str, related: CollectionDescriptor) -> Self {
        self.relate(source, related);
        self
    }
}

#[async_trait]
impl RelationProvider for StaticRelationProvider {
    async fn relations_of(
        &self,
        collection: &CollectionDescriptor,
    ) -> QcacheResult<Vec<RelationEdge>> {
        Ok(self.edges.get(collection.name()).cloned().unwrap_or_default())
    }
}

/// What an invalidation actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationOutcome {
    /// Nothing is enabled; no backend calls were made.
    Skipped,
    /// Tags flushed for the root and these cacheable related collections.
    Targeted {
        collections: Vec<String>,
        flushed: u64,
    },
    /// Targeted invalidation failed; these stores were flushed whole.
    Escalated {
        stores: Vec<String>,
        cause: QcacheError,
    },
}

impl InvalidationOutcome {
    pub fn is_escalated(&self) -> bool {
        matches!(self, InvalidationOutcome::Escalated { .. })
    }
}

/// Invalidates a collection and its cache-enabled relations.
pub struct RelationCascadeInvalidator<C: CacheBackend> {
    invalidator: TaggedInvalidator<C>,
}

impl<C: CacheBackend> Clone for RelationCascadeInvalidator<C> {
    fn clone(&self) -> Self {
        Self {
            invalidator: self.invalidator.clone(),
        }
    }
}

impl<C: CacheBackend> RelationCascadeInvalidator<C> {
    pub fn new(backend: Arc<C>) -> Self {
        Self {
            invalidator: TaggedInvalidator::new(backend),
        }
    }

    pub fn tagged(&self) -> &TaggedInvalidator<C> {
        &self.invalidator
    }

    /// Invalidate `root` and its directly related cacheable collections.
    ///
    /// Backend and relation failures escalate to a full flush of every
    /// enabled store and are reported in the outcome. Any other error is a
    /// programming error and is returned unchanged, without escalation.
    pub async fn invalidate<R>(
        &self,
        policy: &CachePolicy,
        root: &CollectionDescriptor,
        relations: &R,
    ) -> QcacheResult<InvalidationOutcome>
    where
        R: RelationProvider + ?Sized,
    {
        if !policy.can_cache_anything() {
            return Ok(InvalidationOutcome::Skipped);
        }

        match self.invalidate_targeted(policy, root, relations).await {
            Ok((collections, flushed)) => Ok(InvalidationOutcome::Targeted {
                collections,
                flushed,
            }),
            Err(cause) if cause.is_backend_failure() => {
                tracing::error!(
                    collection = root.name(),
                    error = %cause,
                    "Targeted invalidation failed, flushing every enabled store"
                );
                let stores = self.escalate(policy).await;
                Ok(InvalidationOutcome::Escalated { stores, cause })
            }
            Err(e) => Err(e),
        }
    }

    async fn invalidate_targeted<R>(
        &self,
        policy: &CachePolicy,
        root: &CollectionDescriptor,
        relations: &R,
    ) -> QcacheResult<(Vec<String>, u64)>
    where
        R: RelationProvider + ?Sized,
    {
        let mut flushed = self.invalidator.flush_collection(policy, root).await?;
        let mut collections = vec![root.name().to_string()];

        for edge in relations.relations_of(root).await? {
            if !edge.is_cache_enabled() {
                continue;
            }
            let related = &edge.related;
            if collections.iter().any(|c| c == related.collection_name()) {
                continue;
            }
            flushed += self.invalidator.flush_collection(policy, related).await?;
            collections.push(related.name().to_string());
        }

        tracing::debug!(collection = root.name(), ?collections, flushed, "Invalidated collection");
        Ok((collections, flushed))
    }

    /// Flush each enabled store once. Failures are logged and the
    /// remaining stores are still flushed.
    async fn escalate(&self, policy: &CachePolicy) -> Vec<String> {
        let stores = policy.enabled_stores();
        for store in &stores {
            if let Err(e) = self.invalidator.flush_all(store).await {
                tracing::error!(store = %store, error = %e, "Full store flush failed");
            }
        }
        stores
    }
}
