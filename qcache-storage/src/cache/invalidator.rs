//! Tag-scoped and whole-store flushing.

use std::sync::Arc;

use qcache_core::{CachePolicy, CacheTag, CollectionDescriptor, QcacheResult};

use super::traits::CacheBackend;

/// Flushes backend entries by tag, or whole stores as a last resort.
pub struct TaggedInvalidator<C: CacheBackend> {
    backend: Arc<C>,
}

impl<C: CacheBackend> Clone for TaggedInvalidator<C> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<C: CacheBackend> TaggedInvalidator<C> {
    pub fn new(backend: Arc<C>) -> Self {
        Self { backend }
    }

    /// Flush every entry in `store` registered under `tag`.
    ///
    /// Flushing a tag with no entries is a no-op.
    pub async fn flush_tag(&self, store: &str, tag: &CacheTag) -> QcacheResult<u64> {
        let flushed = self.backend.flush_tag(store, tag).await?;
        tracing::debug!(store, tag = %tag, flushed, "Flushed cache tag");
        Ok(flushed)
    }

    /// Flush the entire store.
    pub async fn flush_all(&self, store: &str) -> QcacheResult<u64> {
        let flushed = self.backend.flush_store(store).await?;
        tracing::info!(store, flushed, "Flushed cache store");
        Ok(flushed)
    }

    /// Flush the collection's tag under every policy kind `policy` has
    /// enabled.
    pub async fn flush_collection(
        &self,
        policy: &CachePolicy,
        collection: &CollectionDescriptor,
    ) -> QcacheResult<u64> {
        let mut flushed = 0;
        for kind in policy.enabled_kinds() {
            let tag = collection.tag_for(kind, policy.prefix_for(kind));
            flushed += self.flush_tag(policy.store_for(kind), &tag).await?;
        }
        Ok(flushed)
    }
}
