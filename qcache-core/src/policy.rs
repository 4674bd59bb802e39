//! Caching policy resolution.
//!
//! A [`CachePolicy`] combines static [`CacheSettings`] with a
//! [`CachingToggle`] owned by the caller's session. A policy kind is active
//! only when both say so.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::{CacheSettings, PolicySettings};

/// Lifetime of a duplicates-once entry.
pub const DUPLICATE_WINDOW: Duration = Duration::from_secs(1);

/// The two independently configurable caching policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CachePolicyKind {
    /// Cache every distinct query until its tag is flushed or its
    /// collection version is bumped.
    CacheAllForever,
    /// Cache a query only for [`DUPLICATE_WINDOW`], to absorb repeated
    /// identical executions.
    CacheDuplicatesOnce,
}

impl CachePolicyKind {
    /// Both kinds, in the order invalidation visits them.
    pub const ALL: [CachePolicyKind; 2] = [
        CachePolicyKind::CacheAllForever,
        CachePolicyKind::CacheDuplicatesOnce,
    ];

    /// Entry lifetime for this kind; `None` means no expiry.
    pub fn ttl(self) -> Option<Duration> {
        match self {
            CachePolicyKind::CacheAllForever => None,
            CachePolicyKind::CacheDuplicatesOnce => Some(DUPLICATE_WINDOW),
        }
    }

    /// Whether keys for this kind embed the collection version.
    pub fn is_versioned(self) -> bool {
        matches!(self, CachePolicyKind::CacheAllForever)
    }
}

impl std::fmt::Display for CachePolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CachePolicyKind::CacheAllForever => write!(f, "forever"),
            CachePolicyKind::CacheDuplicatesOnce => write!(f, "duplicates"),
        }
    }
}

/// Runtime on/off switch for caching, scoped to whoever holds it.
///
/// Clones share state, so a request handler can hand the same toggle to
/// every interceptor it builds and suppress caching for all of them at
/// once (for instance while a migration is running). Starts enabled.
#[derive(Debug, Clone)]
pub struct CachingToggle {
    enabled: Arc<AtomicBool>,
}

impl Default for CachingToggle {
    fn default() -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl CachingToggle {
    /// Create a new toggle in the enabled state.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_caching(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable_caching(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// Resolves whether each policy kind is active and where it stores data.
///
/// Pure reads of configuration and toggle state; no side effects.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    settings: CacheSettings,
    toggle: CachingToggle,
}

impl CachePolicy {
    /// Create a policy with its own, enabled toggle.
    pub fn new(settings: CacheSettings) -> Self {
        Self::with_toggle(settings, CachingToggle::new())
    }

    /// Create a policy sharing the given session toggle.
    pub fn with_toggle(settings: CacheSettings, toggle: CachingToggle) -> Self {
        Self { settings, toggle }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn toggle(&self) -> &CachingToggle {
        &self.toggle
    }

    pub fn enable_caching(&self) {
        self.toggle.enable_caching();
    }

    pub fn disable_caching(&self) {
        self.toggle.disable_caching();
    }

    /// Whether `kind` is both configured on and not switched off at runtime.
    pub fn is_enabled(&self, kind: CachePolicyKind) -> bool {
        self.toggle.is_enabled() && self.settings.policy(kind).enabled
    }

    pub fn is_forever_caching_enabled(&self) -> bool {
        self.is_enabled(CachePolicyKind::CacheAllForever)
    }

    pub fn is_duplicate_caching_enabled(&self) -> bool {
        self.is_enabled(CachePolicyKind::CacheDuplicatesOnce)
    }

    pub fn can_cache_anything(&self) -> bool {
        self.is_forever_caching_enabled() || self.is_duplicate_caching_enabled()
    }

    /// Backend store name for `kind`.
    pub fn store_for(&self, kind: CachePolicyKind) -> &str {
        &self.policy_settings(kind).store
    }

    /// Key and tag prefix for `kind`.
    pub fn prefix_for(&self, kind: CachePolicyKind) -> &str {
        &self.policy_settings(kind).prefix
    }

    /// Currently active kinds.
    pub fn enabled_kinds(&self) -> Vec<CachePolicyKind> {
        CachePolicyKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }

    /// Distinct store names used by the active kinds.
    pub fn enabled_stores(&self) -> Vec<String> {
        let mut stores: Vec<String> = self
            .enabled_kinds()
            .into_iter()
            .map(|kind| self.store_for(kind).to_string())
            .collect();
        stores.sort();
        stores.dedup();
        stores
    }

    fn policy_settings(&self, kind: CachePolicyKind) -> &PolicySettings {
        self.settings.policy(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enablement_requires_config_and_toggle() {
        let policy = CachePolicy::new(CacheSettings::default());
        assert!(!policy.can_cache_anything());

        let policy = CachePolicy::new(CacheSettings::all_enabled());
        assert!(policy.is_forever_caching_enabled());
        assert!(policy.is_duplicate_caching_enabled());

        policy.disable_caching();
        assert!(!policy.is_forever_caching_enabled());
        assert!(!policy.is_duplicate_caching_enabled());
        assert!(!policy.can_cache_anything());
        assert!(policy.enabled_kinds().is_empty());

        policy.enable_caching();
        assert!(policy.can_cache_anything());
    }

    #[test]
    fn test_can_cache_anything_is_or() {
        let settings = CacheSettings::default().with_policy(
            CachePolicyKind::CacheDuplicatesOnce,
            PolicySettings::enabled(CachePolicyKind::CacheDuplicatesOnce),
        );
        let policy = CachePolicy::new(settings);
        assert!(!policy.is_forever_caching_enabled());
        assert!(policy.is_duplicate_caching_enabled());
        assert!(policy.can_cache_anything());
        assert_eq!(
            policy.enabled_kinds(),
            vec![CachePolicyKind::CacheDuplicatesOnce]
        );
    }

    #[test]
    fn test_shared_toggle_spans_policies() {
        let toggle = CachingToggle::new();
        let a = CachePolicy::with_toggle(CacheSettings::all_enabled(), toggle.clone());
        let b = CachePolicy::with_toggle(CacheSettings::all_enabled(), toggle.clone());
        let other = CachePolicy::new(CacheSettings::all_enabled());

        a.disable_caching();
        assert!(!b.can_cache_anything());
        assert!(other.can_cache_anything());
    }

    #[test]
    fn test_store_and_prefix_resolution() {
        let settings = CacheSettings::all_enabled().with_policy(
            CachePolicyKind::CacheAllForever,
            PolicySettings::enabled(CachePolicyKind::CacheAllForever)
                .with_store("redis")
                .with_prefix("all"),
        );
        let policy = CachePolicy::new(settings);
        assert_eq!(policy.store_for(CachePolicyKind::CacheAllForever), "redis");
        assert_eq!(policy.prefix_for(CachePolicyKind::CacheAllForever), "all");
        assert_eq!(policy.store_for(CachePolicyKind::CacheDuplicatesOnce), "array");
        assert_eq!(
            policy.prefix_for(CachePolicyKind::CacheDuplicatesOnce),
            "cache.duplicate_query"
        );
        assert_eq!(policy.enabled_stores(), vec!["array".to_string(), "redis".to_string()]);
    }

    #[test]
    fn test_enabled_stores_dedup() {
        let policy = CachePolicy::new(CacheSettings::all_enabled());
        assert_eq!(policy.enabled_stores(), vec!["array".to_string()]);
    }

    #[test]
    fn test_kind_ttl() {
        assert_eq!(CachePolicyKind::CacheAllForever.ttl(), None);
        assert_eq!(CachePolicyKind::CacheDuplicatesOnce.ttl(), Some(DUPLICATE_WINDOW));
        assert!(CachePolicyKind::CacheAllForever.is_versioned());
        assert!(!CachePolicyKind::CacheDuplicatesOnce.is_versioned());
    }
}
