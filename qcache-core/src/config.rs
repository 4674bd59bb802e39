//! Configuration loading for the query cache.
//!
//! Unlike most configuration in this workspace, every field here has a
//! default: an absent section means "this policy is disabled", never an
//! error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{CachePolicyKind, ConfigError, QcacheResult};

/// Name of the in-process, non-persistent default store.
pub const DEFAULT_STORE: &str = "array";

/// Default key/tag prefix for the cache-forever policy.
pub const DEFAULT_FOREVER_PREFIX: &str = "cache.all_query";

/// Default key/tag prefix for the duplicates-once policy.
pub const DEFAULT_DUPLICATES_PREFIX: &str = "cache.duplicate_query";

/// Store names and prefixes are embedded in colon-separated keys.
static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("Invalid name regex"));

/// Settings for a single caching policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicySettings {
    pub enabled: bool,
    pub store: String,
    pub prefix: String,
}

fn default_store() -> String {
    DEFAULT_STORE.to_string()
}

impl PolicySettings {
    /// Disabled settings with the default store and prefix for `kind`.
    pub fn disabled(kind: CachePolicyKind) -> Self {
        Self {
            enabled: false,
            store: default_store(),
            prefix: default_prefix(kind).to_string(),
        }
    }

    /// Enabled settings with the default store and prefix for `kind`.
    pub fn enabled(kind: CachePolicyKind) -> Self {
        Self {
            enabled: true,
            ..Self::disabled(kind)
        }
    }

    /// Set the backend store name.
    pub fn with_store(mut self, store: impl Into<String>) -> Self {
        self.store = store.into();
        self
    }

    /// Set the key/tag prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

/// Default prefix for a policy kind.
pub fn default_prefix(kind: CachePolicyKind) -> &'static str {
    match kind {
        CachePolicyKind::CacheAllForever => DEFAULT_FOREVER_PREFIX,
        CachePolicyKind::CacheDuplicatesOnce => DEFAULT_DUPLICATES_PREFIX,
    }
}

/// Master configuration for both caching policies.
///
/// TOML layout:
///
/// ```toml
/// [forever]
/// enabled = true
/// store = "redis"
/// prefix = "cache.all_query"
///
/// [duplicates]
/// enabled = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheSettings {
    pub forever: PolicySettings,
    pub duplicates: PolicySettings,
}

fn default_forever() -> PolicySettings {
    PolicySettings::disabled(CachePolicyKind::CacheAllForever)
}

fn default_duplicates() -> PolicySettings {
    PolicySettings::disabled(CachePolicyKind::CacheDuplicatesOnce)
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            forever: default_forever(),
            duplicates: default_duplicates(),
        }
    }
}

/// Partial view used while deserializing, so that a section without a
/// prefix still gets the per-policy default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPolicySettings {
    enabled: Option<bool>,
    store: Option<String>,
    prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCacheSettings {
    #[serde(default)]
    forever: RawPolicySettings,
    #[serde(default)]
    duplicates: RawPolicySettings,
}

impl RawPolicySettings {
    fn resolve(self, kind: CachePolicyKind) -> PolicySettings {
        let defaults = PolicySettings::disabled(kind);
        PolicySettings {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            store: self.store.unwrap_or(defaults.store),
            prefix: self.prefix.unwrap_or(defaults.prefix),
        }
    }
}

impl CacheSettings {
    /// Settings with both policies enabled on the default store.
    pub fn all_enabled() -> Self {
        Self {
            forever: PolicySettings::enabled(CachePolicyKind::CacheAllForever),
            duplicates: PolicySettings::enabled(CachePolicyKind::CacheDuplicatesOnce),
        }
    }

    /// Settings for one policy kind.
    pub fn policy(&self, kind: CachePolicyKind) -> &PolicySettings {
        match kind {
            CachePolicyKind::CacheAllForever => &self.forever,
            CachePolicyKind::CacheDuplicatesOnce => &self.duplicates,
        }
    }

    /// Replace the settings for one policy kind.
    pub fn with_policy(mut self, kind: CachePolicyKind, settings: PolicySettings) -> Self {
        match kind {
            CachePolicyKind::CacheAllForever => self.forever = settings,
            CachePolicyKind::CacheDuplicatesOnce => self.duplicates = settings,
        }
        self
    }

    /// Parse settings from TOML text and validate them.
    pub fn from_toml_str(contents: &str) -> QcacheResult<Self> {
        let raw: RawCacheSettings = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        let settings = Self {
            forever: raw.forever.resolve(CachePolicyKind::CacheAllForever),
            duplicates: raw.duplicates.resolve(CachePolicyKind::CacheDuplicatesOnce),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file.
    pub fn from_path(path: &Path) -> QcacheResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Load settings from `QCACHE_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> QcacheResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> QcacheResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        for (kind, section) in [
            (CachePolicyKind::CacheAllForever, "FOREVER"),
            (CachePolicyKind::CacheDuplicatesOnce, "DUPLICATES"),
        ] {
            let mut policy = settings.policy(kind).clone();
            let enabled_var = format!("QCACHE_{section}_ENABLED");
            if let Some(value) = lookup(&enabled_var) {
                policy.enabled = parse_bool(&enabled_var, &value)?;
            }
            if let Some(store) = lookup(&format!("QCACHE_{section}_STORE")) {
                policy.store = store;
            }
            if let Some(prefix) = lookup(&format!("QCACHE_{section}_PREFIX")) {
                policy.prefix = prefix;
            }
            settings = settings.with_policy(kind, policy);
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - store names and prefixes are non-empty
    /// - store names and prefixes only use `[A-Za-z0-9_.-]`
    pub fn validate(&self) -> QcacheResult<()> {
        for (section, policy) in [("forever", &self.forever), ("duplicates", &self.duplicates)] {
            check_name(&format!("{section}.store"), &policy.store)?;
            check_name(&format!("{section}.prefix"), &policy.prefix)?;
        }
        Ok(())
    }
}

fn check_name(field: &str, value: &str) -> QcacheResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingRequired {
            field: field.to_string(),
        }
        .into());
    }
    if !NAME_PATTERN.is_match(value) {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "must match [A-Za-z0-9_.-]+".to_string(),
        }
        .into());
    }
    Ok(())
}

fn parse_bool(field: &str, value: &str) -> QcacheResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QcacheError;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_disable_caching() {
        let settings = CacheSettings::default();
        assert!(!settings.forever.enabled);
        assert!(!settings.duplicates.enabled);
        assert_eq!(settings.forever.store, "array");
        assert_eq!(settings.duplicates.store, "array");
        assert_eq!(settings.forever.prefix, "cache.all_query");
        assert_eq!(settings.duplicates.prefix, "cache.duplicate_query");
    }

    #[test]
    fn test_empty_toml_is_all_defaults() {
        let settings = CacheSettings::from_toml_str("").unwrap();
        assert_eq!(settings, CacheSettings::default());
    }

    #[test]
    fn test_partial_toml_keeps_policy_prefix() {
        let settings = CacheSettings::from_toml_str(
            r#"
            [forever]
            enabled = true
            store = "redis"

            [duplicates]
            prefix = "dupes"
            "#,
        )
        .unwrap();
        assert!(settings.forever.enabled);
        assert_eq!(settings.forever.store, "redis");
        assert_eq!(settings.forever.prefix, "cache.all_query");
        assert!(!settings.duplicates.enabled);
        assert_eq!(settings.duplicates.store, "array");
        assert_eq!(settings.duplicates.prefix, "dupes");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = CacheSettings::from_toml_str("[forever]\nttl = 3\n").unwrap_err();
        assert!(matches!(err, QcacheError::Config(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_invalid_store_name_rejected() {
        let err = CacheSettings::from_toml_str("[forever]\nstore = \"a:b\"\n").unwrap_err();
        assert!(matches!(
            err,
            QcacheError::Config(ConfigError::InvalidValue { ref field, .. })
                if field == "forever.store"
        ));

        let err = CacheSettings::from_toml_str("[duplicates]\nprefix = \"  \"\n").unwrap_err();
        assert!(matches!(err, QcacheError::Config(ConfigError::MissingRequired { .. })));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[duplicates]\nenabled = true").unwrap();
        let settings = CacheSettings::from_path(file.path()).unwrap();
        assert!(settings.duplicates.enabled);
        assert!(!settings.forever.enabled);

        let err = CacheSettings::from_path(Path::new("/nonexistent/qcache.toml")).unwrap_err();
        assert!(matches!(err, QcacheError::Config(ConfigError::Io { .. })));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("QCACHE_FOREVER_ENABLED", "true"),
            ("QCACHE_FOREVER_STORE", "redis"),
            ("QCACHE_DUPLICATES_ENABLED", "0"),
            ("QCACHE_DUPLICATES_PREFIX", "dq"),
        ]
        .into_iter()
        .collect();
        let settings =
            CacheSettings::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert!(settings.forever.enabled);
        assert_eq!(settings.forever.store, "redis");
        assert_eq!(settings.forever.prefix, DEFAULT_FOREVER_PREFIX);
        assert!(!settings.duplicates.enabled);
        assert_eq!(settings.duplicates.prefix, "dq");
    }

    #[test]
    fn test_from_lookup_rejects_bad_bool() {
        let err = CacheSettings::from_lookup(|name| {
            (name == "QCACHE_FOREVER_ENABLED").then(|| "maybe".to_string())
        })
        .unwrap_err();
        assert!(matches!(
            err,
            QcacheError::Config(ConfigError::InvalidValue { ref field, .. })
                if field == "QCACHE_FOREVER_ENABLED"
        ));
    }

    #[test]
    fn test_builders() {
        let settings = CacheSettings::default().with_policy(
            CachePolicyKind::CacheAllForever,
            PolicySettings::enabled(CachePolicyKind::CacheAllForever)
                .with_store("redis")
                .with_prefix("q"),
        );
        assert!(settings.policy(CachePolicyKind::CacheAllForever).enabled);
        assert_eq!(settings.policy(CachePolicyKind::CacheAllForever).store, "redis");
        assert_eq!(settings.policy(CachePolicyKind::CacheAllForever).prefix, "q");
        assert!(!settings.policy(CachePolicyKind::CacheDuplicatesOnce).enabled);
    }
}
