//! Error types for qcache operations

use thiserror::Error;

/// Cache layer errors.
///
/// None of these ever surface as the failure of a caller's read or write:
/// the interceptor contains them and falls back to uncached execution or
/// to a full-store flush.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cannot build cache key: {reason}")]
    Serialization { reason: String },

    #[error("Cache store '{store}' unavailable during {operation}: {reason}")]
    BackendUnavailable {
        store: String,
        operation: String,
        reason: String,
    },

    #[error("Value under '{key}' in store '{store}' is not numeric")]
    NonNumericValue { store: String, key: String },
}

impl CacheError {
    /// Shorthand for a [`CacheError::BackendUnavailable`].
    pub fn unavailable(
        store: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::BackendUnavailable {
            store: store.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`CacheError::Serialization`].
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }
}

/// Relation metadata errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelationError {
    #[error("Relation metadata unavailable for {collection}: {reason}")]
    MetadataUnavailable { collection: String, reason: String },

    #[error("Malformed relation metadata for {collection}: {reason}")]
    Malformed { collection: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },
}

/// Errors raised by the underlying query execution path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Query against {collection} failed: {reason}")]
    Failed { collection: String, reason: String },
}

/// Master error type for all qcache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QcacheError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Relation error: {0}")]
    Relation(#[from] RelationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
}

impl QcacheError {
    /// Whether this is an expected failure of an external collaborator
    /// (backend or relation metadata) rather than a programming error.
    ///
    /// Only these failures may escalate a targeted invalidation into a
    /// full-store flush.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            QcacheError::Cache(CacheError::BackendUnavailable { .. })
                | QcacheError::Cache(CacheError::NonNumericValue { .. })
                | QcacheError::Relation(_)
        )
    }
}

/// Result type alias for qcache operations.
pub type QcacheResult<T> = Result<T, QcacheError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_display_backend_unavailable() {
        let err = CacheError::unavailable("redis", "increment", "connection refused");
        let msg = format!("{}", err);
        assert!(msg.contains("redis"));
        assert!(msg.contains("increment"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_cache_error_display_non_numeric() {
        let err = CacheError::NonNumericValue {
            store: "array".to_string(),
            key: "query_cache_version:p:users".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("not numeric"));
        assert!(msg.contains("query_cache_version:p:users"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "forever.store".to_string(),
            value: "a b".to_string(),
            reason: "must match [A-Za-z0-9_.-]+".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("forever.store"));
        assert!(msg.contains("a b"));
    }

    #[test]
    fn test_qcache_error_from_variants() {
        let cache = QcacheError::from(CacheError::serialization("NaN"));
        assert!(matches!(cache, QcacheError::Cache(_)));

        let relation = QcacheError::from(RelationError::Malformed {
            collection: "posts".to_string(),
            reason: "cycle".to_string(),
        });
        assert!(matches!(relation, QcacheError::Relation(_)));

        let config = QcacheError::from(ConfigError::Parse {
            reason: "eof".to_string(),
        });
        assert!(matches!(config, QcacheError::Config(_)));

        let execution = QcacheError::from(ExecutionError::Failed {
            collection: "users".to_string(),
            reason: "syntax".to_string(),
        });
        assert!(matches!(execution, QcacheError::Execution(_)));
    }

    #[test]
    fn test_backend_failure_classification() {
        let unavailable = CacheError::unavailable("array", "flush", "down");
        assert!(QcacheError::from(unavailable).is_backend_failure());
        assert!(QcacheError::from(RelationError::MetadataUnavailable {
            collection: "users".to_string(),
            reason: "timeout".to_string(),
        })
        .is_backend_failure());

        assert!(!QcacheError::from(CacheError::serialization("NaN")).is_backend_failure());
        assert!(!QcacheError::from(ConfigError::MissingRequired {
            field: "forever.store".to_string(),
        })
        .is_backend_failure());
        assert!(!QcacheError::from(ExecutionError::Failed {
            collection: "users".to_string(),
            reason: "boom".to_string(),
        })
        .is_backend_failure());
    }
}
