//! Read and write query descriptions handed to the interceptor.
//!
//! The data-access layer supplies SQL text, bindings and the collection;
//! the caller picks the caching policy. Nothing here infers policy from
//! the query itself.

use serde::{Deserialize, Serialize};

use crate::{BindingValue, CachePolicyKind, CollectionDescriptor};

/// A read (select) query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadQuery {
    pub sql: String,
    pub bindings: Vec<BindingValue>,
    pub collection: CollectionDescriptor,
    /// `None` executes the query uncached.
    pub policy: Option<CachePolicyKind>,
}

impl ReadQuery {
    /// An uncached read against `collection`.
    pub fn new(sql: impl Into<String>, collection: CollectionDescriptor) -> Self {
        Self {
            sql: sql.into(),
            bindings: Vec::new(),
            collection,
            policy: None,
        }
    }

    /// Append a positional binding.
    pub fn bind(mut self, value: impl Into<BindingValue>) -> Self {
        self.bindings.push(value.into());
        self
    }

    /// Replace all bindings.
    pub fn with_bindings(mut self, bindings: Vec<BindingValue>) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn with_policy(mut self, policy: Option<CachePolicyKind>) -> Self {
        self.policy = policy;
        self
    }

    pub fn cache_forever(self) -> Self {
        self.with_policy(Some(CachePolicyKind::CacheAllForever))
    }

    pub fn cache_duplicates(self) -> Self {
        self.with_policy(Some(CachePolicyKind::CacheDuplicatesOnce))
    }

    pub fn uncached(self) -> Self {
        self.with_policy(None)
    }
}

/// Kinds of mutation that invalidate a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WriteKind {
    Insert,
    Update,
    Delete,
    Truncate,
}

impl std::fmt::Display for WriteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteKind::Insert => write!(f, "insert"),
            WriteKind::Update => write!(f, "update"),
            WriteKind::Delete => write!(f, "delete"),
            WriteKind::Truncate => write!(f, "truncate"),
        }
    }
}

/// A write (insert/update/delete/truncate) query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteQuery {
    pub kind: WriteKind,
    pub sql: String,
    pub bindings: Vec<BindingValue>,
    pub collection: CollectionDescriptor,
}

impl WriteQuery {
    pub fn new(kind: WriteKind, sql: impl Into<String>, collection: CollectionDescriptor) -> Self {
        Self {
            kind,
            sql: sql.into(),
            bindings: Vec::new(),
            collection,
        }
    }

    pub fn insert(sql: impl Into<String>, collection: CollectionDescriptor) -> Self {
        Self::new(WriteKind::Insert, sql, collection)
    }

    pub fn update(sql: impl Into<String>, collection: CollectionDescriptor) -> Self {
        Self::new(WriteKind::Update, sql, collection)
    }

    pub fn delete(sql: impl Into<String>, collection: CollectionDescriptor) -> Self {
        Self::new(WriteKind::Delete, sql, collection)
    }

    pub fn truncate(collection: CollectionDescriptor) -> Self {
        let sql = format!("TRUNCATE {}", collection.name());
        Self::new(WriteKind::Truncate, sql, collection)
    }

    pub fn bind(mut self, value: impl Into<BindingValue>) -> Self {
        self.bindings.push(value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_query_builder() {
        let users = CollectionDescriptor::new("users");
        let query = ReadQuery::new("select * from users where id = ? and active = ?", users.clone())
            .bind(7)
            .bind(true)
            .cache_forever();
        assert_eq!(query.bindings, vec![BindingValue::Int(7), BindingValue::Bool(true)]);
        assert_eq!(query.policy, Some(CachePolicyKind::CacheAllForever));
        assert_eq!(query.collection, users);

        let query = query.cache_duplicates();
        assert_eq!(query.policy, Some(CachePolicyKind::CacheDuplicatesOnce));
        assert_eq!(query.uncached().policy, None);
    }

    #[test]
    fn test_optional_binding_maps_to_null() {
        let query = ReadQuery::new("select 1", CollectionDescriptor::new("t"))
            .bind(None::<i64>)
            .bind(Some("x"));
        assert_eq!(
            query.bindings,
            vec![BindingValue::Null, BindingValue::Text("x".to_string())]
        );
    }

    #[test]
    fn test_truncate_sql() {
        let query = WriteQuery::truncate(CollectionDescriptor::new("posts"));
        assert_eq!(query.kind, WriteKind::Truncate);
        assert_eq!(query.sql, "TRUNCATE posts");
        assert_eq!(WriteKind::Truncate.to_string(), "truncate");
    }
}
