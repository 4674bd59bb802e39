//! Typed parameter bindings for SQL text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A value bound to a query placeholder.
///
/// Every variant has a canonical byte encoding (see the key builder), so
/// equal bindings always produce equal cache keys and distinct bindings
/// never share one. The only values rejected during key building are
/// non-finite floats, which have no single canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BindingValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    List(Vec<BindingValue>),
    /// Structured value (e.g. a JSON column). Object keys are encoded in
    /// sorted order.
    Json(serde_json::Value),
}

impl BindingValue {
    /// Short type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            BindingValue::Null => "null",
            BindingValue::Bool(_) => "bool",
            BindingValue::Int(_) => "int",
            BindingValue::UInt(_) => "uint",
            BindingValue::Float(_) => "float",
            BindingValue::Text(_) => "text",
            BindingValue::Bytes(_) => "bytes",
            BindingValue::Uuid(_) => "uuid",
            BindingValue::Timestamp(_) => "timestamp",
            BindingValue::List(_) => "list",
            BindingValue::Json(_) => "json",
        }
    }
}

impl From<bool> for BindingValue {
    fn from(v: bool) -> Self {
        BindingValue::Bool(v)
    }
}

impl From<i32> for BindingValue {
    fn from(v: i32) -> Self {
        BindingValue::Int(i64::from(v))
    }
}

impl From<i64> for BindingValue {
    fn from(v: i64) -> Self {
        BindingValue::Int(v)
    }
}

impl From<u64> for BindingValue {
    fn from(v: u64) -> Self {
        BindingValue::UInt(v)
    }
}

impl From<f64> for BindingValue {
    fn from(v: f64) -> Self {
        BindingValue::Float(v)
    }
}

impl From<&str> for BindingValue {
    fn from(v: &str) -> Self {
        BindingValue::Text(v.to_string())
    }
}

impl From<String> for BindingValue {
    fn from(v: String) -> Self {
        BindingValue::Text(v)
    }
}

impl From<Vec<u8>> for BindingValue {
    fn from(v: Vec<u8>) -> Self {
        BindingValue::Bytes(v)
    }
}

impl From<Uuid> for BindingValue {
    fn from(v: Uuid) -> Self {
        BindingValue::Uuid(v)
    }
}

impl From<DateTime<Utc>> for BindingValue {
    fn from(v: DateTime<Utc>) -> Self {
        BindingValue::Timestamp(v)
    }
}

impl From<serde_json::Value> for BindingValue {
    fn from(v: serde_json::Value) -> Self {
        BindingValue::Json(v)
    }
}

impl<T: Into<BindingValue>> From<Option<T>> for BindingValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(BindingValue::Null)
    }
}
