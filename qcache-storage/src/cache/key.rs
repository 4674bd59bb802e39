//! Deterministic cache keys for query results.
//!
//! A key is derived from the SQL text, the ordered bindings and, for
//! versioned policies, the collection version. The inputs are first
//! written into a tagged, length-prefixed byte encoding that is injective
//! (two distinct inputs never encode to the same bytes), then hashed with
//! SHA-256 to keep keys short.
//!
//! # Binary Format
//!
//! ```text
//! [FORMAT: u8]
//! [sql: len u64 BE][sql bytes]
//! [binding count: u64 BE][binding]*
//! [version flag: u8][version: i64 BE if flag == 1]
//! ```
//!
//! Each binding starts with a one-byte type tag followed by a fixed-width
//! or length-prefixed payload, so no payload can be mistaken for the next
//! field.

use qcache_core::{BindingValue, CacheError, QcacheResult};
use sha2::{Digest, Sha256};

/// Encoding format revision. Bumping it orphans every previously issued key.
const FORMAT: u8 = 1;

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_UINT: u8 = 0x03;
const TAG_FLOAT: u8 = 0x04;
const TAG_TEXT: u8 = 0x05;
const TAG_BYTES: u8 = 0x06;
const TAG_UUID: u8 = 0x07;
const TAG_TIMESTAMP: u8 = 0x08;
const TAG_LIST: u8 = 0x09;
const TAG_JSON_NULL: u8 = 0x10;
const TAG_JSON_BOOL: u8 = 0x11;
const TAG_JSON_NUMBER: u8 = 0x12;
const TAG_JSON_STRING: u8 = 0x13;
const TAG_JSON_ARRAY: u8 = 0x14;
const TAG_JSON_OBJECT: u8 = 0x15;

/// An opaque cache key: `<prefix>:<hex sha256>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds keys under one policy prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyBuilder {
    prefix: String,
}

impl CacheKeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key for an unversioned query.
    pub fn build_key(&self, sql: &str, bindings: &[BindingValue]) -> QcacheResult<CacheKey> {
        self.finish(&encode(sql, bindings, None)?)
    }

    /// Key for a query under a specific collection version.
    pub fn build_versioned_key(
        &self,
        sql: &str,
        bindings: &[BindingValue],
        version: i64,
    ) -> QcacheResult<CacheKey> {
        self.finish(&encode(sql, bindings, Some(version))?)
    }

    fn finish(&self, encoded: &[u8]) -> QcacheResult<CacheKey> {
        let digest = Sha256::digest(encoded);
        Ok(CacheKey(format!("{}:{}", self.prefix, hex::encode(digest))))
    }
}

/// Canonical encoding of a (sql, bindings, version) triple.
pub fn encode(sql: &str, bindings: &[BindingValue], version: Option<i64>) -> QcacheResult<Vec<u8>> {
    let mut out = Vec::with_capacity(32 + sql.len() + bindings.len() * 16);
    out.push(FORMAT);
    put_bytes(&mut out, sql.as_bytes());
    put_len(&mut out, bindings.len());
    for (position, binding) in bindings.iter().enumerate() {
        encode_binding(&mut out, binding)
            .map_err(|reason| CacheError::serialization(format!("binding {position}: {reason}")))?;
    }
    match version {
        None => out.push(0),
        Some(v) => {
            out.push(1);
            out.extend_from_slice(&v.to_be_bytes());
        }
    }
    Ok(out)
}

fn put_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u64).to_be_bytes());
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    put_len(out, bytes.len());
    out.extend_from_slice(bytes);
}

fn encode_binding(out: &mut Vec<u8>, value: &BindingValue) -> Result<(), String> {
    match value {
        BindingValue::Null => out.push(TAG_NULL),
        BindingValue::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*b));
        }
        BindingValue::Int(n) => {
            out.push(TAG_INT);
            out.extend_from_slice(&n.to_be_bytes());
        }
        BindingValue::UInt(n) => {
            out.push(TAG_UINT);
            out.extend_from_slice(&n.to_be_bytes());
        }
        BindingValue::Float(f) => {
            if !f.is_finite() {
                return Err(format!("non-finite float {f} has no canonical form"));
            }
            // 0.0 == -0.0, so they must share a key
            let canonical = if *f == 0.0 { 0.0f64 } else { *f };
            out.push(TAG_FLOAT);
            out.extend_from_slice(&canonical.to_bits().to_be_bytes());
        }
        BindingValue::Text(s) => {
            out.push(TAG_TEXT);
            put_bytes(out, s.as_bytes());
        }
        BindingValue::Bytes(b) => {
            out.push(TAG_BYTES);
            put_bytes(out, b);
        }
        BindingValue::Uuid(id) => {
            out.push(TAG_UUID);
            out.extend_from_slice(id.as_bytes());
        }
        BindingValue::Timestamp(ts) => {
            out.push(TAG_TIMESTAMP);
            out.extend_from_slice(&ts.timestamp().to_be_bytes());
            out.extend_from_slice(&ts.timestamp_subsec_nanos().to_be_bytes());
        }
        BindingValue::List(items) => {
            out.push(TAG_LIST);
            put_len(out, items.len());
            for item in items {
                encode_binding(out, item)?;
            }
        }
        BindingValue::Json(json) => encode_json(out, json),
    }
    Ok(())
}

fn encode_json(out: &mut Vec<u8>, value: &serde_json::Value) {
    use serde_json::Value;

    match value {
        Value::Null => out.push(TAG_JSON_NULL),
        Value::Bool(b) => {
            out.push(TAG_JSON_BOOL);
            out.push(u8::from(*b));
        }
        Value::Number(n) => {
            out.push(TAG_JSON_NUMBER);
            put_bytes(out, n.to_string().as_bytes());
        }
        Value::String(s) => {
            out.push(TAG_JSON_STRING);
            put_bytes(out, s.as_bytes());
        }
        Value::Array(items) => {
            out.push(TAG_JSON_ARRAY);
            put_len(out, items.len());
            for item in items {
                encode_json(out, item);
            }
        }
        Value::Object(map) => {
            out.push(TAG_JSON_OBJECT);
            put_len(out, map.len());
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (key, item) in entries {
                put_bytes(out, key.as_bytes());
                encode_json(out, item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use qcache_core::QcacheError;
    use serde_json::json;
    use uuid::Uuid;

    fn builder() -> CacheKeyBuilder {
        CacheKeyBuilder::new("cache.all_query")
    }

    #[test]
    fn test_key_format() {
        let key = builder().build_key("select 1", &[]).unwrap();
        let (prefix, digest) = key.as_str().split_once(':').unwrap();
        assert_eq!(prefix, "cache.all_query");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_deterministic() {
        let bindings = vec![BindingValue::Int(1), BindingValue::from("a")];
        let a = builder().build_key("select * from t where a = ? and b = ?", &bindings).unwrap();
        let b = builder().build_key("select * from t where a = ? and b = ?", &bindings).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_binding_order_matters() {
        let sql = "select * from t where a = ? and b = ?";
        let a = builder()
            .build_key(sql, &[BindingValue::Int(1), BindingValue::Int(2)])
            .unwrap();
        let b = builder()
            .build_key(sql, &[BindingValue::Int(2), BindingValue::Int(1)])
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_types_are_distinguished() {
        let sql = "select ?";
        let keys: Vec<CacheKey> = [
            BindingValue::Int(1),
            BindingValue::UInt(1),
            BindingValue::Float(1.0),
            BindingValue::Text("1".to_string()),
            BindingValue::Bool(true),
            BindingValue::Json(json!(1)),
        ]
        .iter()
        .map(|b| builder().build_key(sql, std::slice::from_ref(b)).unwrap())
        .collect();
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_no_concatenation_ambiguity() {
        // "ab" + "c" vs "a" + "bc"
        let a = encode("q", &["ab".into(), "c".into()], None).unwrap();
        let b = encode("q", &["a".into(), "bc".into()], None).unwrap();
        assert_ne!(a, b);

        // Text moved between sql and bindings
        let a = encode("select ?x", &[], None).unwrap();
        let b = encode("select ?", &["x".into()], None).unwrap();
        assert_ne!(a, b);

        // Nested list boundaries
        let a = encode(
            "q",
            &[BindingValue::List(vec![1.into(), 2.into()]), BindingValue::List(vec![])],
            None,
        )
        .unwrap();
        let b = encode(
            "q",
            &[BindingValue::List(vec![1.into()]), BindingValue::List(vec![2.into()])],
            None,
        )
        .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_version_changes_key() {
        let sql = "select * from users";
        let plain = builder().build_key(sql, &[]).unwrap();
        let v1 = builder().build_versioned_key(sql, &[], 1).unwrap();
        let v2 = builder().build_versioned_key(sql, &[], 2).unwrap();
        assert_ne!(plain, v1);
        assert_ne!(v1, v2);
        assert_eq!(v2, builder().build_versioned_key(sql, &[], 2).unwrap());
    }

    #[test]
    fn test_prefix_changes_key() {
        let a = CacheKeyBuilder::new("a").build_key("q", &[]).unwrap();
        let b = CacheKeyBuilder::new("b").build_key("q", &[]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_json_object_key_order_irrelevant() {
        let a: serde_json::Value = serde_json::from_str(r#"{"x":1,"y":[true,null]}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"y":[true,null],"x":1}"#).unwrap();
        assert_eq!(
            builder().build_key("q", &[a.into()]).unwrap(),
            builder().build_key("q", &[b.into()]).unwrap()
        );
    }

    #[test]
    fn test_signed_zero_shares_key() {
        assert_eq!(
            builder().build_key("q", &[BindingValue::Float(0.0)]).unwrap(),
            builder().build_key("q", &[BindingValue::Float(-0.0)]).unwrap()
        );
    }

    #[test]
    fn test_non_finite_float_rejected() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = builder()
                .build_key("q", &[BindingValue::Int(1), BindingValue::Float(value)])
                .unwrap_err();
            match err {
                QcacheError::Cache(CacheError::Serialization { reason }) => {
                    assert!(reason.starts_with("binding 1"), "{reason}");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        let nested = BindingValue::List(vec![BindingValue::Float(f64::NAN)]);
        assert!(builder().build_key("q", &[nested]).is_err());
    }

    #[test]
    fn test_rich_types() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let id = Uuid::from_u128(42);
        let a = builder()
            .build_key("q", &[ts.into(), id.into(), vec![1u8, 2].into(), BindingValue::Null])
            .unwrap();
        let b = builder()
            .build_key(
                "q",
                &[
                    (ts + chrono::Duration::nanoseconds(1)).into(),
                    id.into(),
                    vec![1u8, 2].into(),
                    BindingValue::Null,
                ],
            )
            .unwrap();
        assert_ne!(a, b);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn binding_strategy() -> impl Strategy<Value = BindingValue> {
        let leaf = prop_oneof![
            Just(BindingValue::Null),
            any::<bool>().prop_map(BindingValue::Bool),
            any::<i64>().prop_map(BindingValue::Int),
            any::<u64>().prop_map(BindingValue::UInt),
            (-1.0e12f64..1.0e12f64).prop_map(BindingValue::Float),
            ".{0,12}".prop_map(BindingValue::Text),
            proptest::collection::vec(any::<u8>(), 0..12).prop_map(BindingValue::Bytes),
            any::<[u8; 16]>().prop_map(|b| BindingValue::Uuid(uuid::Uuid::from_bytes(b))),
        ];
        leaf.prop_recursive(2, 16, 4, |inner| {
            proptest::collection::vec(inner, 0..4).prop_map(BindingValue::List)
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Property: equal inputs always yield equal keys.
        #[test]
        fn prop_key_is_deterministic(
            sql in ".{0,40}",
            bindings in proptest::collection::vec(binding_strategy(), 0..6),
        ) {
            let builder = CacheKeyBuilder::new("p");
            let a = builder.build_key(&sql, &bindings).expect("finite bindings encode");
            let b = builder.build_key(&sql, &bindings.clone()).expect("finite bindings encode");
            prop_assert_eq!(a, b);
        }

        /// Property: distinct inputs have distinct encodings.
        #[test]
        fn prop_encoding_is_injective(
            sql1 in "[a-c ?]{0,6}",
            sql2 in "[a-c ?]{0,6}",
            b1 in proptest::collection::vec(binding_strategy(), 0..3),
            b2 in proptest::collection::vec(binding_strategy(), 0..3),
            v1 in proptest::option::of(0i64..3),
            v2 in proptest::option::of(0i64..3),
        ) {
            let e1 = encode(&sql1, &b1, v1).expect("finite bindings encode");
            let e2 = encode(&sql2, &b2, v2).expect("finite bindings encode");
            if sql1 == sql2 && b1 == b2 && v1 == v2 {
                prop_assert_eq!(e1, e2);
            } else {
                prop_assert_ne!(e1, e2);
            }
        }

        /// Property: changing a single bound value changes the key.
        #[test]
        fn prop_single_value_change_changes_key(
            bindings in proptest::collection::vec(any::<i64>(), 1..6),
            index in any::<prop::sample::Index>(),
        ) {
            let builder = CacheKeyBuilder::new("p");
            let original: Vec<BindingValue> =
                bindings.iter().copied().map(BindingValue::Int).collect();
            let mut changed = original.clone();
            let i = index.index(changed.len());
            changed[i] = BindingValue::Int(bindings[i].wrapping_add(1));

            prop_assert_ne!(
                builder.build_key("q", &original).expect("encode"),
                builder.build_key("q", &changed).expect("encode")
            );
        }

        /// Property: every version yields its own key.
        #[test]
        fn prop_version_bump_changes_key(version in any::<i64>()) {
            let builder = CacheKeyBuilder::new("p");
            let next = version.wrapping_add(1);
            prop_assert_ne!(
                builder.build_versioned_key("q", &[], version).expect("encode"),
                builder.build_versioned_key("q", &[], next).expect("encode")
            );
        }
    }
}
