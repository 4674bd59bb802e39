//! qcache Test Utilities
//!
//! Shared test infrastructure for the qcache workspace:
//! - Fault-injecting cache backend and relation provider
//! - Counting in-memory query executor
//! - Proptest generators for bindings and queries
//! - Fixtures and assertions for common scenarios

pub use qcache_core::{
    BindingValue, CacheError, CachePolicy, CachePolicyKind, CacheSettings, CacheTag,
    CollectionDescriptor, ExecutionError, PolicySettings, QcacheError, QcacheResult, ReadQuery,
    RelationEdge, RelationError, WriteKind, WriteQuery,
};
pub use qcache_storage::{
    CacheBackend, CacheOutcome, CacheRead, CacheStats, CacheValue, InMemoryCacheBackend,
    MutationExecutor, QueryFetcher, QueryInterceptor, RelationProvider, StaticRelationProvider,
};

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// FAULT-INJECTING BACKEND
// ============================================================================

/// Backend operations that can be recorded and failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    Get,
    Put,
    Increment,
    FlushTag,
    FlushStore,
    Stats,
}

impl BackendOp {
    pub fn name(self) -> &'static str {
        match self {
            BackendOp::Get => "get",
            BackendOp::Put => "put",
            BackendOp::Increment => "increment",
            BackendOp::FlushTag => "flush_tag",
            BackendOp::FlushStore => "flush_store",
            BackendOp::Stats => "stats",
        }
    }
}

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCall {
    pub op: BackendOp,
    pub store: String,
    /// Key or tag the call addressed, if any.
    pub target: Option<String>,
}

/// In-memory backend that records every call and fails chosen operations
/// with [`CacheError::BackendUnavailable`].
#[derive(Debug, Default)]
pub struct FaultyBackend {
    inner: InMemoryCacheBackend,
    failing: Mutex<HashSet<BackendOp>>,
    calls: Mutex<Vec<BackendCall>>,
}

impl FaultyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The healthy backend underneath, for seeding and inspection without
    /// recording calls.
    pub fn inner(&self) -> &InMemoryCacheBackend {
        &self.inner
    }

    /// Make every subsequent `op` fail.
    pub fn fail(&self, op: BackendOp) {
        self.failing.lock().unwrap().insert(op);
    }

    /// Builder form of [`fail`](Self::fail).
    pub fn failing(self, op: BackendOp) -> Self {
        self.fail(op);
        self
    }

    /// Stop failing `op`.
    pub fn heal(&self, op: BackendOp) {
        self.failing.lock().unwrap().remove(&op);
    }

    pub fn heal_all(&self) {
        self.failing.lock().unwrap().clear();
    }

    /// All calls recorded so far, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls of `op`, across stores.
    pub fn count(&self, op: BackendOp) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.op == op).count()
    }

    /// Number of recorded calls of `op` against `store`.
    pub fn count_in(&self, op: BackendOp, store: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.op == op && c.store == store)
            .count()
    }

    /// Number of calls that could invalidate something.
    pub fn invalidation_calls(&self) -> usize {
        self.count(BackendOp::Increment)
            + self.count(BackendOp::FlushTag)
            + self.count(BackendOp::FlushStore)
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, op: BackendOp, store: &str, target: Option<&str>) -> QcacheResult<()> {
        self.calls.lock().unwrap().push(BackendCall {
            op,
            store: store.to_string(),
            target: target.map(str::to_string),
        });
        if self.failing.lock().unwrap().contains(&op) {
            return Err(CacheError::unavailable(store, op.name(), "injected fault").into());
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for FaultyBackend {
    async fn get(&self, store: &str, key: &str) -> QcacheResult<Option<CacheValue>> {
        self.record(BackendOp::Get, store, Some(key))?;
        self.inner.get(store, key).await
    }

    async fn put(
        &self,
        store: &str,
        key: &str,
        value: CacheValue,
        tags: &[CacheTag],
        ttl: Option<Duration>,
    ) -> QcacheResult<()> {
        self.record(BackendOp::Put, store, Some(key))?;
        self.inner.put(store, key, value, tags, ttl).await
    }

    async fn increment(&self, store: &str, key: &str) -> QcacheResult<i64> {
        self.record(BackendOp::Increment, store, Some(key))?;
        self.inner.increment(store, key).await
    }

    async fn flush_tag(&self, store: &str, tag: &CacheTag) -> QcacheResult<u64> {
        self.record(BackendOp::FlushTag, store, Some(tag.as_str()))?;
        self.inner.flush_tag(store, tag).await
    }

    async fn flush_store(&self, store: &str) -> QcacheResult<u64> {
        self.record(BackendOp::FlushStore, store, None)?;
        self.inner.flush_store(store).await
    }

    async fn stats(&self, store: &str) -> QcacheResult<CacheStats> {
        self.record(BackendOp::Stats, store, None)?;
        self.inner.stats(store).await
    }
}

// ============================================================================
// SCRIPTED RELATIONS
// ============================================================================

/// Relation provider with declared edges that can be told to fail.
#[derive(Debug, Default)]
pub struct ScriptedRelationProvider {
    relations: StaticRelationProvider,
    failing: AtomicBool,
    lookups: AtomicUsize,
}

impl ScriptedRelationProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_static(relations: StaticRelationProvider) -> Self {
        Self {
            relations,
            ..Self::default()
        }
    }

    pub fn with_relation(mut self, source: &str, related: CollectionDescriptor) -> Self {
        self.relations.relate(source, related);
        self
    }

    /// Make every subsequent lookup fail with
    /// [`RelationError::MetadataUnavailable`].
    pub fn fail_lookups(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelationProvider for ScriptedRelationProvider {
    async fn relations_of(
        &self,
        collection: &CollectionDescriptor,
    ) -> QcacheResult<Vec<RelationEdge>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RelationError::MetadataUnavailable {
                collection: collection.name().to_string(),
                reason: "injected fault".to_string(),
            }
            .into());
        }
        self.relations.relations_of(collection).await
    }
}

// ============================================================================
// COUNTING EXECUTOR
// ============================================================================

/// Rows as returned by [`CountingExecutor`].
pub type Rows = Vec<serde_json::Value>;

/// In-memory "database" of JSON rows per collection that counts how often
/// it is actually queried.
///
/// Inserts append the write's bindings as one row, updates replace every
/// row with them, and deletes and truncates empty the collection.
#[derive(Debug, Default)]
pub struct CountingExecutor {
    tables: Mutex<HashMap<String, Rows>>,
    selects: AtomicUsize,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl CountingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `collection` with rows, bypassing the write path.
    pub fn seed(&self, collection: &str, rows: Rows) {
        self.tables.lock().unwrap().insert(collection.to_string(), rows);
    }

    pub fn rows(&self, collection: &str) -> Rows {
        self.tables
            .lock()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn selects(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent query fail with [`ExecutionError::Failed`].
    pub fn fail_queries(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn check(&self, collection: &CollectionDescriptor) -> QcacheResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ExecutionError::Failed {
                collection: collection.name().to_string(),
                reason: "injected fault".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl QueryFetcher<Rows> for CountingExecutor {
    async fn fetch(&self, query: &ReadQuery) -> QcacheResult<Rows> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        self.check(&query.collection)?;
        Ok(self.rows(query.collection.name()))
    }
}

#[async_trait]
impl MutationExecutor for CountingExecutor {
    async fn execute(&self, query: &WriteQuery) -> QcacheResult<u64> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check(&query.collection)?;

        let row = serde_json::to_value(&query.bindings).unwrap_or(serde_json::Value::Null);
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry(query.collection.name().to_string()).or_default();
        let affected = match query.kind {
            WriteKind::Insert => {
                table.push(row);
                1
            }
            WriteKind::Update => {
                for existing in table.iter_mut() {
                    *existing = row.clone();
                }
                table.len()
            }
            WriteKind::Delete | WriteKind::Truncate => {
                let removed = table.len();
                table.clear();
                removed
            }
        };
        Ok(affected as u64)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for bindings and queries.

    use super::*;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Any binding without nesting. Floats are always finite.
    pub fn arb_scalar_binding() -> impl Strategy<Value = BindingValue> {
        prop_oneof![
            Just(BindingValue::Null),
            any::<bool>().prop_map(BindingValue::Bool),
            any::<i64>().prop_map(BindingValue::Int),
            any::<u64>().prop_map(BindingValue::UInt),
            (-1.0e12f64..1.0e12f64).prop_map(BindingValue::Float),
            "[a-zA-Z0-9 _%']{0,24}".prop_map(BindingValue::Text),
            prop::collection::vec(any::<u8>(), 0..16).prop_map(BindingValue::Bytes),
            any::<[u8; 16]>().prop_map(|b| BindingValue::Uuid(Uuid::from_bytes(b))),
            arb_timestamp().prop_map(BindingValue::Timestamp),
        ]
    }

    /// Any binding, including one level of lists and flat JSON objects.
    pub fn arb_binding() -> impl Strategy<Value = BindingValue> {
        prop_oneof![
            4 => arb_scalar_binding(),
            1 => prop::collection::vec(arb_scalar_binding(), 0..4).prop_map(BindingValue::List),
            1 => prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..4).prop_map(|m| {
                BindingValue::Json(serde_json::Value::Object(
                    m.into_iter().map(|(k, v)| (k, serde_json::Value::from(v))).collect(),
                ))
            }),
        ]
    }

    pub fn arb_bindings() -> impl Strategy<Value = Vec<BindingValue>> {
        prop::collection::vec(arb_binding(), 0..6)
    }

    /// Timestamps with millisecond precision between 2000 and 2100.
    pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        (946_684_800_000i64..4_102_444_800_000i64)
            .prop_map(|ms| DateTime::from_timestamp_millis(ms).unwrap_or_default())
    }

    pub fn arb_collection_name() -> impl Strategy<Value = String> {
        "[a-z][a-z_]{0,15}"
    }

    pub fn arb_sql() -> impl Strategy<Value = String> {
        (arb_collection_name(), "[a-z_]{1,10}")
            .prop_map(|(table, column)| format!("select * from {table} where {column} = ?"))
    }

    pub fn arb_policy_kind() -> impl Strategy<Value = CachePolicyKind> {
        prop_oneof![
            Just(CachePolicyKind::CacheAllForever),
            Just(CachePolicyKind::CacheDuplicatesOnce),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built collections, relations and settings.

    use super::*;

    pub fn users() -> CollectionDescriptor {
        CollectionDescriptor::new("users")
    }

    pub fn posts() -> CollectionDescriptor {
        CollectionDescriptor::new("posts")
    }

    pub fn comments() -> CollectionDescriptor {
        CollectionDescriptor::new("comments")
    }

    /// Unrelated to every other fixture collection.
    pub fn tags() -> CollectionDescriptor {
        CollectionDescriptor::new("tags")
    }

    /// Related to `users` but not cache-enabled.
    pub fn audit_log() -> CollectionDescriptor {
        CollectionDescriptor::new("audit_log").not_cacheable()
    }

    /// `users -> posts`, `users -> audit_log` (not cacheable) and
    /// `posts -> comments`.
    pub fn blog_relations() -> StaticRelationProvider {
        StaticRelationProvider::new()
            .with_relation("users", posts())
            .with_relation("users", audit_log())
            .with_relation("posts", comments())
    }

    /// Both policies enabled on the default store.
    pub fn all_enabled() -> CacheSettings {
        CacheSettings::all_enabled()
    }

    /// Both policies enabled, each on its own store.
    pub fn split_stores() -> CacheSettings {
        CacheSettings::all_enabled()
            .with_policy(
                CachePolicyKind::CacheAllForever,
                PolicySettings::enabled(CachePolicyKind::CacheAllForever).with_store("forever"),
            )
            .with_policy(
                CachePolicyKind::CacheDuplicatesOnce,
                PolicySettings::enabled(CachePolicyKind::CacheDuplicatesOnce).with_store("dupes"),
            )
    }

    pub fn select_users() -> ReadQuery {
        ReadQuery::new("select * from users where active = ?", users()).bind(true)
    }

    pub fn insert_user(name: &str) -> WriteQuery {
        WriteQuery::insert("insert into users (name) values (?)", users()).bind(name)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over read outcomes and errors.

    use super::*;

    #[track_caller]
    pub fn assert_hit<T>(read: &CacheRead<T>) {
        assert_eq!(read.outcome(), CacheOutcome::Hit, "expected a cache hit");
    }

    #[track_caller]
    pub fn assert_miss<T>(read: &CacheRead<T>) {
        assert_eq!(read.outcome(), CacheOutcome::Miss, "expected a cache miss");
    }

    #[track_caller]
    pub fn assert_uncached<T>(read: &CacheRead<T>) {
        assert_eq!(read.outcome(), CacheOutcome::Uncached, "expected an uncached read");
    }

    /// Assert that a result failed with an escalating backend or relation
    /// error.
    #[track_caller]
    pub fn assert_backend_failure<T: std::fmt::Debug>(result: &QcacheResult<T>) {
        match result {
            Err(e) if e.is_backend_failure() => {}
            other => panic!("Expected backend failure, got: {:?}", other),
        }
    }

    /// Assert that a result failed while executing the query itself.
    #[track_caller]
    pub fn assert_execution_error<T: std::fmt::Debug>(result: &QcacheResult<T>) {
        match result {
            Err(QcacheError::Execution(_)) => {}
            other => panic!("Expected execution error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
