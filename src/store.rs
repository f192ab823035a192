// Abstract ledger store + in-memory reference backend
//
// Every engine talks to persistence through `LedgerStore`: point reads,
// field-level patches, atomic counters and exact-match queries over named
// collections of JSON documents. No engine bypasses it.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// A stored document together with its collection-unique id.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn decode<T: DeserializeOwned>(self) -> serde_json::Result<T> {
        serde_json::from_value(self.data)
    }
}

/// Exact-match field filter. Conjunction when passed as a slice.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            value: value.into(),
        }
    }
}

/// Precondition evaluated atomically with a conditional write.
///
/// Field names may use dotted paths into nested objects
/// (`"special-1.purchased"`).
#[derive(Debug, Clone)]
pub enum Guard {
    /// Field equals the given value.
    Eq(String, Value),
    /// Numeric field is >= the given bound.
    AtLeast(String, i64),
    /// Numeric field is strictly less than another numeric field
    /// of the same document.
    LtField(String, String),
}

impl Guard {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Guard::Eq(field.to_string(), value.into())
    }

    pub fn at_least(field: &str, bound: i64) -> Self {
        Guard::AtLeast(field.to_string(), bound)
    }

    pub fn lt_field(field: &str, other: &str) -> Self {
        Guard::LtField(field.to_string(), other.to_string())
    }
}

/// Abstract transactional key-value/document store.
///
/// Each method is a single atomic round trip; nothing here spans documents
/// or collections. The conditional writes (`patch_if`, `increment_if`) are
/// the only mutual-exclusion primitives the engines get, and `create` is
/// the only uniqueness primitive.
#[allow(async_fn_in_trait)]
pub trait LedgerStore: Send + Sync {
    /// Monotonic server-assigned timestamp.
    fn server_time(&self) -> DateTime<Utc>;

    /// Insert with caller-chosen id; fails with `AlreadyExists` if taken.
    async fn create(&self, coll: &str, id: &str, doc: Value) -> StoreResult<()>;

    /// Insert with a generated id, which is returned.
    async fn insert(&self, coll: &str, doc: Value) -> StoreResult<String>;

    /// Point read.
    async fn get(&self, coll: &str, id: &str) -> StoreResult<Option<Value>>;

    /// Field-level merge patch. `fields` is an object whose keys are
    /// (possibly dotted) field paths.
    async fn patch(&self, coll: &str, id: &str, fields: Value) -> StoreResult<()>;

    /// Apply `fields` only if `guard` holds, atomically. Returns whether
    /// the patch was applied.
    async fn patch_if(&self, coll: &str, id: &str, guard: Guard, fields: Value)
        -> StoreResult<bool>;

    /// Atomically add `delta` to a numeric field (missing counts as 0) and
    /// return the new value.
    async fn increment(&self, coll: &str, id: &str, field: &str, delta: i64) -> StoreResult<i64>;

    /// Atomically add `delta` to a numeric field only if `guard` holds.
    /// Returns whether the increment was applied. Guard and write happen in
    /// one round trip; this is what keeps inventory from overselling and
    /// balances from going negative under concurrent requests.
    async fn increment_if(
        &self,
        coll: &str,
        id: &str,
        field: &str,
        delta: i64,
        guard: Guard,
    ) -> StoreResult<bool>;

    /// All documents matching every filter. No joins, no ordering.
    async fn query(&self, coll: &str, filters: &[Filter]) -> StoreResult<Vec<Document>>;

    /// Like `query`, ordered by a single field.
    async fn query_ordered(
        &self,
        coll: &str,
        filters: &[Filter],
        order_field: &str,
        descending: bool,
    ) -> StoreResult<Vec<Document>>;
}

fn path_get<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = doc;
    for part in path.split('.') {
        cur = cur.get(part)?;
    }
    Some(cur)
}

fn path_set(doc: &mut Value, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            if let Value::Object(map) = doc {
                map.insert(path.to_string(), value);
            }
        }
        Some((head, rest)) => {
            if let Value::Object(map) = doc {
                let child = map
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Object(Default::default()));
                path_set(child, rest, value);
            }
        }
    }
}

fn path_i64(doc: &Value, path: &str) -> i64 {
    path_get(doc, path).and_then(Value::as_i64).unwrap_or(0)
}

fn guard_holds(doc: &Value, guard: &Guard) -> bool {
    match guard {
        Guard::Eq(field, value) => path_get(doc, field).unwrap_or(&Value::Null) == value,
        Guard::AtLeast(field, bound) => path_i64(doc, field) >= *bound,
        Guard::LtField(field, other) => path_i64(doc, field) < path_i64(doc, other),
    }
}

fn apply_fields(doc: &mut Value, fields: &Value) {
    if let Value::Object(map) = fields {
        for (path, value) in map {
            path_set(doc, path, value.clone());
        }
    }
}

fn matches(doc: &Value, filters: &[Filter]) -> bool {
    filters
        .iter()
        .all(|f| path_get(doc, &f.field).unwrap_or(&Value::Null) == &f.value)
}

/// Loose ordering over JSON scalars, enough for timestamps (RFC 3339
/// strings) and numeric fields.
fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

enum Clock {
    System,
    Fixed(DateTime<Utc>),
}

/// In-memory `LedgerStore` backend.
///
/// The reference backend for tests and local runs. Locks are only held
/// inside a single trait call, never across awaits, so every operation is
/// atomic with respect to concurrent callers.
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    clock: Mutex<Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            clock: Mutex::new(Clock::System),
        }
    }

    /// Store whose `server_time` stays pinned at `start` until `advance`d.
    /// Used to simulate multi-day product lifecycles.
    pub fn frozen_at(start: DateTime<Utc>) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            clock: Mutex::new(Clock::Fixed(start)),
        }
    }

    /// Move the clock forward. A system clock becomes fixed at
    /// `now + delta`.
    pub fn advance(&self, delta: Duration) {
        let mut clock = self.clock.lock().expect("clock lock poisoned");
        let base = match *clock {
            Clock::System => Utc::now(),
            Clock::Fixed(t) => t,
        };
        *clock = Clock::Fixed(base + delta);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore for MemoryStore {
    fn server_time(&self) -> DateTime<Utc> {
        match *self.clock.lock().expect("clock lock poisoned") {
            Clock::System => Utc::now(),
            Clock::Fixed(t) => t,
        }
    }

    async fn create(&self, coll: &str, id: &str, doc: Value) -> StoreResult<()> {
        let mut colls = self.collections.write().expect("store lock poisoned");
        let coll_map = colls.entry(coll.to_string()).or_default();
        if coll_map.contains_key(id) {
            return Err(StoreError::AlreadyExists(coll.to_string(), id.to_string()));
        }
        coll_map.insert(id.to_string(), doc);
        Ok(())
    }

    async fn insert(&self, coll: &str, doc: Value) -> StoreResult<String> {
        let id = Uuid::new_v4().to_string();
        let mut colls = self.collections.write().expect("store lock poisoned");
        colls.entry(coll.to_string()).or_default().insert(id.clone(), doc);
        Ok(id)
    }

    async fn get(&self, coll: &str, id: &str) -> StoreResult<Option<Value>> {
        let colls = self.collections.read().expect("store lock poisoned");
        Ok(colls.get(coll).and_then(|m| m.get(id)).cloned())
    }

    async fn patch(&self, coll: &str, id: &str, fields: Value) -> StoreResult<()> {
        let mut colls = self.collections.write().expect("store lock poisoned");
        let doc = colls
            .get_mut(coll)
            .and_then(|m| m.get_mut(id))
            .ok_or_else(|| StoreError::NotFound(coll.to_string(), id.to_string()))?;
        apply_fields(doc, &fields);
        Ok(())
    }

    async fn patch_if(
        &self,
        coll: &str,
        id: &str,
        guard: Guard,
        fields: Value,
    ) -> StoreResult<bool> {
        let mut colls = self.collections.write().expect("store lock poisoned");
        let doc = colls
            .get_mut(coll)
            .and_then(|m| m.get_mut(id))
            .ok_or_else(|| StoreError::NotFound(coll.to_string(), id.to_string()))?;
        if !guard_holds(doc, &guard) {
            return Ok(false);
        }
        apply_fields(doc, &fields);
        Ok(true)
    }

    async fn increment(&self, coll: &str, id: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let mut colls = self.collections.write().expect("store lock poisoned");
        let doc = colls
            .get_mut(coll)
            .and_then(|m| m.get_mut(id))
            .ok_or_else(|| StoreError::NotFound(coll.to_string(), id.to_string()))?;
        let next = path_i64(doc, field) + delta;
        path_set(doc, field, Value::from(next));
        Ok(next)
    }

    async fn increment_if(
        &self,
        coll: &str,
        id: &str,
        field: &str,
        delta: i64,
        guard: Guard,
    ) -> StoreResult<bool> {
        let mut colls = self.collections.write().expect("store lock poisoned");
        let doc = colls
            .get_mut(coll)
            .and_then(|m| m.get_mut(id))
            .ok_or_else(|| StoreError::NotFound(coll.to_string(), id.to_string()))?;
        if !guard_holds(doc, &guard) {
            return Ok(false);
        }
        let next = path_i64(doc, field) + delta;
        path_set(doc, field, Value::from(next));
        Ok(true)
    }

    async fn query(&self, coll: &str, filters: &[Filter]) -> StoreResult<Vec<Document>> {
        let colls = self.collections.read().expect("store lock poisoned");
        let docs = colls
            .get(coll)
            .map(|m| {
                m.iter()
                    .filter(|(_, doc)| matches(doc, filters))
                    .map(|(id, doc)| Document {
                        id: id.clone(),
                        data: doc.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(docs)
    }

    async fn query_ordered(
        &self,
        coll: &str,
        filters: &[Filter],
        order_field: &str,
        descending: bool,
    ) -> StoreResult<Vec<Document>> {
        let mut docs = self.query(coll, filters).await?;
        docs.sort_by(|a, b| {
            let av = path_get(&a.data, order_field).unwrap_or(&Value::Null);
            let bv = path_get(&b.data, order_field).unwrap_or(&Value::Null);
            let ord = compare_values(av, bv);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
        Ok(docs)
    }
}
