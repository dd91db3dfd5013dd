//! Document store port.
//!
//! Forum data lives in a hierarchical document store: every document is a JSON
//! object addressed by a [`DocPath`] (`collection/id`, where the collection may
//! itself be nested under another document, e.g. `posts/{id}/comments`).
//! Services talk to the store exclusively through [`DocumentStore`] and
//! [`StoreTransaction`]; the concrete backends are [`MemoryStore`] and
//! [`PgDocumentStore`].

pub mod memory;
pub mod postgres;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::error::{AppError, Result};

pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("transaction conflict on {0}")]
    Conflict(String),

    #[error("document {0} does not exist")]
    Missing(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("document encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Address of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocPath {
    collection: String,
    id: String,
}

impl DocPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Parses a full key such as `posts/abc/comments/def`.
    pub fn parse(key: &str) -> Option<Self> {
        let (collection, id) = key.rsplit_once('/')?;
        if collection.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self::new(collection, id))
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }

    /// Path of a sub-collection nested under this document.
    pub fn subcollection(&self, name: &str) -> String {
        format!("{}/{}/{}", self.collection, self.id, name)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A stored document together with the version it was read at.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: DocPath,
    pub data: Value,
    pub version: u64,
}

impl Document {
    pub fn id(&self) -> &str {
        self.path.id()
    }

    /// Decodes the document, exposing its id as an `id` field.
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        let mut data = match &self.data {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        data.entry("id")
            .or_insert_with(|| Value::String(self.path.id().to_string()));
        Ok(serde_json::from_value(Value::Object(data))?)
    }

    /// Reads an integer field, treating a missing or malformed value as zero.
    pub fn int_field(&self, field: &str) -> i64 {
        self.data.get(field).and_then(Value::as_i64).unwrap_or(0)
    }
}

/// Encodes a model as document data. The id lives in the path, not the body.
pub fn encode<T: Serialize>(value: &T) -> StoreResult<Value> {
    let mut data = serde_json::to_value(value)?;
    if let Value::Object(map) = &mut data {
        map.remove("id");
    }
    Ok(data)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    ArrayContains(String, Value),
}

impl Filter {
    fn matches(&self, data: &Value) -> bool {
        match self {
            Filter::Eq(field, expected) => data.get(field) == Some(expected),
            Filter::ArrayContains(field, expected) => data
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(expected)),
        }
    }
}

/// Filtered, ordered and limited query over one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(field.to_string(), value.into()));
        self
    }

    pub fn array_contains(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters
            .push(Filter::ArrayContains(field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, data: &Value) -> bool {
        self.filters.iter().all(|filter| filter.matches(data))
    }

    /// Filters, sorts and truncates documents already loaded from a collection.
    pub fn apply(&self, docs: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut docs: Vec<Document> = docs.into_iter().filter(|d| self.matches(&d.data)).collect();

        if let Some((field, direction)) = &self.order_by {
            docs.sort_by(|a, b| {
                let ordering = compare_values(a.data.get(field), b.data.get(field));
                match direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
        docs
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Merge-upsert: sets `fields`, sets `defaults` only when absent, and adds
/// `increments` to numeric fields (missing fields count as zero).
#[derive(Debug, Clone, Default)]
pub struct MergeWrite {
    pub fields: Map<String, Value>,
    pub defaults: Map<String, Value>,
    pub increments: Vec<(String, i64)>,
}

impl MergeWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn set_if_absent(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.defaults.insert(field.to_string(), value.into());
        self
    }

    pub fn increment(mut self, field: &str, by: i64) -> Self {
        self.increments.push((field.to_string(), by));
        self
    }

    /// Applies this write on top of an existing (possibly empty) document.
    pub fn apply_to(&self, existing: Option<&Value>) -> Value {
        let mut data = match existing {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        for (field, value) in &self.defaults {
            data.entry(field.clone()).or_insert_with(|| value.clone());
        }
        for (field, value) in &self.fields {
            data.insert(field.clone(), value.clone());
        }
        for (field, by) in &self.increments {
            let current = data.get(field).and_then(Value::as_i64).unwrap_or(0);
            data.insert(field.clone(), Value::from(current + by));
        }
        Value::Object(data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Upserted,
    Deleted,
}

/// Push notification emitted after every committed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub path: DocPath,
    pub kind: ChangeKind,
}

/// Buffered write inside a transaction.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Set(Value),
    Update(Map<String, Value>),
    Delete,
}

/// Read set and write buffer shared by the transaction implementations.
#[derive(Debug, Default)]
pub(crate) struct TxState {
    pub reads: HashMap<DocPath, Option<u64>>,
    pub writes: Vec<(DocPath, WriteOp)>,
}

impl TxState {
    pub fn record_read(&mut self, path: &DocPath, version: Option<u64>) {
        self.reads.entry(path.clone()).or_insert(version);
    }

    pub fn take(&mut self) -> TxState {
        std::mem::take(self)
    }

    pub fn change_events(writes: &[(DocPath, WriteOp)]) -> Vec<ChangeEvent> {
        writes
            .iter()
            .map(|(path, op)| ChangeEvent {
                path: path.clone(),
                kind: match op {
                    WriteOp::Delete => ChangeKind::Deleted,
                    _ => ChangeKind::Upserted,
                },
            })
            .collect()
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>>;

    async fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>>;

    /// Adds a document under an auto-generated id.
    async fn create(&self, collection: &str, data: Value) -> StoreResult<DocPath>;

    async fn merge(&self, path: &DocPath, write: MergeWrite) -> StoreResult<()>;

    async fn delete(&self, path: &DocPath) -> StoreResult<()>;

    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    /// Subscribes to committed changes.
    fn changes(&self) -> broadcast::Receiver<ChangeEvent>;

    fn max_transaction_attempts(&self) -> u32;

    fn new_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

/// Optimistic transaction: reads observe committed state and record versions,
/// writes are buffered until `commit`, which fails with
/// [`StoreError::Conflict`] if any read document changed in the meantime.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn get(&mut self, path: &DocPath) -> StoreResult<Option<Document>>;

    fn set(&mut self, path: &DocPath, data: Value);

    /// Merges top-level fields into an existing document.
    fn update(&mut self, path: &DocPath, fields: Map<String, Value>);

    fn delete(&mut self, path: &DocPath);

    async fn commit(&mut self) -> StoreResult<()>;
}

/// Work executed inside [`run_transaction`]. The body may run several times,
/// so it must not have side effects outside the transaction.
#[async_trait]
pub trait TransactionBody: Send + Sync {
    type Output: Send;

    async fn run(&self, tx: &mut dyn StoreTransaction) -> Result<Self::Output>;
}

/// Runs `body` in a fresh transaction, retrying on commit conflicts up to the
/// store's attempt budget. Errors returned by the body abort without writing.
pub async fn run_transaction<B: TransactionBody>(
    store: &dyn DocumentStore,
    body: &B,
) -> Result<B::Output> {
    let attempts = store.max_transaction_attempts().max(1);

    for attempt in 1..=attempts {
        let mut tx = store.begin().await?;
        let output = body.run(&mut *tx).await?;

        match tx.commit().await {
            Ok(()) => return Ok(output),
            Err(StoreError::Conflict(path)) => {
                tracing::debug!(attempt, %path, "transaction conflict, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(AppError::Transient(format!(
        "transaction aborted after {} attempts due to contention",
        attempts
    )))
}

/// Deletes every document of a collection, returning how many were removed.
pub async fn delete_collection(store: &dyn DocumentStore, collection: &str) -> Result<usize> {
    let docs = store.query(collection, &Query::new()).await?;
    let count = docs.len();
    futures::future::try_join_all(docs.iter().map(|doc| store.delete(&doc.path))).await?;
    Ok(count)
}
