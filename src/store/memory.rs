use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use super::{
    ChangeEvent, DocPath, Document, DocumentStore, MergeWrite, Query, StoreError, StoreResult,
    StoreTransaction, TxState, WriteOp,
};

const CHANGE_BUFFER: usize = 1024;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
struct Entry {
    data: Value,
    version: u64,
}

#[derive(Debug, Default)]
struct State {
    docs: BTreeMap<DocPath, Entry>,
    clock: u64,
}

impl State {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn version_of(&self, path: &DocPath) -> Option<u64> {
        self.docs.get(path).map(|entry| entry.version)
    }

    fn document(&self, path: &DocPath) -> Option<Document> {
        self.docs.get(path).map(|entry| Document {
            path: path.clone(),
            data: entry.data.clone(),
            version: entry.version,
        })
    }
}

struct Inner {
    state: Mutex<State>,
    changes: broadcast::Sender<ChangeEvent>,
    max_attempts: u32,
}

impl Inner {
    // The guard is never held across an await point.
    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn publish(&self, events: Vec<ChangeEvent>) {
        for event in events {
            // No receivers is fine: nobody is subscribed yet.
            let _ = self.changes.send(event);
        }
    }
}

/// In-process document store with optimistic transactions.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_max_attempts(DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                changes,
                max_attempts,
            }),
        }
    }

    /// Number of documents currently stored under `prefix` (any depth).
    pub fn count_under(&self, prefix: &str) -> usize {
        self.inner
            .lock()
            .map(|state| {
                state
                    .docs
                    .keys()
                    .filter(|path| path.key().starts_with(prefix))
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>> {
        Ok(self.inner.lock()?.document(path))
    }

    async fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>> {
        let docs: Vec<Document> = {
            let state = self.inner.lock()?;
            let start = DocPath::new(collection, "");
            state
                .docs
                .range(start..)
                .take_while(|(path, _)| path.collection() == collection)
                .map(|(path, entry)| Document {
                    path: path.clone(),
                    data: entry.data.clone(),
                    version: entry.version,
                })
                .collect()
        };
        Ok(query.apply(docs))
    }

    async fn create(&self, collection: &str, data: Value) -> StoreResult<DocPath> {
        let path = DocPath::new(collection, self.new_id());
        {
            let mut state = self.inner.lock()?;
            let version = state.tick();
            state.docs.insert(path.clone(), Entry { data, version });
        }
        self.inner.publish(vec![ChangeEvent {
            path: path.clone(),
            kind: super::ChangeKind::Upserted,
        }]);
        Ok(path)
    }

    async fn merge(&self, path: &DocPath, write: MergeWrite) -> StoreResult<()> {
        {
            let mut state = self.inner.lock()?;
            let data = write.apply_to(state.docs.get(path).map(|entry| &entry.data));
            let version = state.tick();
            state.docs.insert(path.clone(), Entry { data, version });
        }
        self.inner.publish(vec![ChangeEvent {
            path: path.clone(),
            kind: super::ChangeKind::Upserted,
        }]);
        Ok(())
    }

    async fn delete(&self, path: &DocPath) -> StoreResult<()> {
        let removed = self.inner.lock()?.docs.remove(path).is_some();
        if removed {
            self.inner.publish(vec![ChangeEvent {
                path: path.clone(),
                kind: super::ChangeKind::Deleted,
            }]);
        }
        Ok(())
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            state: TxState::default(),
        }))
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.changes.subscribe()
    }

    fn max_transaction_attempts(&self) -> u32 {
        self.inner.max_attempts
    }
}

struct MemoryTransaction {
    inner: Arc<Inner>,
    state: TxState,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get(&mut self, path: &DocPath) -> StoreResult<Option<Document>> {
        let doc = self.inner.lock()?.document(path);
        self.state
            .record_read(path, doc.as_ref().map(|doc| doc.version));
        Ok(doc)
    }

    fn set(&mut self, path: &DocPath, data: Value) {
        self.state.writes.push((path.clone(), WriteOp::Set(data)));
    }

    fn update(&mut self, path: &DocPath, fields: Map<String, Value>) {
        self.state.writes.push((path.clone(), WriteOp::Update(fields)));
    }

    fn delete(&mut self, path: &DocPath) {
        self.state.writes.push((path.clone(), WriteOp::Delete));
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let TxState { reads, writes } = self.state.take();

        {
            let mut state = self.inner.lock()?;

            for (path, observed) in &reads {
                if state.version_of(path) != *observed {
                    return Err(StoreError::Conflict(path.key()));
                }
            }

            // Stage every write first so a failing update leaves nothing behind.
            let mut staged: HashMap<DocPath, Option<Value>> = HashMap::new();
            for (path, op) in &writes {
                let current = match staged.get(path) {
                    Some(value) => value.clone(),
                    None => state.docs.get(path).map(|entry| entry.data.clone()),
                };
                let next = match op {
                    WriteOp::Set(data) => Some(data.clone()),
                    WriteOp::Update(fields) => {
                        let Some(Value::Object(mut existing)) = current else {
                            return Err(StoreError::Missing(path.key()));
                        };
                        existing.extend(fields.clone());
                        Some(Value::Object(existing))
                    }
                    WriteOp::Delete => None,
                };
                staged.insert(path.clone(), next);
            }

            for (path, value) in staged {
                match value {
                    Some(data) => {
                        let version = state.tick();
                        state.docs.insert(path, Entry { data, version });
                    }
                    None => {
                        state.docs.remove(&path);
                    }
                }
            }
        }

        self.inner.publish(TxState::change_events(&writes));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChangeKind, Direction};
    use serde_json::json;

    #[tokio::test]
    async fn commit_detects_concurrent_writer() {
        let store = MemoryStore::new();
        let path = store.create("posts", json!({ "likesCount": 0 })).await.unwrap();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.get(&path).await.unwrap();
        second.get(&path).await.unwrap();

        let mut fields = Map::new();
        fields.insert("likesCount".into(), json!(1));
        first.update(&path, fields.clone());
        second.update(&path, fields);

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let stored = store.get(&path).await.unwrap().unwrap();
        assert_eq!(stored.data["likesCount"], 1);
    }

    #[tokio::test]
    async fn absent_read_conflicts_with_later_insert() {
        let store = MemoryStore::new();
        let path = DocPath::new("posts/p1/votes", "u1");

        let mut tx = store.begin().await.unwrap();
        assert!(tx.get(&path).await.unwrap().is_none());
        store
            .merge(&path, MergeWrite::new().set("type", "like"))
            .await
            .unwrap();
        tx.set(&path, json!({ "type": "dislike" }));

        assert!(matches!(tx.commit().await, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn update_of_missing_document_writes_nothing() {
        let store = MemoryStore::new();
        let created = DocPath::new("posts", "p1");
        let missing = DocPath::new("posts", "gone");

        let mut tx = store.begin().await.unwrap();
        tx.set(&created, json!({ "content": "hello" }));
        tx.update(&missing, Map::new());

        assert!(matches!(tx.commit().await, Err(StoreError::Missing(_))));
        assert!(store.get(&created).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn query_is_scoped_to_one_collection() {
        let store = MemoryStore::new();
        let post = store.create("posts", json!({ "createdAt": 1 })).await.unwrap();
        store
            .create(&post.subcollection("comments"), json!({ "createdAt": 2 }))
            .await
            .unwrap();
        store.create("posts", json!({ "createdAt": 3 })).await.unwrap();

        let posts = store
            .query("posts", &Query::new().order_by("createdAt", Direction::Descending))
            .await
            .unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].data["createdAt"], 3);
        assert_eq!(store.count_under(&post.key()), 2);
    }

    #[tokio::test]
    async fn committed_writes_are_broadcast() {
        let store = MemoryStore::new();
        let mut changes = store.changes();
        let path = DocPath::new("tags", "iot");

        store
            .merge(&path, MergeWrite::new().increment("usageCount", 1))
            .await
            .unwrap();
        store.delete(&path).await.unwrap();

        let upserted = changes.recv().await.unwrap();
        assert_eq!(upserted.path, path);
        assert_eq!(upserted.kind, ChangeKind::Upserted);
        assert_eq!(changes.recv().await.unwrap().kind, ChangeKind::Deleted);
    }
}
