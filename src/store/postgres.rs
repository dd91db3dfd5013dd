//! PostgreSQL-backed document store.
//!
//! Documents live in a single `documents` table (`path`, `collection`, JSONB
//! `data`, `version`). Transactions are optimistic: reads go straight to the
//! pool and remember the version they saw; `commit` locks those rows with
//! `SELECT ... FOR UPDATE`, verifies the versions and applies the buffered
//! writes. Committed changes are published on a Redis channel and every process
//! (including this one) turns them back into [`ChangeEvent`]s.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow, types::Json};
use tokio::sync::broadcast;

use super::{
    ChangeEvent, ChangeKind, DocPath, Document, DocumentStore, Filter, MergeWrite, Query,
    StoreError, StoreResult, StoreTransaction, TxState, WriteOp,
};
use crate::redis::RedisClient;

pub const CHANGE_CHANNEL: &str = "document_changes";
const CHANGE_BUFFER: usize = 1024;

#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
    publisher: ChangePublisher,
    changes: broadcast::Sender<ChangeEvent>,
    max_attempts: u32,
}

#[derive(Clone)]
struct ChangePublisher {
    redis: Arc<RedisClient>,
}

impl ChangePublisher {
    // Best-effort: failures are logged, the commit already happened.
    async fn publish(&self, events: &[ChangeEvent]) {
        for event in events {
            let payload = match serde_json::to_string(event) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode change event");
                    continue;
                }
            };
            if let Err(e) = self.redis.publish(CHANGE_CHANNEL, &payload).await {
                tracing::warn!(error = %e, path = %event.path, "failed to publish change event");
            }
        }
    }
}

impl PgDocumentStore {
    /// Creates the store and starts relaying Redis change events into the
    /// local broadcast channel.
    pub async fn connect(
        pool: PgPool,
        redis: Arc<RedisClient>,
        max_attempts: u32,
    ) -> StoreResult<Self> {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);

        let mut pubsub = redis
            .subscribe(vec![CHANGE_CHANNEL])
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let relay = changes.clone();
        tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let Ok(payload) = msg.get_payload::<String>() else {
                    continue;
                };
                match serde_json::from_str::<ChangeEvent>(&payload) {
                    Ok(event) => {
                        let _ = relay.send(event);
                    }
                    Err(e) => tracing::warn!(error = %e, "ignoring malformed change event"),
                }
            }
            tracing::warn!("document change relay stopped");
        });

        Ok(Self {
            pool,
            publisher: ChangePublisher { redis },
            changes,
            max_attempts,
        })
    }
}

fn row_to_document(row: &PgRow) -> StoreResult<Document> {
    let key: String = row.try_get("path")?;
    let path = DocPath::parse(&key)
        .ok_or_else(|| StoreError::Unavailable(format!("malformed document path {}", key)))?;
    let Json(data): Json<Value> = row.try_get("data")?;
    let version: i64 = row.try_get("version")?;
    Ok(Document {
        path,
        data,
        version: version as u64,
    })
}

async fn fetch_document(pool: &PgPool, path: &DocPath) -> StoreResult<Option<Document>> {
    let row = sqlx::query("SELECT path, data, version FROM documents WHERE path = $1")
        .bind(path.key())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_document).transpose()
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>> {
        fetch_document(&self.pool, path).await
    }

    async fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT path, data, version FROM documents WHERE collection = ");
        builder.push_bind(collection.to_string());

        for filter in &query.filters {
            match filter {
                Filter::Eq(field, value) => {
                    builder.push(" AND data -> ");
                    builder.push_bind(field.clone());
                    builder.push(" = ");
                    builder.push_bind(Json(value.clone()));
                }
                Filter::ArrayContains(field, value) => {
                    builder.push(" AND data -> ");
                    builder.push_bind(field.clone());
                    builder.push(" @> ");
                    builder.push_bind(Json(Value::Array(vec![value.clone()])));
                }
            }
        }

        if let Some((field, direction)) = &query.order_by {
            builder.push(" ORDER BY data -> ");
            builder.push_bind(field.clone());
            builder.push(match direction {
                super::Direction::Ascending => " ASC NULLS FIRST",
                super::Direction::Descending => " DESC NULLS LAST",
            });
        }

        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit as i64);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn create(&self, collection: &str, data: Value) -> StoreResult<DocPath> {
        let path = DocPath::new(collection, self.new_id());

        sqlx::query(
            "INSERT INTO documents (path, collection, data, version) VALUES ($1, $2, $3, nextval('document_versions'))",
        )
        .bind(path.key())
        .bind(collection)
        .bind(Json(data))
        .execute(&self.pool)
        .await?;

        self.publisher
            .publish(&[ChangeEvent {
                path: path.clone(),
                kind: ChangeKind::Upserted,
            }])
            .await;
        Ok(path)
    }

    async fn merge(&self, path: &DocPath, write: MergeWrite) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        // Make sure a row exists so it can be locked.
        sqlx::query(
            r#"
            INSERT INTO documents (path, collection, data, version)
            VALUES ($1, $2, '{}'::jsonb, 0)
            ON CONFLICT (path) DO NOTHING
            "#,
        )
        .bind(path.key())
        .bind(path.collection())
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT data FROM documents WHERE path = $1 FOR UPDATE")
            .bind(path.key())
            .fetch_one(&mut *tx)
            .await?;
        let Json(existing): Json<Value> = row.try_get("data")?;

        sqlx::query("UPDATE documents SET data = $2, version = nextval('document_versions') WHERE path = $1")
            .bind(path.key())
            .bind(Json(write.apply_to(Some(&existing))))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.publisher
            .publish(&[ChangeEvent {
                path: path.clone(),
                kind: ChangeKind::Upserted,
            }])
            .await;
        Ok(())
    }

    async fn delete(&self, path: &DocPath) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM documents WHERE path = $1")
            .bind(path.key())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            self.publisher
                .publish(&[ChangeEvent {
                    path: path.clone(),
                    kind: ChangeKind::Deleted,
                }])
                .await;
        }
        Ok(())
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(PgTransaction {
            pool: self.pool.clone(),
            publisher: self.publisher.clone(),
            state: TxState::default(),
        }))
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    fn max_transaction_attempts(&self) -> u32 {
        self.max_attempts
    }
}

struct PgTransaction {
    pool: PgPool,
    publisher: ChangePublisher,
    state: TxState,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn get(&mut self, path: &DocPath) -> StoreResult<Option<Document>> {
        let doc = fetch_document(&self.pool, path).await?;
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
        let mut tx = self.pool.begin().await?;

        // Lock in a stable order to avoid deadlocks between committers.
        let mut read_set: Vec<_> = reads.into_iter().collect();
        read_set.sort_by(|a, b| a.0.cmp(&b.0));

        for (path, observed) in &read_set {
            let current: Option<i64> =
                sqlx::query_scalar("SELECT version FROM documents WHERE path = $1 FOR UPDATE")
                    .bind(path.key())
                    .fetch_optional(&mut *tx)
                    .await?;
            if current.map(|v| v as u64) != *observed {
                tx.rollback().await?;
                return Err(StoreError::Conflict(path.key()));
            }
        }

        for (path, op) in &writes {
            match op {
                WriteOp::Set(data) => {
                    sqlx::query(
                        r#"
                        INSERT INTO documents (path, collection, data, version)
                        VALUES ($1, $2, $3, nextval('document_versions'))
                        ON CONFLICT (path)
                        DO UPDATE SET data = EXCLUDED.data, version = EXCLUDED.version
                        "#,
                    )
                    .bind(path.key())
                    .bind(path.collection())
                    .bind(Json(data.clone()))
                    .execute(&mut *tx)
                    .await?;
                }
                WriteOp::Update(fields) => {
                    let result = sqlx::query(
                        "UPDATE documents SET data = data || $2, version = nextval('document_versions') WHERE path = $1",
                    )
                    .bind(path.key())
                    .bind(Json(Value::Object(fields.clone())))
                    .execute(&mut *tx)
                    .await?;
                    if result.rows_affected() == 0 {
                        tx.rollback().await?;
                        return Err(StoreError::Missing(path.key()));
                    }
                }
                WriteOp::Delete => {
                    sqlx::query("DELETE FROM documents WHERE path = $1")
                        .bind(path.key())
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await?;
        self.publisher
            .publish(&TxState::change_events(&writes))
            .await;
        Ok(())
    }
}
