//! PostgreSQL receipt store
//!
//! Document-database variant of the receipt store. Each receipt is one row;
//! the primary record and the id index are written atomically.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, QueryBuilder};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::domain::{
    attach_sequence_key, stamp_receipt, Document, ReceiptFilter, SequenceKey,
    SequenceKeyGenerator,
};
use crate::infra::{ReceiptStore, Result, StoreError};

/// PostgreSQL unique_violation
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, FromRow)]
struct ReceiptRow {
    seq_key: String,
    doc: serde_json::Value,
}

impl ReceiptRow {
    /// The document with its cursor attached, or `None` if unreadable
    fn into_document(self) -> Option<Document> {
        let serde_json::Value::Object(mut doc) = self.doc else {
            return None;
        };
        let key = SequenceKey::parse(&self.seq_key).ok()?;
        attach_sequence_key(&mut doc, &key);
        Some(doc)
    }
}

/// PostgreSQL-backed receipt store
pub struct PgReceiptStore {
    pool: PgPool,
    keys: SequenceKeyGenerator,
    closed: AtomicBool,
}

impl PgReceiptStore {
    /// Create a new store over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            keys: SequenceKeyGenerator::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Connect and create the schema if needed
    pub async fn from_url(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self::new(pool);
        store.initialize().await?;
        Ok(store)
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Initialize the receipts table
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS receipts (
                seq_key TEXT COLLATE "C" PRIMARY KEY,
                id TEXT NOT NULL,
                received_at BIGINT NOT NULL,
                doc JSONB NOT NULL,

                CONSTRAINT uq_receipts_id UNIQUE (id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_receipts_received_at
            ON receipts (received_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Count stored receipts
    pub async fn count(&self) -> Result<i64> {
        self.ensure_open()?;
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM receipts")
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(count.0)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

fn map_db_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolClosed => StoreError::Closed,
        other => StoreError::Database(other),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().unwrap_or_default() == UNIQUE_VIOLATION,
        _ => false,
    }
}

/// Build the filtered, newest-first selection for `filter`
fn build_query(filter: &ReceiptFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(
        "SELECT seq_key, doc FROM receipts WHERE jsonb_typeof(doc) = 'object'",
    );

    if let Some(lower) = filter.lower_bound() {
        qb.push(" AND seq_key >= ").push_bind(lower.encode());
    }
    if let Some(cursor) = filter.start_cursor {
        qb.push(" AND seq_key < ").push_bind(cursor.encode());
    }
    if !filter.ids.is_empty() {
        let ids: Vec<String> = filter.ids.iter().cloned().collect();
        // Same match as the embedded backends: the document's `_id` or `id`
        qb.push(" AND (doc->>'_id' = ANY(")
            .push_bind(ids.clone())
            .push(") OR doc->>'id' = ANY(")
            .push_bind(ids)
            .push("))");
    }
    if let Some(from) = &filter.from {
        qb.push(" AND doc->>'from' = ").push_bind(from.clone());
    }
    if let Some(to) = &filter.to {
        qb.push(" AND doc->>'to' = ").push_bind(to.clone());
    }

    qb.push(" ORDER BY seq_key DESC");
    if filter.limit > 0 {
        qb.push(" LIMIT ").push_bind(filter.limit as i64);
    }
    if filter.skip > 0 {
        qb.push(" OFFSET ").push_bind(filter.skip as i64);
    }
    qb
}

#[async_trait]
impl ReceiptStore for PgReceiptStore {
    async fn insert(&self, id: &str, receipt: Document) -> Result<Document> {
        self.ensure_open()?;

        let key = self.keys.next_key();
        let mut doc = receipt;
        stamp_receipt(&mut doc, id, &key);

        let result = sqlx::query(
            r#"
            INSERT INTO receipts (seq_key, id, received_at, doc)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(key.encode())
        .bind(id)
        .bind(key.timestamp_ms() as i64)
        .bind(serde_json::Value::Object(doc.clone()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(id = %id, sequence_key = %key, backend = "postgres", "Receipt stored");
                Ok(doc)
            }
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateKey(id.to_string())),
            Err(e) => Err(map_db_error(e)),
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Document>> {
        self.ensure_open()?;

        let row = sqlx::query_as::<_, ReceiptRow>(
            r#"
            SELECT seq_key, doc
            FROM receipts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        match row {
            None => Ok(None),
            Some(row) => match row.doc {
                serde_json::Value::Object(doc) => Ok(Some(doc)),
                _ => Err(StoreError::corrupt(id, "stored document is not an object")),
            },
        }
    }

    async fn query(&self, filter: &ReceiptFilter) -> Result<Vec<Document>> {
        self.ensure_open()?;
        if filter.since_beyond_keys() {
            return Ok(Vec::new());
        }

        let mut qb = build_query(filter);
        let rows: Vec<ReceiptRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)?;

        let total = rows.len();
        let docs: Vec<Document> = rows.into_iter().filter_map(ReceiptRow::into_document).collect();
        if docs.len() < total {
            warn!(
                skipped = total - docs.len(),
                "Skipped unreadable receipts during query"
            );
        }
        Ok(docs)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.pool.close().await;
        info!(backend = "postgres", "Receipt store closed");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
