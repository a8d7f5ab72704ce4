//! SQLite implementation of [`DocumentStore`]
//!
//! Persists documents with their summary and outline, and their chunks with
//! f16 embeddings packed into blobs.
//!
//! ## Database Schema
//!
//! ```sql
//! -- Documents table: one row per ingested document
//! CREATE TABLE documents (
//!     id TEXT PRIMARY KEY,
//!     title TEXT NOT NULL,
//!     content_type TEXT NOT NULL,
//!     metadata TEXT NOT NULL,          -- DocumentMetadata as JSON
//!     content TEXT NOT NULL,
//!     summary TEXT NOT NULL,           -- DocumentSummary as JSON
//!     outline TEXT NOT NULL,           -- DocumentOutline as JSON
//!     ingested_at TIMESTAMP NOT NULL
//! );
//!
//! -- Chunks table: chunks in document order
//! CREATE TABLE chunks (
//!     id TEXT PRIMARY KEY,
//!     document_id TEXT REFERENCES documents(id) ON DELETE CASCADE,
//!     ordinal INTEGER NOT NULL,        -- position in the document's chunk list
//!     chunk TEXT NOT NULL,             -- Chunk as JSON, without its embedding
//!     embedding BLOB                   -- f16 embedding vector (optional)
//! );
//! ```

use super::{DocumentStore, StoredDocument};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use half::f16;
use nexus_chunker::{Chunk, DocumentOutline};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::debug;

const DOCUMENT_COLUMNS: &str = "metadata, content, summary, outline";

/// SQLite-backed document store.
#[derive(Clone, Debug)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    /// Open (or create) a database file.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
                .create_if_missing(true),
        )
        .await
        .with_context(|| format!("Failed to open document database {}", path.display()))?;
        Self::new_with_pool(pool).await
    }

    /// In-memory database for tests. A single connection keeps every query on
    /// the same database.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(
                SqliteConnectOptions::new()
                    .in_memory(true)
                    .foreign_keys(true),
            )
            .await?;
        Self::new_with_pool(pool).await
    }

    async fn new_with_pool(pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                content_type TEXT NOT NULL,
                metadata TEXT NOT NULL,
                content TEXT NOT NULL,
                summary TEXT NOT NULL,
                outline TEXT NOT NULL,
                ingested_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                chunk TEXT NOT NULL,
                embedding BLOB,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id, ordinal)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_title ON documents(title COLLATE NOCASE)")
            .execute(pool)
            .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// When a document was last saved.
    pub async fn ingested_at(&self, id: &str) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT ingested_at FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get("ingested_at")))
    }

    fn row_to_document(row: &SqliteRow) -> Result<StoredDocument> {
        let metadata: String = row.get("metadata");
        let summary: String = row.get("summary");
        let outline: String = row.get("outline");
        Ok(StoredDocument {
            metadata: serde_json::from_str(&metadata).context("Corrupt document metadata")?,
            content: row.get("content"),
            summary: serde_json::from_str(&summary).context("Corrupt document summary")?,
            outline: serde_json::from_str(&outline).context("Corrupt document outline")?,
        })
    }

    fn row_to_chunk(row: &SqliteRow) -> Result<Chunk> {
        let json: String = row.get("chunk");
        let embedding_bytes: Option<Vec<u8>> = row.get("embedding");
        let mut chunk: Chunk = serde_json::from_str(&json).context("Corrupt chunk row")?;
        chunk.embedding = embedding_bytes.map(|bytes| bytemuck::pod_collect_to_vec::<u8, f16>(&bytes));
        Ok(chunk)
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get_document_by_name(&self, name: &str) -> Result<Option<StoredDocument>> {
        let name = name.trim();
        let exact = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE title = ? COLLATE NOCASE LIMIT 1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        let row = match exact {
            Some(row) => Some(row),
            None => {
                let escaped = name
                    .replace('\\', "\\\\")
                    .replace('%', "\\%")
                    .replace('_', "\\_");
                sqlx::query(&format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents
                     WHERE title LIKE ? ESCAPE '\\'
                     ORDER BY length(title), title
                     LIMIT 1"
                ))
                .bind(format!("%{escaped}%"))
                .fetch_optional(&self.pool)
                .await?
            }
        };

        row.as_ref().map(Self::row_to_document).transpose()
    }

    async fn get_document_by_id(&self, id: &str) -> Result<Option<StoredDocument>> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_document).transpose()
    }

    async fn get_document_outline(&self, id: &str) -> Result<Option<DocumentOutline>> {
        let row = sqlx::query("SELECT outline FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            let outline: String = row.get("outline");
            serde_json::from_str(&outline).context("Corrupt document outline")
        })
        .transpose()
    }

    async fn get_chunks_for_document(&self, id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT chunk, embedding FROM chunks WHERE document_id = ? ORDER BY ordinal",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_chunk).collect()
    }

    async fn save_document(&self, document: &StoredDocument, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document.id())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO documents
                (id, title, content_type, metadata, content, summary, outline, ingested_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(document.id())
        .bind(&document.metadata.title)
        .bind(document.metadata.content_type.as_str())
        .bind(serde_json::to_string(&document.metadata)?)
        .bind(&document.content)
        .bind(serde_json::to_string(&document.summary)?)
        .bind(serde_json::to_string(&document.outline)?)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        for (ordinal, chunk) in chunks.iter().enumerate() {
            let mut stored = chunk.clone();
            let embedding = stored.embedding.take();
            stored.relevance = None;
            let embedding_bytes: Option<Vec<u8>> =
                embedding.map(|e| bytemuck::cast_slice::<f16, u8>(&e).to_vec());

            sqlx::query(
                "INSERT OR REPLACE INTO chunks (id, document_id, ordinal, chunk, embedding)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(document.id())
            .bind(ordinal as i64)
            .bind(serde_json::to_string(&stored)?)
            .bind(embedding_bytes)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            "Saved document {} with {} chunks",
            document.id(),
            chunks.len()
        );
        Ok(())
    }
}
