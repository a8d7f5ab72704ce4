//! Storage abstraction layer for the retrieval engine
//!
//! The retrieval strategies never talk to a database directly. They go through
//! four small traits, one per kind of collaborator, so the same pipeline runs
//! against in-memory stores in tests and real services in production.
//!
//! ## Key Components
//!
//! - **VectorStore**: Named collections of points (vector + JSON payload) with
//!   filtered similarity search
//! - **GraphStore**: Weighted chunk relationships with bounded path traversal
//! - **DocumentStore**: Documents with their text, summary, outline and chunks
//! - **CacheBackend**: String key-value cache with per-entry TTL
//!
//! ## Collections
//!
//! ```text
//! chunks     point id = chunk id     payload = chunk JSON + document_title + content_type
//! documents  point id = document id  payload = document_id + document_title + content_type
//! summaries  point id = document id  payload = document_id + document_title + content_type
//! ```
//!
//! ## Implementations
//!
//! - [`memory`]: in-process stores with call counters
//! - [`sqlite_store`]: SQLite-backed [`DocumentStore`]

pub mod memory;
pub mod sqlite_store;

use crate::retrieval::model::DocumentRef;
use anyhow::Result;
use async_trait::async_trait;
use nexus_chunker::{Chunk, ChunkRelationship, ContentType, DocumentMetadata, DocumentOutline, DocumentSummary};
use nexus_embed::Embedding;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// JSON payload attached to a vector point.
pub type Payload = Map<String, Value>;

pub const DOCUMENT_ID: &str = "document_id";
pub const DOCUMENT_TITLE: &str = "document_title";
pub const CONTENT_TYPE: &str = "content_type";
pub const CHUNK_TYPE: &str = "type";

/// A vector with its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: String,
    pub vector: Option<Embedding>,
    pub payload: Payload,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// Payload field that must equal one of several values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMatch {
    pub key: String,
    pub any: Vec<Value>,
}

/// Conjunction of field matches over point payloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadFilter {
    pub must: Vec<FieldMatch>,
}

impl PayloadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to equal one of `values`.
    pub fn with_any<K, I, V>(mut self, key: K, values: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.must.push(FieldMatch {
            key: key.into(),
            any: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        self.must.iter().all(|condition| {
            payload
                .get(&condition.key)
                .is_some_and(|value| condition.any.contains(value))
        })
    }
}

/// Parameters of a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSearch {
    pub vector: Embedding,
    pub limit: usize,
    pub filter: Option<PayloadFilter>,
    pub score_threshold: Option<f32>,
    pub with_payload: bool,
}

impl VectorSearch {
    pub fn new(vector: Embedding, limit: usize) -> Self {
        Self {
            vector,
            limit,
            filter: None,
            score_threshold: None,
            with_payload: true,
        }
    }

    pub fn with_filter(self, filter: Option<PayloadFilter>) -> Self {
        Self { filter, ..self }
    }

    pub fn with_score_threshold(self, score_threshold: f32) -> Self {
        Self {
            score_threshold: Some(score_threshold),
            ..self
        }
    }
}

/// Trait for vector similarity search over named collections.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Points most similar to the query vector, best first
    async fn search(&self, collection: &str, search: VectorSearch) -> Result<Vec<ScoredPoint>>;

    /// Fetch points by id; unknown ids are skipped
    async fn retrieve(&self, collection: &str, ids: &[String], with_vector: bool)
    -> Result<Vec<Point>>;

    /// Insert or replace points
    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()>;

    /// Delete every point whose payload matches; returns the number removed
    async fn delete_by_filter(&self, collection: &str, filter: &PayloadFilter) -> Result<usize>;
}

/// A chunk reached by graph traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphHit {
    pub chunk_id: String,
    /// Hops from the nearest seed along the best path
    pub distance: usize,
    /// Product of edge weights along the best path
    pub path_score: f32,
}

/// Trait for relationship graph storage and traversal.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Chunks within `max_depth` hops of any seed, seeds excluded, ordered by
    /// path score
    async fn traverse(&self, seeds: &[String], max_depth: usize, limit: usize)
    -> Result<Vec<GraphHit>>;

    /// Insert or replace edges
    async fn upsert_relationships(&self, relationships: &[ChunkRelationship]) -> Result<()>;

    /// Remove chunks and every edge touching them
    async fn remove_chunks(&self, chunk_ids: &[String]) -> Result<()>;
}

/// A document as persisted after chunking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub metadata: DocumentMetadata,
    pub content: String,
    pub summary: DocumentSummary,
    pub outline: DocumentOutline,
}

impl StoredDocument {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn to_ref(&self) -> DocumentRef {
        DocumentRef {
            id: self.metadata.id.clone(),
            title: self.metadata.title.clone(),
            content_type: self.metadata.content_type,
            summary: None,
        }
    }
}

/// Trait for relational document storage.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Find a document by title, exact (case-insensitive) match first, then
    /// the shortest title containing `name`
    async fn get_document_by_name(&self, name: &str) -> Result<Option<StoredDocument>>;

    async fn get_document_by_id(&self, id: &str) -> Result<Option<StoredDocument>>;

    async fn get_document_outline(&self, id: &str) -> Result<Option<DocumentOutline>>;

    /// Chunks of a document in document order
    async fn get_chunks_for_document(&self, id: &str) -> Result<Vec<Chunk>>;

    /// Insert or replace a document together with its chunks
    async fn save_document(&self, document: &StoredDocument, chunks: &[Chunk]) -> Result<()>;
}

/// Where a cache backend lives, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEndpoint {
    pub host: String,
    pub port: u16,
}

/// Trait for the key-value cache behind the query cache.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Check the backend is reachable
    async fn ping(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Remove every key starting with `prefix`; returns the number removed
    async fn clear(&self, prefix: &str) -> Result<usize>;

    fn endpoint(&self) -> CacheEndpoint;
}

/// The stores a retrieval engine reads and an ingestor writes.
#[derive(Clone)]
pub struct Stores {
    pub vectors: Arc<dyn VectorStore>,
    pub graph: Arc<dyn GraphStore>,
    pub documents: Arc<dyn DocumentStore>,
}

impl Stores {
    /// Fresh, empty in-memory stores.
    pub fn in_memory() -> Self {
        Self {
            vectors: Arc::new(memory::InMemoryVectorStore::new()),
            graph: Arc::new(memory::InMemoryGraphStore::new()),
            documents: Arc::new(memory::InMemoryDocumentStore::new()),
        }
    }

    /// Replace the document store, keeping the others.
    pub fn with_documents(self, documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents, ..self }
    }
}

/// Payload stored with a chunk vector: the chunk itself (without its
/// embedding) plus the title and content type of its document.
pub fn chunk_payload(chunk: &Chunk, document: &DocumentMetadata) -> Payload {
    let mut stored = chunk.clone();
    stored.embedding = None;
    stored.relevance = None;
    let mut payload = match serde_json::to_value(&stored) {
        Ok(Value::Object(map)) => map,
        _ => Payload::new(),
    };
    payload.insert(DOCUMENT_TITLE.to_string(), Value::from(document.title.clone()));
    payload.insert(
        CONTENT_TYPE.to_string(),
        Value::from(document.content_type.as_str()),
    );
    payload
}

/// Payload stored with document and summary vectors.
pub fn document_payload(document: &DocumentMetadata) -> Payload {
    let mut payload = Payload::new();
    payload.insert(DOCUMENT_ID.to_string(), Value::from(document.id.clone()));
    payload.insert(DOCUMENT_TITLE.to_string(), Value::from(document.title.clone()));
    payload.insert(
        CONTENT_TYPE.to_string(),
        Value::from(document.content_type.as_str()),
    );
    payload
}

/// Rebuild a chunk from its payload.
pub fn payload_chunk(payload: &Payload) -> Option<Chunk> {
    serde_json::from_value(Value::Object(payload.clone())).ok()
}

/// The document a chunk or document payload belongs to.
pub fn payload_document(payload: &Payload) -> Option<DocumentRef> {
    let id = payload.get(DOCUMENT_ID)?.as_str()?;
    let title = payload
        .get(DOCUMENT_TITLE)
        .and_then(Value::as_str)
        .unwrap_or(id);
    let content_type = payload
        .get(CONTENT_TYPE)
        .and_then(Value::as_str)
        .map(ContentType::from_tag)
        .unwrap_or_default();
    Some(DocumentRef {
        id: id.to_string(),
        title: title.to_string(),
        content_type,
        summary: None,
    })
}
