//! Document ingestion: chunk, embed and persist a document so the retrieval
//! strategies can find it.
//!
//! ```text
//! bytes → ChunkingEngine → chunk embeddings (batched) → chunks collection
//!                        → document + summary vectors  → documents / summaries
//!                        → relationships               → graph store
//!                        → document, summary, outline  → document store
//! ```
//!
//! Re-ingesting a document id removes its previous chunks, edges and points
//! once the new version is embedded, so a document never has two chunk sets.

use crate::config::RetrievalConfig;
use crate::storage::{
    DOCUMENT_ID, PayloadFilter, Point, Stores, StoredDocument, chunk_payload, document_payload,
};
use anyhow::{Context, Result};
use futures::future::try_join_all;
use nexus_chunker::{ChunkingEngine, ChunkingResult, DocumentMetadata};
use nexus_embed::{EmbedOptions, EmbeddingProvider};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// What one ingestion wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub chunks: usize,
    pub relationships: usize,
    /// Chunks of an earlier version of the document that were replaced
    pub replaced_chunks: usize,
}

/// Chunks documents and writes them to the stores.
pub struct DocumentIngestor {
    chunker: ChunkingEngine,
    provider: Arc<dyn EmbeddingProvider>,
    stores: Stores,
    config: RetrievalConfig,
}

impl DocumentIngestor {
    pub fn new(
        chunker: ChunkingEngine,
        provider: Arc<dyn EmbeddingProvider>,
        stores: Stores,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            chunker,
            provider,
            stores,
            config,
        }
    }

    /// Chunk and store one document.
    pub async fn ingest(
        &self,
        content: impl AsRef<[u8]>,
        metadata: &DocumentMetadata,
    ) -> Result<IngestReport> {
        let content = String::from_utf8_lossy(content.as_ref()).into_owned();
        let result = self.chunker.chunk_document(&content, metadata).await;
        self.store(content, metadata, result).await
    }

    /// Store an already chunked document.
    pub async fn store(
        &self,
        content: String,
        metadata: &DocumentMetadata,
        result: ChunkingResult,
    ) -> Result<IngestReport> {
        let ChunkingResult {
            mut chunks,
            relationships,
            summary,
            outline,
        } = result;

        // Every vector is computed before the previous version is touched, so
        // a provider failure leaves the stores as they were.
        let options = EmbedOptions::document().with_content_type(metadata.content_type.as_str());
        let batch_size = self.config.ingest.batch_size.max(1);
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let batches = try_join_all(
            texts
                .chunks(batch_size)
                .map(|batch| self.provider.embed_batch(batch, &options)),
        )
        .await
        .with_context(|| format!("Failed to embed chunks of {}", metadata.id))?;
        let embeddings = batches.into_iter().flat_map(|b| b.embeddings);
        for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
            chunk.embedding = Some(embedding);
        }
        debug!("Embedded {} chunks of {}", chunks.len(), metadata.id);

        let preview: String = content
            .chars()
            .take(self.config.ingest.document_vector_chars)
            .collect();
        let document_text = format!("{}\n\n{}", metadata.title, preview);
        let summary_text = format!("{}: {}", metadata.title, summary.summary);
        let document_vectors = self
            .provider
            .embed_batch(&[document_text, summary_text], &EmbedOptions::document())
            .await
            .with_context(|| format!("Failed to embed document {}", metadata.id))?;

        let replaced_chunks = self
            .remove(&metadata.id)
            .await
            .with_context(|| format!("Failed to remove previous version of {}", metadata.id))?;

        let collections = &self.config.collections;
        let points = chunks
            .iter()
            .map(|chunk| Point {
                id: chunk.id.clone(),
                vector: chunk.embedding.clone(),
                payload: chunk_payload(chunk, metadata),
            })
            .collect();
        self.stores.vectors.upsert(&collections.chunks, points).await?;

        let mut vectors = document_vectors.embeddings.into_iter();
        for collection in [&collections.documents, &collections.summaries] {
            let point = Point {
                id: metadata.id.clone(),
                vector: vectors.next(),
                payload: document_payload(metadata),
            };
            self.stores.vectors.upsert(collection, vec![point]).await?;
        }

        self.stores
            .graph
            .upsert_relationships(&relationships)
            .await
            .with_context(|| format!("Failed to store relationships of {}", metadata.id))?;

        let document = StoredDocument {
            metadata: metadata.clone(),
            content,
            summary,
            outline,
        };
        self.stores
            .documents
            .save_document(&document, &chunks)
            .await
            .with_context(|| format!("Failed to save document {}", metadata.id))?;

        info!(
            "Ingested document {}: {} chunks, {} relationships",
            metadata.id,
            chunks.len(),
            relationships.len()
        );

        Ok(IngestReport {
            document_id: metadata.id.clone(),
            chunks: chunks.len(),
            relationships: relationships.len(),
            replaced_chunks,
        })
    }

    /// Remove a document's chunks, edges and vectors. The document row itself
    /// is overwritten by the next save.
    async fn remove(&self, document_id: &str) -> Result<usize> {
        let previous = self.stores.documents.get_chunks_for_document(document_id).await?;
        if !previous.is_empty() {
            let ids: Vec<String> = previous.iter().map(|c| c.id.clone()).collect();
            self.stores.graph.remove_chunks(&ids).await?;
        }

        let filter = PayloadFilter::new().with_any(DOCUMENT_ID, [document_id]);
        let collections = &self.config.collections;
        for collection in [
            &collections.chunks,
            &collections.documents,
            &collections.summaries,
        ] {
            self.stores.vectors.delete_by_filter(collection, &filter).await?;
        }
        Ok(previous.len())
    }
}
