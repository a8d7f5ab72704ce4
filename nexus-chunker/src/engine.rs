//! The chunking pipeline: strategy, enhancement, relationships, summary and
//! outline for one document.

use crate::config::ChunkingConfig;
use crate::enhance::SemanticEnhancer;
use crate::model::{ChunkingResult, DocumentMetadata};
use crate::outline::{build_outline, summarize_document};
use crate::page::get_page_number;
use crate::relationships::RelationshipBuilder;
use crate::strategy::ChunkingStrategy;
use nexus_embed::VisionProvider;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, info};

/// Turns raw documents into chunks, relationships, a summary and an outline.
///
/// ```
/// # tokio_test::block_on(async {
/// use nexus_chunker::{ChunkingConfig, ChunkingEngine, ContentType, DocumentMetadata};
///
/// let engine = ChunkingEngine::new(ChunkingConfig::default());
/// let metadata = DocumentMetadata::new("doc-1", "Guide", ContentType::Markdown);
/// let result = engine
///     .chunk_document("# Guide\n\nStart here.\n\n## Install\n\nRun it.", &metadata)
///     .await;
///
/// assert_eq!(result.chunks.len(), 2);
/// assert_eq!(result.outline.sections[0].subsections[0].title, "Install");
/// # });
/// ```
#[derive(Clone)]
pub struct ChunkingEngine {
    config: ChunkingConfig,
    vision: Option<Arc<dyn VisionProvider>>,
    enhancer: SemanticEnhancer,
    relationships: RelationshipBuilder,
}

impl std::fmt::Debug for ChunkingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkingEngine")
            .field("config", &self.config)
            .field("vision", &self.vision.as_ref().map(|v| v.provider_name()))
            .finish()
    }
}

impl ChunkingEngine {
    pub fn new(config: ChunkingConfig) -> Self {
        Self {
            enhancer: SemanticEnhancer::new(&config),
            relationships: RelationshipBuilder::new(&config),
            config,
            vision: None,
        }
    }

    /// Use a vision provider to describe images in multimodal documents.
    pub fn with_vision_provider(self, vision: Arc<dyn VisionProvider>) -> Self {
        Self {
            vision: Some(vision),
            ..self
        }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Chunk one document. Bytes that are not valid UTF-8 are replaced, so
    /// binary input yields best-effort text rather than an error.
    pub async fn chunk_document(
        &self,
        content: impl AsRef<[u8]>,
        metadata: &DocumentMetadata,
    ) -> ChunkingResult {
        let text = String::from_utf8_lossy(content.as_ref());
        if let Cow::Owned(_) = text {
            debug!("Document {} is not valid UTF-8; decoded lossily", metadata.id);
        }

        let strategy = ChunkingStrategy::for_content_type(
            metadata.content_type,
            &self.config,
            self.vision.clone(),
        );
        let mut chunks = strategy.chunk(&text, metadata).await;

        for chunk in chunks.iter_mut() {
            if chunk.metadata.page_number.is_none() {
                chunk.metadata.page_number =
                    get_page_number(chunk.position.start, metadata.pages.as_deref());
            }
        }

        self.enhancer.enhance(&mut chunks);
        let relationships = self.relationships.build(&chunks);
        let summary = summarize_document(&chunks, self.config.summary_chunk_count);
        let outline = build_outline(&chunks, metadata);

        info!(
            "Chunked document {} with {} strategy: {} chunks, {} relationships",
            metadata.id,
            strategy.name(),
            chunks.len(),
            relationships.len()
        );

        ChunkingResult {
            chunks,
            relationships,
            summary,
            outline,
        }
    }
}
