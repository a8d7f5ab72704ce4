//! Content-type specific chunking strategies.

pub mod code;
pub mod markdown;
pub mod multimodal;
pub mod structured;
pub mod text;

pub use code::{CodeStrategy, Language};
pub use markdown::MarkdownStrategy;
pub use multimodal::MultimodalStrategy;
pub use structured::StructuredStrategy;
pub use text::TextStrategy;

use crate::config::ChunkingConfig;
use crate::model::{Chunk, ContentType, DocumentMetadata};
use nexus_embed::VisionProvider;
use std::sync::Arc;

/// The strategy registry: one variant per content type.
#[derive(Debug, Clone)]
pub enum ChunkingStrategy {
    Code(CodeStrategy),
    Markdown(MarkdownStrategy),
    Text(TextStrategy),
    Structured(StructuredStrategy),
    Multimodal(MultimodalStrategy),
}

impl ChunkingStrategy {
    pub fn for_content_type(
        content_type: ContentType,
        config: &ChunkingConfig,
        vision: Option<Arc<dyn VisionProvider>>,
    ) -> Self {
        let config = config.clone();
        match content_type {
            ContentType::Code => ChunkingStrategy::Code(CodeStrategy::new(config)),
            ContentType::Markdown => ChunkingStrategy::Markdown(MarkdownStrategy::new(config)),
            ContentType::Text => ChunkingStrategy::Text(TextStrategy::new(config)),
            ContentType::StructuredData => {
                ChunkingStrategy::Structured(StructuredStrategy::new(config))
            }
            ContentType::Multimodal => {
                ChunkingStrategy::Multimodal(MultimodalStrategy::new(config, vision))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChunkingStrategy::Code(_) => "code",
            ChunkingStrategy::Markdown(_) => "markdown",
            ChunkingStrategy::Text(_) => "text",
            ChunkingStrategy::Structured(_) => "structured",
            ChunkingStrategy::Multimodal(_) => "multimodal",
        }
    }

    pub async fn chunk(&self, content: &str, metadata: &DocumentMetadata) -> Vec<Chunk> {
        match self {
            ChunkingStrategy::Code(strategy) => strategy.chunk(content, metadata),
            ChunkingStrategy::Markdown(strategy) => strategy.chunk(content, metadata),
            ChunkingStrategy::Text(strategy) => strategy.chunk(content, metadata),
            ChunkingStrategy::Structured(strategy) => strategy.chunk(content, metadata),
            ChunkingStrategy::Multimodal(strategy) => strategy.chunk(content, metadata).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_every_content_type() {
        let config = ChunkingConfig::default();
        let names: Vec<&str> = [
            ContentType::Code,
            ContentType::Markdown,
            ContentType::Text,
            ContentType::StructuredData,
            ContentType::Multimodal,
        ]
        .into_iter()
        .map(|ct| ChunkingStrategy::for_content_type(ct, &config, None).name())
        .collect();
        assert_eq!(
            names,
            vec!["code", "markdown", "text", "structured", "multimodal"]
        );
    }
}
