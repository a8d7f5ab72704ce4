//! Post-strategy enrichment of chunk metadata.

use crate::config::ChunkingConfig;
use crate::model::Chunk;
use crate::scoring;

/// Recomputes semantic density, merges the key-information flag and attaches
/// extractive summaries to dense or key chunks.
///
/// Importance set by the strategies is left alone, and running the enhancer
/// twice yields the same chunks as running it once.
#[derive(Debug, Clone)]
pub struct SemanticEnhancer {
    density_threshold: f32,
}

impl SemanticEnhancer {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            density_threshold: config.summary_density_threshold,
        }
    }

    pub fn enhance(&self, chunks: &mut [Chunk]) {
        for chunk in chunks.iter_mut() {
            chunk.metadata.semantic_density = scoring::semantic_density(&chunk.content);
            chunk.metadata.contains_key_info |= scoring::contains_key_info(&chunk.content);

            let wants_summary = chunk.metadata.semantic_density > self.density_threshold
                || chunk.metadata.contains_key_info;
            if chunk.summary.is_none() && wants_summary {
                let summary = scoring::summarize(&chunk.content);
                if !summary.is_empty() {
                    chunk.summary = Some(summary);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChunkMetadata, ChunkPosition, ChunkType};

    fn chunk(content: &str, importance: f32) -> Chunk {
        Chunk::new("doc", content, ChunkType::Paragraph, ChunkPosition::default()).with_metadata(
            ChunkMetadata {
                importance,
                ..ChunkMetadata::default()
            },
        )
    }

    #[test]
    fn test_key_chunks_get_summaries() {
        let mut chunks = vec![
            chunk("Warning: rotate credentials monthly. Old keys expire.", 0.9),
            chunk("the the the the the", 0.3),
        ];
        SemanticEnhancer::new(&ChunkingConfig::default()).enhance(&mut chunks);

        assert!(chunks[0].metadata.contains_key_info);
        assert_eq!(
            chunks[0].summary.as_deref(),
            Some("Warning: rotate credentials monthly.")
        );
        assert!(chunks[1].summary.is_none());
        assert!(chunks[1].metadata.semantic_density < 0.7);
        assert_eq!(chunks[0].metadata.importance, 0.9);
        assert_eq!(chunks[1].metadata.importance, 0.3);
    }

    #[test]
    fn test_strategy_flag_is_kept() {
        let mut chunks = vec![chunk("fn main() {}", 0.7)];
        chunks[0].metadata.contains_key_info = true;
        SemanticEnhancer::new(&ChunkingConfig::default()).enhance(&mut chunks);
        assert!(chunks[0].metadata.contains_key_info);
        assert!(chunks[0].summary.is_some());
    }

    #[test]
    fn test_enhancement_is_idempotent() {
        let mut once = vec![
            chunk("Distributed consensus requires quorum acknowledgement.", 0.5),
            chunk("Note: must restart.", 0.5),
        ];
        let enhancer = SemanticEnhancer::new(&ChunkingConfig::default());
        enhancer.enhance(&mut once);
        let mut twice = once.clone();
        enhancer.enhance(&mut twice);
        assert_eq!(once, twice);
    }
}
