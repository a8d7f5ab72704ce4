//! Chunking configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the chunking engine and its strategies.
///
/// Loadable from TOML or JSON; every missing field takes its default.
///
/// ```
/// use nexus_chunker::ChunkingConfig;
///
/// let config = ChunkingConfig::new(500).with_similarity_guard(50);
/// assert_eq!(config.max_tokens, 500);
/// assert_eq!(config.code_overlap_lines, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum estimated tokens per chunk
    pub max_tokens: usize,
    /// Lines repeated at the start of the next sub-chunk when splitting code
    pub code_overlap_lines: usize,
    /// Block size for code in unrecognized languages
    pub code_block_lines: usize,
    /// Paragraphs repeated at the start of the next text chunk
    pub text_overlap_units: usize,
    /// Sentences per unit when text has no paragraph breaks
    pub sentences_per_group: usize,
    /// Nesting depth at which structured data stops being flattened
    pub structured_max_depth: usize,
    /// Scalar array elements grouped into one leaf
    pub structured_array_batch: usize,
    /// SIMILAR_TO edges are computed only below this chunk count
    pub similarity_guard: usize,
    /// Minimum Jaccard similarity for a SIMILAR_TO edge
    pub similarity_threshold: f32,
    /// Chunks denser than this get a summary
    pub summary_density_threshold: f32,
    /// Chunks contributing to the document summary
    pub summary_chunk_count: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            code_overlap_lines: 5,
            code_block_lines: 50,
            text_overlap_units: 1,
            sentences_per_group: 5,
            structured_max_depth: 10,
            structured_array_batch: 10,
            similarity_guard: 100,
            similarity_threshold: 0.3,
            summary_density_threshold: 0.7,
            summary_chunk_count: 5,
        }
    }
}

impl ChunkingConfig {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            ..Self::default()
        }
    }

    pub fn with_max_tokens(self, max_tokens: usize) -> Self {
        Self { max_tokens, ..self }
    }

    pub fn with_text_overlap(self, text_overlap_units: usize) -> Self {
        Self {
            text_overlap_units,
            ..self
        }
    }

    pub fn with_code_overlap(self, code_overlap_lines: usize) -> Self {
        Self {
            code_overlap_lines,
            ..self
        }
    }

    pub fn with_structured_max_depth(self, structured_max_depth: usize) -> Self {
        Self {
            structured_max_depth,
            ..self
        }
    }

    pub fn with_similarity_guard(self, similarity_guard: usize) -> Self {
        Self {
            similarity_guard,
            ..self
        }
    }

    /// Token budget with a floor of 1 so packing always makes progress.
    pub fn budget(&self) -> usize {
        self.max_tokens.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChunkingConfig::default();
        assert_eq!(config.max_tokens, 1000);
        assert_eq!(config.code_block_lines, 50);
        assert_eq!(config.structured_max_depth, 10);
        assert_eq!(config.similarity_guard, 100);
        assert!((config.similarity_threshold - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_partial_deserialization() {
        let config: ChunkingConfig =
            serde_json::from_str(r#"{"max_tokens": 256, "text_overlap_units": 0}"#).unwrap();
        assert_eq!(config.max_tokens, 256);
        assert_eq!(config.text_overlap_units, 0);
        assert_eq!(config.sentences_per_group, 5);
    }

    #[test]
    fn test_budget_floor() {
        assert_eq!(ChunkingConfig::new(0).budget(), 1);
    }
}
