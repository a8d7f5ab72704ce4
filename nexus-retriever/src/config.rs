//! Retrieval configuration and the combined TOML configuration file.
//!
//! Every section deserializes with defaults, so a configuration file only has
//! to name the values it changes:
//!
//! ```toml
//! [chunking]
//! max_tokens = 800
//!
//! [retrieval.semantic]
//! rerank_top_k = 20
//!
//! [retrieval.cache]
//! ttl_secs = 60
//! ```

use crate::error::RetrievalError;
use anyhow::{Context, Result};
use nexus_chunker::ChunkingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Vector store collection names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionsConfig {
    pub chunks: String,
    pub documents: String,
    pub summaries: String,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            chunks: "chunks".to_string(),
            documents: "documents".to_string(),
            summaries: "summaries".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    /// Chunks fetched from the vector store before reranking
    pub candidate_limit: usize,
    /// Chunks kept after reranking
    pub rerank_top_k: usize,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            candidate_limit: 100,
            rerank_top_k: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FullDocumentConfig {
    /// Minimum similarity for a document found by vector search
    pub score_threshold: f32,
}

impl Default for FullDocumentConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchicalConfig {
    /// Document summaries matched against the query
    pub summary_limit: usize,
    /// Share of the budget outlines may use
    pub outline_share: f32,
}

impl Default for HierarchicalConfig {
    fn default() -> Self {
        Self {
            summary_limit: 10,
            outline_share: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub max_seeds: usize,
    /// Minimum similarity for a seed chunk
    pub seed_threshold: f32,
    /// Maximum hops from a seed
    pub max_depth: usize,
    /// Chunks above this importance are kept without a keyword match
    pub importance_threshold: f32,
    /// Maximum nodes returned by one traversal
    pub traversal_limit: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_seeds: 5,
            seed_threshold: 0.5,
            max_depth: 3,
            importance_threshold: 0.6,
            traversal_limit: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Share of the budget given to the semantic pass
    pub semantic_share: f32,
    /// Semantic relevance below which graph traversal also runs
    pub relevance_threshold: f32,
    /// Remaining tokens needed before document summaries are appended
    pub min_remaining_tokens: usize,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            semantic_share: 0.6,
            relevance_threshold: 0.6,
            min_remaining_tokens: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub host: String,
    pub port: u16,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            host: "127.0.0.1".to_string(),
            port: 6379,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Chunks embedded per provider call
    pub batch_size: usize,
    /// Characters of document text used for the document vector
    pub document_vector_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            document_vector_chars: 2000,
        }
    }
}

/// Configuration for the retrieval engine, its strategies and its cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub collections: CollectionsConfig,
    pub semantic: SemanticConfig,
    pub full_document: FullDocumentConfig,
    pub hierarchical: HierarchicalConfig,
    pub graph: GraphConfig,
    pub adaptive: AdaptiveConfig,
    pub cache: CacheConfig,
    pub ingest: IngestConfig,
}

impl RetrievalConfig {
    pub fn with_graph(self, graph: GraphConfig) -> Self {
        Self { graph, ..self }
    }

    pub fn with_adaptive(self, adaptive: AdaptiveConfig) -> Self {
        Self { adaptive, ..self }
    }

    pub fn with_cache(self, cache: CacheConfig) -> Self {
        Self { cache, ..self }
    }
}

/// Top-level configuration file with a chunking and a retrieval section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NexusConfig {
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
}

impl NexusConfig {
    /// Parse a TOML configuration string.
    pub fn from_toml_str(contents: &str) -> Result<Self, RetrievalError> {
        toml::from_str(contents).map_err(|e| RetrievalError::invalid_config(e.to_string()))
    }

    /// Load a TOML configuration file.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RetrievalConfig::default();
        assert_eq!(config.semantic.candidate_limit, 100);
        assert_eq!(config.semantic.rerank_top_k, 30);
        assert_eq!(config.hierarchical.summary_limit, 10);
        assert_eq!(config.graph.max_seeds, 5);
        assert_eq!(config.graph.max_depth, 3);
        assert_eq!(config.adaptive.min_remaining_tokens, 500);
        assert_eq!(config.cache.ttl(), Duration::from_secs(300));
        assert_eq!(config.collections.chunks, "chunks");
    }

    #[test]
    fn test_partial_toml() {
        let config = NexusConfig::from_toml_str(
            r#"
            [chunking]
            max_tokens = 800

            [retrieval.semantic]
            rerank_top_k = 20

            [retrieval.cache]
            ttl_secs = 60
            host = "cache.internal"
            "#,
        )
        .unwrap();

        assert_eq!(config.chunking.max_tokens, 800);
        assert_eq!(config.chunking.code_overlap_lines, 5);
        assert_eq!(config.retrieval.semantic.rerank_top_k, 20);
        assert_eq!(config.retrieval.semantic.candidate_limit, 100);
        assert_eq!(config.retrieval.cache.host, "cache.internal");
        assert_eq!(config.retrieval.cache.port, 6379);
    }

    #[test]
    fn test_invalid_toml() {
        let err = NexusConfig::from_toml_str("[retrieval.cache]\nport = \"high\"").unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_load_from_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nexus.toml");
        tokio::fs::write(&path, "[retrieval.graph]\nmax_depth = 2\n").await?;

        let config = NexusConfig::load(&path).await?;
        assert_eq!(config.retrieval.graph.max_depth, 2);
        assert!(NexusConfig::load(&dir.path().join("missing.toml")).await.is_err());
        Ok(())
    }
}
