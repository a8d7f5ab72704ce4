//! Request and result types of the retrieval engine.

use crate::error::RetrievalError;
use crate::retrieval::intent::QueryIntent;
use nexus_chunker::{Chunk, ContentType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The retrieval algorithms the engine can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategyKind {
    FullDocument,
    SemanticChunks,
    Hierarchical,
    GraphTraversal,
    #[default]
    Adaptive,
}

impl RetrievalStrategyKind {
    pub const ALL: [RetrievalStrategyKind; 5] = [
        RetrievalStrategyKind::FullDocument,
        RetrievalStrategyKind::SemanticChunks,
        RetrievalStrategyKind::Hierarchical,
        RetrievalStrategyKind::GraphTraversal,
        RetrievalStrategyKind::Adaptive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStrategyKind::FullDocument => "full_document",
            RetrievalStrategyKind::SemanticChunks => "semantic_chunks",
            RetrievalStrategyKind::Hierarchical => "hierarchical",
            RetrievalStrategyKind::GraphTraversal => "graph_traversal",
            RetrievalStrategyKind::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for RetrievalStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalStrategyKind {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| RetrievalError::UnknownStrategy {
                name: s.to_string(),
            })
    }
}

/// Caller options for one retrieval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieveOptions {
    /// Token budget. Defaults to the estimate of the query analysis.
    pub max_tokens: Option<usize>,
    /// Run this strategy instead of the one the selector picks
    pub strategy: Option<RetrievalStrategyKind>,
    /// Prefer returning whole documents
    pub include_full_document: bool,
    /// Restrict chunks to documents of these content types
    pub content_types: Vec<ContentType>,
}

impl RetrieveOptions {
    pub fn with_max_tokens(self, max_tokens: usize) -> Self {
        Self {
            max_tokens: Some(max_tokens),
            ..self
        }
    }

    pub fn with_strategy(self, strategy: RetrievalStrategyKind) -> Self {
        Self {
            strategy: Some(strategy),
            ..self
        }
    }

    pub fn with_content_types(self, content_types: Vec<ContentType>) -> Self {
        Self {
            content_types,
            ..self
        }
    }

    pub fn with_full_document(self) -> Self {
        Self {
            include_full_document: true,
            ..self
        }
    }
}

/// A document contributing to a retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// How a result was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMetadata {
    pub strategy: RetrievalStrategyKind,
    /// Strategy that actually ran when the selected one had nothing to offer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<RetrievalStrategyKind>,
    /// Estimated tokens of `content`, never above the budget
    pub tokens: usize,
    pub documents: Vec<DocumentRef>,
    /// Named counters recorded by the strategies
    #[serde(default)]
    pub counters: BTreeMap<String, usize>,
    pub intent: QueryIntent,
}

/// LLM-ready context assembled for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub content: String,
    pub chunks: Vec<Chunk>,
    pub metadata: RetrievalMetadata,
    pub relevance: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_names_round_trip() {
        for kind in RetrievalStrategyKind::ALL {
            assert_eq!(kind.as_str().parse::<RetrievalStrategyKind>().unwrap(), kind);
        }
        assert_eq!(
            "Semantic-Chunks".parse::<RetrievalStrategyKind>().unwrap(),
            RetrievalStrategyKind::SemanticChunks
        );
        assert!(matches!(
            "vibes".parse::<RetrievalStrategyKind>(),
            Err(RetrievalError::UnknownStrategy { .. })
        ));
        assert_eq!(
            serde_json::to_string(&RetrievalStrategyKind::GraphTraversal).unwrap(),
            "\"graph_traversal\""
        );
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: RetrieveOptions =
            serde_json::from_str(r#"{"max_tokens": 500, "content_types": ["code"]}"#).unwrap();
        assert_eq!(options.max_tokens, Some(500));
        assert_eq!(options.strategy, None);
        assert_eq!(options.content_types, vec![ContentType::Code]);
    }
}
