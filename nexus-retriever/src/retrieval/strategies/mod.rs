//! Retrieval strategies.
//!
//! Every strategy takes the query, its analysis and a token budget and
//! returns [`Retrieved`]: the selected chunks (or whole document text,
//! or outlines) with the documents they came from. Formatting into the final
//! context happens afterwards in the result optimizer.
//!
//! | Strategy | Falls back to |
//! |----------|---------------|
//! | [`full_document`] | semantic chunks when no document matches |
//! | [`semantic_chunks`] | - |
//! | [`hierarchical`] | semantic chunks when no summary matches |
//! | [`graph_traversal`] | semantic chunks when no seed is found |
//! | [`adaptive`] | - (runs semantic, then graph when relevance is low) |

pub mod adaptive;
pub mod full_document;
pub mod graph_traversal;
pub mod hierarchical;
pub mod semantic_chunks;

use crate::config::RetrievalConfig;
use crate::retrieval::intent::{QueryAnalysis, QueryIntent};
use crate::retrieval::model::{DocumentRef, RetrievalStrategyKind};
use crate::storage::{CHUNK_TYPE, CONTENT_TYPE, PayloadFilter, Stores};
use anyhow::Result;
use nexus_chunker::{Chunk, ChunkType, ContentType, DocumentOutline, estimate_tokens};
use nexus_embed::EmbeddingProvider;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Everything a strategy may call out to.
#[derive(Clone)]
pub struct RetrievalContext {
    pub provider: Arc<dyn EmbeddingProvider>,
    pub stores: Stores,
    pub config: RetrievalConfig,
}

/// One strategy invocation.
#[derive(Debug, Clone, Copy)]
pub struct StrategyRequest<'a> {
    pub query: &'a str,
    pub analysis: &'a QueryAnalysis,
    /// Token budget for the selected content
    pub budget: usize,
    /// Only chunks of documents with these content types; empty means all
    pub content_types: &'a [ContentType],
}

impl<'a> StrategyRequest<'a> {
    pub fn with_budget(self, budget: usize) -> Self {
        Self { budget, ..self }
    }

    /// Payload filter for chunk searches: the requested content types, and
    /// code chunk types for code searches.
    pub fn chunk_filter(&self) -> Option<PayloadFilter> {
        let mut filter = PayloadFilter::new();
        if !self.content_types.is_empty() {
            filter = filter.with_any(
                CONTENT_TYPE,
                self.content_types.iter().map(|c| c.as_str()),
            );
        }
        if self.analysis.intent == QueryIntent::CodeSearch {
            filter = filter.with_any(
                CHUNK_TYPE,
                [ChunkType::Function, ChunkType::Class, ChunkType::CodeBlock].map(|t| t.as_str()),
            );
        }
        (!filter.is_empty()).then_some(filter)
    }
}

/// Content selected by a strategy, before formatting.
#[derive(Debug, Clone, Default)]
pub struct Retrieved {
    /// Selected chunks, best first, each with `relevance` set
    pub chunks: Vec<Chunk>,
    /// Contributing documents in presentation order
    pub documents: Vec<DocumentRef>,
    /// Whole text of `documents[0]` when it fits the budget
    pub full_text: Option<String>,
    /// Outlines by document id
    pub outlines: Vec<(String, DocumentOutline)>,
    pub relevance: f32,
    pub fallback: Option<RetrievalStrategyKind>,
    pub counters: BTreeMap<String, usize>,
}

impl Retrieved {
    pub fn count(&mut self, name: &str, amount: usize) {
        *self.counters.entry(name.to_string()).or_default() += amount;
    }

    /// Add another result's counters to this one.
    pub fn absorb_counters(&mut self, other: &BTreeMap<String, usize>) {
        for (name, amount) in other {
            self.count(name, *amount);
        }
    }

    /// Estimated tokens of the selected content, without formatting.
    pub fn content_tokens(&self) -> usize {
        let chunks: usize = self.chunks.iter().map(|c| c.tokens).sum();
        let outlines: usize = self
            .outlines
            .iter()
            .map(|(_, outline)| estimate_tokens(&outline.to_markdown()))
            .sum();
        let text = self.full_text.as_deref().map_or(0, estimate_tokens);
        chunks + outlines + text
    }

    /// Record that `fallback` produced this result.
    pub fn as_fallback(self, fallback: RetrievalStrategyKind) -> Self {
        Self {
            fallback: Some(fallback),
            ..self
        }
    }
}

/// Run one strategy.
pub async fn run(
    kind: RetrievalStrategyKind,
    context: &RetrievalContext,
    request: &StrategyRequest<'_>,
) -> Result<Retrieved> {
    match kind {
        RetrievalStrategyKind::FullDocument => full_document::retrieve(context, request).await,
        RetrievalStrategyKind::SemanticChunks => semantic_chunks::retrieve(context, request).await,
        RetrievalStrategyKind::Hierarchical => hierarchical::retrieve(context, request).await,
        RetrievalStrategyKind::GraphTraversal => graph_traversal::retrieve(context, request).await,
        RetrievalStrategyKind::Adaptive => adaptive::retrieve(context, request).await,
    }
}

/// Take chunks in order, skipping any that no longer fit.
pub(crate) fn pack_greedy(ranked: impl IntoIterator<Item = Chunk>, budget: usize) -> Vec<Chunk> {
    let mut used = 0;
    let mut selected = Vec::new();
    for chunk in ranked {
        if used + chunk.tokens <= budget {
            used += chunk.tokens;
            selected.push(chunk);
        }
    }
    selected
}

/// Take chunks in order until the first one that does not fit.
pub(crate) fn pack_in_order(chunks: impl IntoIterator<Item = Chunk>, budget: usize) -> Vec<Chunk> {
    let mut used = 0;
    chunks
        .into_iter()
        .take_while(|chunk| {
            used += chunk.tokens;
            used <= budget
        })
        .collect()
}

/// Mean relevance of the chunks, 0.0 for none.
pub(crate) fn mean_relevance(chunks: &[Chunk]) -> f32 {
    if chunks.is_empty() {
        return 0.0;
    }
    chunks.iter().filter_map(|c| c.relevance).sum::<f32>() / chunks.len() as f32
}

/// Sort by relevance, best first. Ties keep their order.
pub(crate) fn sort_by_relevance(chunks: &mut [Chunk]) {
    chunks.sort_by(|a, b| {
        b.relevance
            .unwrap_or(0.0)
            .total_cmp(&a.relevance.unwrap_or(0.0))
    });
}

/// Documents of the chunks, in order of first appearance.
pub(crate) fn documents_of(
    chunks: &[Chunk],
    catalog: &HashMap<String, DocumentRef>,
) -> Vec<DocumentRef> {
    let mut documents: Vec<DocumentRef> = Vec::new();
    for chunk in chunks {
        if documents.iter().any(|d| d.id == chunk.document_id) {
            continue;
        }
        let document = catalog.get(&chunk.document_id).cloned().unwrap_or_else(|| DocumentRef {
            id: chunk.document_id.clone(),
            title: chunk.document_id.clone(),
            content_type: ContentType::default(),
            summary: None,
        });
        documents.push(document);
    }
    documents
}


#[cfg(test)]
mod tests {
    use super::test_support::chunk;
    use super::*;
    use crate::retrieval::intent::IntentAnalyzer;

    #[test]
    fn test_pack_greedy_skips_chunks_that_do_not_fit() {
        let chunks = vec![chunk("a", 40, 0.9), chunk("a", 70, 0.8), chunk("b", 50, 0.7)];
        let selected = pack_greedy(chunks, 100);
        let tokens: Vec<usize> = selected.iter().map(|c| c.tokens).collect();
        assert_eq!(tokens, vec![40, 50]);
    }

    #[test]
    fn test_pack_in_order_stops_at_first_overflow() {
        let chunks = vec![chunk("a", 40, 0.9), chunk("a", 70, 0.8), chunk("a", 10, 0.7)];
        let selected = pack_in_order(chunks, 100);
        assert_eq!(selected.len(), 1);
        assert!(pack_in_order(vec![chunk("a", 1, 0.1)], 0).is_empty());
    }

    #[test]
    fn test_mean_relevance_and_documents() {
        let chunks = vec![chunk("b", 1, 0.8), chunk("a", 1, 0.4), chunk("b", 1, 0.6)];
        assert!((mean_relevance(&chunks) - 0.6).abs() < 1e-6);
        assert_eq!(mean_relevance(&[]), 0.0);

        let ids: Vec<String> = documents_of(&chunks, &HashMap::new())
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_chunk_filter() {
        let analysis = IntentAnalyzer::new().analyze("show me the parse function");
        let request = StrategyRequest {
            query: "show me the parse function",
            analysis: &analysis,
            budget: 100,
            content_types: &[ContentType::Code],
        };
        let filter = request.chunk_filter().unwrap();
        assert_eq!(filter.must.len(), 2);

        let analysis = IntentAnalyzer::new().analyze("why is it slow");
        let request = StrategyRequest {
            query: "why is it slow",
            analysis: &analysis,
            budget: 100,
            content_types: &[],
        };
        assert!(request.chunk_filter().is_none());
    }
}
