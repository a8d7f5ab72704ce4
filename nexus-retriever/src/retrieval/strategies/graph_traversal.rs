//! Graph traversal retrieval: seed chunks by vector similarity, then walk the
//! relationship graph around them.

use super::{
    RetrievalContext, Retrieved, StrategyRequest, documents_of, mean_relevance, pack_greedy,
    semantic_chunks, sort_by_relevance,
};
use crate::retrieval::model::RetrievalStrategyKind;
use crate::storage::{VectorSearch, payload_chunk, payload_document};
use anyhow::{Context, Result};
use nexus_chunker::Chunk;
use nexus_embed::EmbedOptions;
use nexus_embed::hashing::terms;
use std::collections::{HashMap, HashSet};
use tracing::debug;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "that", "this", "what", "how", "why", "does", "are",
    "was", "were", "about", "into", "show", "tell", "give", "find", "where", "which", "when",
];

/// Query words worth matching against chunk text.
fn keywords(query: &str) -> HashSet<String> {
    terms(query)
        .filter(|term| term.chars().count() >= 3 && !STOPWORDS.contains(&term.as_str()))
        .collect()
}

pub async fn retrieve(context: &RetrievalContext, request: &StrategyRequest<'_>) -> Result<Retrieved> {
    let config = &context.config;
    let mut out = Retrieved::default();

    let vector = context
        .provider
        .embed(request.query, &EmbedOptions::query())
        .await
        .context("Failed to embed query")?;
    let filter = request.chunk_filter();
    let search = VectorSearch::new(vector, config.graph.max_seeds)
        .with_filter(filter.clone())
        .with_score_threshold(config.graph.seed_threshold);
    let seed_hits = context
        .stores
        .vectors
        .search(&config.collections.chunks, search)
        .await
        .context("Seed search failed")?;
    out.count("seeds", seed_hits.len());

    if seed_hits.is_empty() {
        debug!("No seed chunks; falling back to semantic chunks");
        let mut fallback = semantic_chunks::retrieve(context, request)
            .await?
            .as_fallback(RetrievalStrategyKind::SemanticChunks);
        fallback.absorb_counters(&out.counters);
        return Ok(fallback);
    }

    let mut catalog = HashMap::new();
    let mut pool: Vec<Chunk> = Vec::new();
    for hit in &seed_hits {
        if let Some(document) = payload_document(&hit.payload) {
            catalog.entry(document.id.clone()).or_insert(document);
        }
        if let Some(mut chunk) = payload_chunk(&hit.payload) {
            chunk.relevance = Some(hit.score);
            pool.push(chunk);
        }
    }

    let seed_ids: Vec<String> = seed_hits.iter().map(|hit| hit.id.clone()).collect();
    let graph_hits = context
        .stores
        .graph
        .traverse(&seed_ids, config.graph.max_depth, config.graph.traversal_limit)
        .await
        .context("Graph traversal failed")?;
    out.count("graph_hits", graph_hits.len());

    if !graph_hits.is_empty() {
        let ids: Vec<String> = graph_hits.iter().map(|hit| hit.chunk_id.clone()).collect();
        let points = context
            .stores
            .vectors
            .retrieve(&config.collections.chunks, &ids, false)
            .await
            .context("Failed to load traversed chunks")?;
        let points: HashMap<&str, _> = points.iter().map(|p| (p.id.as_str(), p)).collect();
        let keywords = keywords(request.query);

        let mut kept = 0;
        for hit in &graph_hits {
            let Some(point) = points.get(hit.chunk_id.as_str()) else {
                continue;
            };
            if filter.as_ref().is_some_and(|f| !f.matches(&point.payload)) {
                continue;
            }
            let Some(mut chunk) = payload_chunk(&point.payload) else {
                continue;
            };
            let keyword_match = terms(&chunk.content).any(|term| keywords.contains(&term));
            let relevant = chunk.metadata.importance > config.graph.importance_threshold
                || chunk.metadata.contains_key_info
                || keyword_match;
            if !relevant {
                continue;
            }
            if let Some(document) = payload_document(&point.payload) {
                catalog.entry(document.id.clone()).or_insert(document);
            }
            chunk.relevance = Some(hit.path_score / hit.distance.max(1) as f32);
            pool.push(chunk);
            kept += 1;
        }
        out.count("graph_kept", kept);
    }

    sort_by_relevance(&mut pool);
    let selected = pack_greedy(pool, request.budget);
    out.count("selected", selected.len());
    out.relevance = mean_relevance(&selected);
    out.documents = documents_of(&selected, &catalog);
    out.chunks = selected;

    debug!(
        "Graph retrieval selected {} chunks (relevance {:.2})",
        out.chunks.len(),
        out.relevance
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_drop_short_and_common_words() {
        let words = keywords("How does the retry budget work for uploads?");
        let mut words: Vec<String> = words.into_iter().collect();
        words.sort();
        assert_eq!(words, vec!["budget", "retry", "uploads", "work"]);
    }
}
