//! Semantic chunk retrieval: vector search, cross-encoder rerank, greedy pack.

use super::{
    RetrievalContext, Retrieved, StrategyRequest, documents_of, mean_relevance, pack_greedy,
};
use crate::retrieval::model::DocumentRef;
use crate::storage::{PayloadFilter, VectorSearch, payload_chunk, payload_document};
use anyhow::{Context, Result};
use nexus_chunker::Chunk;
use nexus_embed::EmbedOptions;
use std::collections::HashMap;
use tracing::debug;

/// Reranked chunks, best first, with the documents they belong to.
#[derive(Debug, Default)]
pub(crate) struct Candidates {
    pub chunks: Vec<Chunk>,
    pub documents: HashMap<String, DocumentRef>,
}

/// Search the chunk collection and rerank the hits against the query.
///
/// With `retry_unfiltered`, a filtered search that finds nothing is repeated
/// without the filter.
pub(crate) async fn ranked_chunks(
    context: &RetrievalContext,
    query: &str,
    filter: Option<PayloadFilter>,
    retry_unfiltered: bool,
    out: &mut Retrieved,
) -> Result<Candidates> {
    let config = &context.config;
    let vector = context
        .provider
        .embed(query, &EmbedOptions::query())
        .await
        .context("Failed to embed query")?;

    let filtered = filter.is_some();
    let search = VectorSearch::new(vector, config.semantic.candidate_limit).with_filter(filter);
    let mut hits = context
        .stores
        .vectors
        .search(&config.collections.chunks, search.clone())
        .await
        .context("Chunk search failed")?;
    if hits.is_empty() && filtered && retry_unfiltered {
        debug!("Filtered chunk search found nothing; retrying without filter");
        out.count("unfiltered_retry", 1);
        hits = context
            .stores
            .vectors
            .search(&config.collections.chunks, search.with_filter(None))
            .await
            .context("Chunk search failed")?;
    }
    out.count("candidates", hits.len());

    let mut documents = HashMap::new();
    let pool: Vec<Chunk> = hits
        .iter()
        .filter_map(|hit| {
            let chunk = payload_chunk(&hit.payload)?;
            if let Some(document) = payload_document(&hit.payload) {
                documents.entry(document.id.clone()).or_insert(document);
            }
            Some(chunk)
        })
        .collect();
    if pool.is_empty() {
        return Ok(Candidates::default());
    }

    let passages: Vec<String> = pool.iter().map(|c| c.content.clone()).collect();
    let ranked = context
        .provider
        .rerank(query, &passages, config.semantic.rerank_top_k)
        .await
        .context("Rerank failed")?;
    out.count("reranked", ranked.len());

    let chunks = ranked
        .iter()
        .filter_map(|r| {
            pool.get(r.index).map(|chunk| Chunk {
                relevance: Some(r.score),
                ..chunk.clone()
            })
        })
        .collect();

    Ok(Candidates { chunks, documents })
}

pub async fn retrieve(context: &RetrievalContext, request: &StrategyRequest<'_>) -> Result<Retrieved> {
    let mut out = Retrieved::default();
    let candidates = ranked_chunks(
        context,
        request.query,
        request.chunk_filter(),
        true,
        &mut out,
    )
    .await?;

    let selected = pack_greedy(candidates.chunks, request.budget);
    out.count("selected", selected.len());
    out.relevance = mean_relevance(&selected);
    out.documents = documents_of(&selected, &candidates.documents);
    out.chunks = selected;

    debug!(
        "Semantic retrieval selected {} chunks from {} documents (relevance {:.2})",
        out.chunks.len(),
        out.documents.len(),
        out.relevance
    );
    Ok(out)
}
