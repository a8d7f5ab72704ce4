//! Hierarchical retrieval: document outlines first, then detail chunks from
//! the documents whose outlines were accepted.

use super::{
    RetrievalContext, Retrieved, StrategyRequest, documents_of, mean_relevance, pack_greedy,
    semantic_chunks,
};
use crate::retrieval::model::{DocumentRef, RetrievalStrategyKind};
use crate::storage::{CONTENT_TYPE, DOCUMENT_ID, PayloadFilter, VectorSearch, payload_document};
use anyhow::{Context, Result};
use futures::future::try_join_all;
use nexus_chunker::estimate_tokens;
use nexus_embed::EmbedOptions;
use std::collections::HashMap;
use tracing::debug;

pub async fn retrieve(context: &RetrievalContext, request: &StrategyRequest<'_>) -> Result<Retrieved> {
    let config = &context.config;
    let mut out = Retrieved::default();

    let probe = format!("Summary: {}", request.query);
    let vector = context
        .provider
        .embed(&probe, &EmbedOptions::query())
        .await
        .context("Failed to embed summary probe")?;
    let mut filter = PayloadFilter::new();
    if !request.content_types.is_empty() {
        filter = filter.with_any(CONTENT_TYPE, request.content_types.iter().map(|c| c.as_str()));
    }
    let search = VectorSearch::new(vector, config.hierarchical.summary_limit)
        .with_filter((!filter.is_empty()).then_some(filter));
    let hits = context
        .stores
        .vectors
        .search(&config.collections.summaries, search)
        .await
        .context("Summary search failed")?;
    out.count("summaries", hits.len());

    if hits.is_empty() {
        debug!("No summary matched; falling back to semantic chunks");
        let mut fallback = semantic_chunks::retrieve(context, request)
            .await?
            .as_fallback(RetrievalStrategyKind::SemanticChunks);
        fallback.absorb_counters(&out.counters);
        return Ok(fallback);
    }

    let matched: Vec<(DocumentRef, f32)> = hits
        .iter()
        .filter_map(|hit| payload_document(&hit.payload).map(|doc| (doc, hit.score)))
        .collect();

    let documents = &context.stores.documents;
    let outlines = try_join_all(
        matched
            .iter()
            .map(|(doc, _)| documents.get_document_outline(&doc.id)),
    )
    .await
    .context("Failed to load document outlines")?;

    let outline_budget = (request.budget as f32 * config.hierarchical.outline_share).floor() as usize;
    let mut used = 0;
    let mut accepted: Vec<(String, f32)> = Vec::new();
    for ((doc, score), outline) in matched.iter().zip(outlines) {
        let Some(outline) = outline else {
            continue;
        };
        let tokens = estimate_tokens(&outline.to_markdown());
        if used + tokens > outline_budget {
            break;
        }
        used += tokens;
        accepted.push((doc.id.clone(), *score));
        out.outlines.push((doc.id.clone(), outline));
    }
    out.count("outlines", out.outlines.len());

    // Detail chunks come from the accepted documents, or from every matched
    // document when no outline fit.
    let scope: Vec<&str> = if accepted.is_empty() {
        matched.iter().map(|(doc, _)| doc.id.as_str()).collect()
    } else {
        accepted.iter().map(|(id, _)| id.as_str()).collect()
    };
    let filter = request
        .chunk_filter()
        .unwrap_or_default()
        .with_any(DOCUMENT_ID, scope);
    let candidates =
        semantic_chunks::ranked_chunks(context, request.query, Some(filter), false, &mut out)
            .await?;
    let selected = pack_greedy(candidates.chunks, request.budget.saturating_sub(used));
    out.count("selected", selected.len());

    out.relevance = if selected.is_empty() {
        accepted.iter().map(|(_, score)| score).sum::<f32>() / accepted.len().max(1) as f32
    } else {
        mean_relevance(&selected)
    };

    // Documents in summary rank order: those with an outline or a selected chunk.
    let with_chunks: HashMap<String, DocumentRef> = documents_of(&selected, &candidates.documents)
        .into_iter()
        .map(|doc| (doc.id.clone(), doc))
        .collect();
    out.documents = matched
        .into_iter()
        .map(|(doc, _)| doc)
        .filter(|doc| {
            with_chunks.contains_key(&doc.id) || accepted.iter().any(|(id, _)| *id == doc.id)
        })
        .collect();
    out.chunks = selected;

    debug!(
        "Hierarchical retrieval accepted {} outlines ({} tokens) and {} chunks",
        out.outlines.len(),
        used,
        out.chunks.len()
    );
    Ok(out)
}
