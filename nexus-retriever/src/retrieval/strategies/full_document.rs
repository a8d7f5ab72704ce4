//! Whole-document retrieval.
//!
//! The document is the one named in the query, else the best vector match
//! above the configured threshold. Its full text is returned when it fits,
//! otherwise its chunks in document order until the budget runs out.

use super::{RetrievalContext, Retrieved, StrategyRequest, pack_in_order, semantic_chunks};
use crate::retrieval::intent::EntityKind;
use crate::retrieval::model::RetrievalStrategyKind;
use crate::retrieval::optimizer;
use crate::storage::{StoredDocument, VectorSearch};
use anyhow::{Context, Result};
use nexus_chunker::estimate_tokens;
use nexus_embed::EmbedOptions;
use tracing::debug;

async fn find_document(
    context: &RetrievalContext,
    request: &StrategyRequest<'_>,
    out: &mut Retrieved,
) -> Result<Option<(StoredDocument, f32)>> {
    let documents = &context.stores.documents;
    for name in request.analysis.entities_of(EntityKind::DocumentName) {
        out.count("name_lookups", 1);
        if let Some(document) = documents
            .get_document_by_name(name)
            .await
            .with_context(|| format!("Failed to look up document {name:?}"))?
        {
            debug!("Query names document {}", document.id());
            return Ok(Some((document, 1.0)));
        }
    }

    let config = &context.config;
    let vector = context
        .provider
        .embed(request.query, &EmbedOptions::query())
        .await
        .context("Failed to embed query")?;
    let search = VectorSearch::new(vector, 1).with_score_threshold(config.full_document.score_threshold);
    let hits = context
        .stores
        .vectors
        .search(&config.collections.documents, search)
        .await
        .context("Document search failed")?;
    let Some(best) = hits.into_iter().next() else {
        return Ok(None);
    };

    let document = documents
        .get_document_by_id(&best.id)
        .await
        .with_context(|| format!("Failed to load document {}", best.id))?;
    Ok(document.map(|document| (document, best.score)))
}

pub async fn retrieve(context: &RetrievalContext, request: &StrategyRequest<'_>) -> Result<Retrieved> {
    let mut out = Retrieved::default();
    let Some((document, relevance)) = find_document(context, request, &mut out).await? else {
        debug!("No document matched; falling back to semantic chunks");
        let mut fallback = semantic_chunks::retrieve(context, request)
            .await?
            .as_fallback(RetrievalStrategyKind::SemanticChunks);
        fallback.absorb_counters(&out.counters);
        return Ok(fallback);
    };

    let document_ref = document.to_ref();
    let available = request
        .budget
        .saturating_sub(optimizer::header_tokens(std::slice::from_ref(&document_ref)));

    if estimate_tokens(&document.content) <= available {
        out.full_text = Some(document.content);
    } else {
        let chunks = context
            .stores
            .documents
            .get_chunks_for_document(document.id())
            .await
            .with_context(|| format!("Failed to load chunks of {}", document.metadata.id))?;
        out.chunks = pack_in_order(chunks, available)
            .into_iter()
            .map(|mut chunk| {
                chunk.embedding = None;
                chunk.relevance = Some(relevance);
                chunk
            })
            .collect();
        out.count("selected", out.chunks.len());
    }

    out.documents = vec![document_ref];
    out.relevance = relevance;
    Ok(out)
}
