//! Adaptive retrieval, the default strategy.
//!
//! Semantic chunks run first on part of the budget. When their relevance is
//! low, graph traversal runs on the rest and both result sets are merged.
//! Leftover budget is spent on document summaries when there is enough of it.

use super::{
    RetrievalContext, Retrieved, StrategyRequest, documents_of, graph_traversal, mean_relevance,
    pack_greedy, semantic_chunks, sort_by_relevance,
};
use anyhow::Result;
use nexus_chunker::{Chunk, estimate_tokens};
use std::collections::HashMap;
use tracing::debug;

pub async fn retrieve(context: &RetrievalContext, request: &StrategyRequest<'_>) -> Result<Retrieved> {
    let config = &context.config.adaptive;
    let semantic_budget = (request.budget as f32 * config.semantic_share).floor() as usize;
    let semantic = semantic_chunks::retrieve(context, &request.with_budget(semantic_budget)).await?;

    let mut out = if semantic.relevance < config.relevance_threshold {
        debug!(
            "Semantic relevance {:.2} below {:.2}; adding graph traversal",
            semantic.relevance, config.relevance_threshold
        );
        let graph_budget = request.budget.saturating_sub(semantic_budget);
        let graph = graph_traversal::retrieve(context, &request.with_budget(graph_budget)).await?;
        let mut merged = merge(semantic, graph, request.budget);
        merged.count("graph_invoked", 1);
        merged
    } else {
        semantic
    };

    let remaining = request.budget.saturating_sub(out.content_tokens());
    if remaining >= config.min_remaining_tokens {
        append_summaries(context, &mut out, remaining).await;
    }
    Ok(out)
}

/// Union of two results: one copy per chunk id with its best relevance,
/// re-sorted and re-packed into `budget`.
fn merge(first: Retrieved, second: Retrieved, budget: usize) -> Retrieved {
    let mut out = Retrieved::default();
    out.absorb_counters(&first.counters);
    out.absorb_counters(&second.counters);

    let catalog: HashMap<_, _> = first
        .documents
        .iter()
        .chain(&second.documents)
        .map(|doc| (doc.id.clone(), doc.clone()))
        .collect();

    let mut by_id: HashMap<String, Chunk> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for chunk in first.chunks.into_iter().chain(second.chunks) {
        match by_id.get_mut(&chunk.id) {
            Some(existing) => {
                if chunk.relevance > existing.relevance {
                    existing.relevance = chunk.relevance;
                }
            }
            None => {
                order.push(chunk.id.clone());
                by_id.insert(chunk.id.clone(), chunk);
            }
        }
    }
    let mut merged: Vec<Chunk> = order.iter().filter_map(|id| by_id.remove(id)).collect();
    sort_by_relevance(&mut merged);

    let selected = pack_greedy(merged, budget);
    out.count("merged", selected.len());
    out.relevance = mean_relevance(&selected);
    out.documents = documents_of(&selected, &catalog);
    out.chunks = selected;
    out
}

/// Attach document summaries while they fit in `remaining` tokens. Failures
/// end the attempt without affecting the result.
async fn append_summaries(context: &RetrievalContext, out: &mut Retrieved, remaining: usize) {
    let mut used = 0;
    let mut appended = 0;
    for document in out.documents.iter_mut() {
        match context.stores.documents.get_document_by_id(&document.id).await {
            Ok(Some(stored)) if !stored.summary.summary.is_empty() => {
                let tokens = estimate_tokens(&stored.summary.summary);
                if used + tokens > remaining {
                    break;
                }
                used += tokens;
                appended += 1;
                document.summary = Some(stored.summary.summary);
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Skipping document summaries: {:#}", e);
                break;
            }
        }
    }
    out.count("summaries_appended", appended);
}

#[cfg(test)]
mod tests {
    use super::super::test_support::chunk;
    use super::*;

    #[test]
    fn test_merge_keeps_best_relevance_once() {
        let shared = chunk("a", 10, 0.3);
        let mut boosted = shared.clone();
        boosted.relevance = Some(0.9);

        let first = Retrieved {
            chunks: vec![shared, chunk("a", 10, 0.5)],
            ..Retrieved::default()
        };
        let second = Retrieved {
            chunks: vec![boosted.clone(), chunk("b", 10, 0.1)],
            ..Retrieved::default()
        };

        let merged = merge(first, second, 25);
        assert_eq!(merged.chunks.len(), 2);
        assert_eq!(merged.chunks[0].id, boosted.id);
        assert_eq!(merged.chunks[0].relevance, Some(0.9));
        assert!((merged.relevance - 0.7).abs() < 1e-6);
        let ids: Vec<&str> = merged.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }
}
