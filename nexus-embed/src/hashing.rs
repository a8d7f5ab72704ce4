//! Deterministic feature-hashing provider.
//!
//! [`HashingProvider`] needs no model files and no network. Each lowercase word
//! and each character trigram of a word is hashed with FNV into one of
//! `dimension` buckets with a hash-derived sign, and the resulting vector is
//! L2-normalized. Texts sharing vocabulary land close together, which is
//! enough for offline use of the retrieval pipeline and for tests.
//!
//! Reranking scores a document by the share of distinct query terms it
//! contains, so a document mentioning every query word scores 1.0.

use crate::error::Result;
use crate::provider::{
    EmbedOptions, Embedding, EmbeddingProvider, EmbeddingResult, RankedIndex, normalize_to_f16,
};
use async_trait::async_trait;
use fnv::FnvHasher;
use std::collections::HashSet;
use std::hash::Hasher;

const DEFAULT_DIMENSION: usize = 384;
const TRIGRAM_WEIGHT: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct HashingProvider {
    dimension: usize,
}

impl Default for HashingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl HashingProvider {
    /// Create a provider producing vectors of `dimension` components.
    /// A dimension of 0 is bumped to 1.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Embedding {
        let mut values = vec![0.0f32; self.dimension];
        for word in terms(text) {
            self.accumulate(&mut values, word.as_bytes(), 1.0);
            let chars: Vec<char> = word.chars().collect();
            if chars.len() > 3 {
                for window in chars.windows(3) {
                    let trigram: String = window.iter().collect();
                    self.accumulate(&mut values, trigram.as_bytes(), TRIGRAM_WEIGHT);
                }
            }
        }
        normalize_to_f16(&values)
    }

    fn accumulate(&self, values: &mut [f32], feature: &[u8], weight: f32) {
        let mut hasher = FnvHasher::default();
        hasher.write(feature);
        let hash = hasher.finish();
        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
        values[bucket] += sign * weight;
    }
}

/// Lowercase alphanumeric terms of a text. Underscores stay inside terms so
/// identifiers like `parse_header` survive intact.
pub fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

/// Share of distinct query terms present in `document`, in `[0, 1]`.
pub fn lexical_overlap(query: &str, document: &str) -> f32 {
    let query_terms: HashSet<String> = terms(query).collect();
    if query_terms.is_empty() {
        return 0.0;
    }
    let doc_terms: HashSet<String> = terms(document).collect();
    let hits = query_terms.intersection(&doc_terms).count();
    hits as f32 / query_terms.len() as f32
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    async fn embed_batch(
        &self,
        texts: &[String],
        _options: &EmbedOptions,
    ) -> Result<EmbeddingResult> {
        tracing::debug!("Hashing {} texts into {} buckets", texts.len(), self.dimension);
        let embeddings = texts.iter().map(|t| self.embed_one(t)).collect();
        Ok(EmbeddingResult::new(embeddings))
    }

    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<RankedIndex>> {
        let mut ranked: Vec<RankedIndex> = documents
            .iter()
            .enumerate()
            .map(|(index, doc)| RankedIndex {
                index,
                score: lexical_overlap(query, doc),
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.index.cmp(&b.index))
        });
        ranked.truncate(top_k);
        Ok(ranked)
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "hashing"
    }
}
