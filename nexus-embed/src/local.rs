//! Local ONNX provider backed by FastEmbed.
//!
//! Models are downloaded on first use and run on a blocking thread. Both the
//! embedding model and the cross-encoder reranker are held behind a mutex
//! since FastEmbed needs exclusive access while running inference.

use crate::config::LocalModelConfig;
use crate::error::{ProviderError, Result};
use crate::provider::{
    EmbedOptions, EmbeddingProvider, EmbeddingResult, RankedIndex, normalize_to_f16,
};
use async_trait::async_trait;
use fastembed::{
    EmbeddingModel, InitOptions, RerankInitOptions, RerankerModel, TextEmbedding, TextRerank,
};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct FastEmbedProvider {
    config: LocalModelConfig,
    embedder: Arc<Mutex<TextEmbedding>>,
    reranker: Arc<Mutex<TextRerank>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("dimension", &self.dimension)
            .finish()
    }
}

fn embedding_model(name: &str) -> Result<EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        other => Err(ProviderError::invalid_config(format!(
            "unsupported local embedding model: {other}"
        ))),
    }
}

fn reranker_model(name: &str) -> Result<RerankerModel> {
    match name {
        "bge-reranker-base" => Ok(RerankerModel::BGERerankerBase),
        "jina-reranker-v1-turbo-en" => Ok(RerankerModel::JINARerankerV1TurboEn),
        other => Err(ProviderError::invalid_config(format!(
            "unsupported local reranker model: {other}"
        ))),
    }
}

impl FastEmbedProvider {
    /// Load (downloading if needed) both models.
    pub async fn create(config: LocalModelConfig) -> Result<Self> {
        let embed_model = embedding_model(&config.embedding_model)?;
        let rerank_model = reranker_model(&config.rerank_model)?;
        let show_progress = config.show_download_progress;

        tracing::info!(
            "Loading local models: {} / {}",
            config.embedding_model,
            config.rerank_model
        );

        let (embedder, reranker, dimension) = tokio::task::spawn_blocking(
            move || -> Result<(TextEmbedding, TextRerank, usize)> {
                let mut embedder = TextEmbedding::try_new(
                    InitOptions::new(embed_model).with_show_download_progress(show_progress),
                )?;
                let reranker = TextRerank::try_new(
                    RerankInitOptions::new(rerank_model).with_show_download_progress(show_progress),
                )?;

                let probe = embedder.embed(vec!["dimension probe".to_string()], None)?;
                let dimension = probe.first().map(|e| e.len()).unwrap_or(0);
                if dimension == 0 {
                    return Err(ProviderError::malformed("model produced an empty embedding"));
                }
                Ok((embedder, reranker, dimension))
            },
        )
        .await??;

        tracing::info!("Local models loaded. Dimension: {}", dimension);
        Ok(Self {
            config,
            embedder: Arc::new(Mutex::new(embedder)),
            reranker: Arc::new(Mutex::new(reranker)),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_batch(
        &self,
        texts: &[String],
        _options: &EmbedOptions,
    ) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let batch = batch.to_vec();
            let embedder = Arc::clone(&self.embedder);
            let vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                tracing::debug!("Processing batch of {} texts", batch.len());
                let mut guard = embedder
                    .lock()
                    .map_err(|_| ProviderError::malformed("embedding model lock poisoned"))?;
                Ok(guard.embed(batch, None)?)
            })
            .await??;
            all_embeddings.extend(vectors.iter().map(|v| normalize_to_f16(v)));
        }

        Ok(EmbeddingResult::new(all_embeddings))
    }

    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<RankedIndex>> {
        if documents.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let query = query.to_string();
        let documents = documents.to_vec();
        let reranker = Arc::clone(&self.reranker);
        let results = tokio::task::spawn_blocking(move || -> Result<Vec<RankedIndex>> {
            let mut guard = reranker
                .lock()
                .map_err(|_| ProviderError::malformed("reranker lock poisoned"))?;
            let docs: Vec<&str> = documents.iter().map(String::as_str).collect();
            let results = guard.rerank(query.as_str(), docs, false, None)?;
            Ok(results
                .into_iter()
                .map(|r| RankedIndex {
                    index: r.index,
                    score: r.score,
                })
                .collect())
        })
        .await??;

        let mut ranked = results;
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(top_k);
        Ok(ranked)
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_name_mapping() {
        assert!(embedding_model("all-minilm-l6-v2").is_ok());
        assert!(reranker_model("bge-reranker-base").is_ok());
        assert!(matches!(
            embedding_model("nope"),
            Err(ProviderError::InvalidConfig { .. })
        ));
    }
}
