//! The retrieval engine: one entry point from query to LLM-ready context.
//!
//! ```text
//! query → cache ─hit──────────────────────────────────────→ result
//!           └miss→ IntentAnalyzer → select_strategy → strategy → optimize
//! ```

use crate::config::RetrievalConfig;
use crate::error::RetrievalError;
use crate::retrieval::cache::{CacheStats, QueryCache, cache_key};
use crate::retrieval::intent::{IntentAnalyzer, QueryAnalysis};
use crate::retrieval::model::{RetrievalResult, RetrieveOptions};
use crate::retrieval::optimizer;
use crate::retrieval::selector::select_strategy;
use crate::retrieval::strategies::{self, RetrievalContext, StrategyRequest};
use crate::storage::{CacheBackend, Stores};
use anyhow::{Context, Result};
use nexus_embed::EmbeddingProvider;
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct RetrievalEngine {
    context: RetrievalContext,
    analyzer: IntentAnalyzer,
    cache: QueryCache,
}

impl RetrievalEngine {
    /// Build an engine over the given provider and stores.
    ///
    /// Fails with [`RetrievalError::CacheUnavailable`] when the cache backend
    /// does not answer.
    pub async fn new(
        provider: Arc<dyn EmbeddingProvider>,
        stores: Stores,
        cache_backend: Arc<dyn CacheBackend>,
        config: RetrievalConfig,
    ) -> Result<Self, RetrievalError> {
        let cache = QueryCache::connect(cache_backend, config.cache.ttl()).await?;
        info!(
            "Retrieval engine ready (provider {}, cache ttl {}s)",
            provider.provider_name(),
            config.cache.ttl_secs
        );
        Ok(Self {
            context: RetrievalContext {
                provider,
                stores,
                config,
            },
            analyzer: IntentAnalyzer::new(),
            cache,
        })
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.context.config
    }

    pub fn analyze(&self, query: &str) -> QueryAnalysis {
        self.analyzer.analyze(query)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub async fn clear_cache(&self) -> Result<usize> {
        let removed = self.cache.clear().await?;
        info!("Cleared {} cached results", removed);
        Ok(removed)
    }

    /// Retrieve context for `query` within the token budget of `options`.
    pub async fn retrieve(&self, query: &str, options: &RetrieveOptions) -> Result<RetrievalResult> {
        let key = cache_key(query, options);
        let result = self
            .cache
            .get_or_compute(&key, || self.execute(query, options))
            .await;
        if let Err(e) = &result {
            error!("Retrieval failed for {:?}: {:#}", query, e);
        }
        result
    }

    async fn execute(&self, query: &str, options: &RetrieveOptions) -> Result<RetrievalResult> {
        let analysis = self.analyzer.analyze(query);
        let strategy = select_strategy(&analysis, options);
        let budget = options.max_tokens.unwrap_or(analysis.estimated_tokens);
        info!(
            "Retrieving with {} for {} query (budget {} tokens)",
            strategy, analysis.intent, budget
        );

        let request = StrategyRequest {
            query,
            analysis: &analysis,
            budget,
            content_types: &options.content_types,
        };
        let retrieved = strategies::run(strategy, &self.context, &request)
            .await
            .with_context(|| format!("{strategy} retrieval failed"))?;
        debug!(
            "{} selected {} chunks from {} documents",
            strategy,
            retrieved.chunks.len(),
            retrieved.documents.len()
        );

        Ok(optimizer::optimize(strategy, retrieved, analysis.intent, budget))
    }
}
