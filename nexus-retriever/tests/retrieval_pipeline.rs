//! End-to-end tests: ingest a small corpus into in-memory stores and query it
//! through the retrieval engine.

use async_trait::async_trait;
use nexus_chunker::{ChunkingConfig, ChunkingEngine, ContentType, DocumentMetadata};
use nexus_embed::{
    EmbedOptions, EmbeddingProvider, EmbeddingResult, HashingProvider, RankedIndex,
};
use nexus_retriever::config::{FullDocumentConfig, GraphConfig, RetrievalConfig};
use nexus_retriever::retrieval::QueryIntent;
use nexus_retriever::storage::memory::{
    InMemoryCache, InMemoryDocumentStore, InMemoryGraphStore, InMemoryVectorStore,
};
use nexus_retriever::{
    DocumentIngestor, RetrievalEngine, RetrievalError, RetrievalStrategyKind, RetrieveOptions,
    Stores,
};
use std::path::Path;
use std::sync::Arc;

const PARSER: &str = r#"import { Buffer } from "buffer";

function parseHeader(buf) {
  const version = buf[0];
  return { version, length: buf.readUInt16BE(1) };
}

function parseBody(buf, header) {
  return buf.subarray(3, 3 + header.length);
}
"#;

const GUIDE: &str = "# Operations Guide

Important: this guide covers deployment and retries for the ingest service.

## Deployment

Deploy the service with the release tarball and restart the workers.

## Retries

Failed uploads retry with exponential backoff. The retry budget is five attempts.

### Tuning

Raise the backoff ceiling when the upstream store is slow.

## Monitoring

Watch the queue depth and the retry counter on the dashboard.
";

const NOTES: &str = "Meeting notes. The team agreed to move the retry budget into configuration. \
Backoff tuning is tracked separately. Nobody likes pager duty.";

/// Embeds with feature hashing but gives every reranked passage the same
/// score, so the relevance a strategy reports is known in advance.
struct FixedRerank {
    inner: HashingProvider,
    score: f32,
}

#[async_trait]
impl EmbeddingProvider for FixedRerank {
    async fn embed_batch(
        &self,
        texts: &[String],
        options: &EmbedOptions,
    ) -> nexus_embed::Result<EmbeddingResult> {
        self.inner.embed_batch(texts, options).await
    }

    async fn rerank(
        &self,
        _query: &str,
        documents: &[String],
        top_k: usize,
    ) -> nexus_embed::Result<Vec<RankedIndex>> {
        Ok((0..documents.len().min(top_k))
            .map(|index| RankedIndex {
                index,
                score: self.score,
            })
            .collect())
    }

    fn embedding_dimension(&self) -> usize {
        self.inner.embedding_dimension()
    }

    fn provider_name(&self) -> &str {
        "fixed-rerank"
    }
}

struct Fixture {
    vectors: Arc<InMemoryVectorStore>,
    graph: Arc<InMemoryGraphStore>,
    stores: Stores,
    provider: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
}

impl Fixture {
    async fn engine(&self) -> RetrievalEngine {
        RetrievalEngine::new(
            self.provider.clone(),
            self.stores.clone(),
            Arc::new(InMemoryCache::default()),
            self.config.clone(),
        )
        .await
        .unwrap()
    }
}

async fn fixture_with(provider: Arc<dyn EmbeddingProvider>, config: RetrievalConfig) -> Fixture {
    let vectors = Arc::new(InMemoryVectorStore::new());
    let graph = Arc::new(InMemoryGraphStore::new());
    let documents = Arc::new(InMemoryDocumentStore::new());
    let stores = Stores {
        vectors: vectors.clone(),
        graph: graph.clone(),
        documents,
    };

    let ingestor = DocumentIngestor::new(
        ChunkingEngine::new(ChunkingConfig::new(60)),
        provider.clone(),
        stores.clone(),
        config.clone(),
    );
    let corpus = [
        (PARSER, DocumentMetadata::from_path("parser", Path::new("parser.js"))),
        (
            GUIDE,
            DocumentMetadata::new("guide", "Operations Guide", ContentType::Markdown),
        ),
        (NOTES, DocumentMetadata::new("notes", "Meeting Notes", ContentType::Text)),
    ];
    for (content, metadata) in corpus {
        ingestor.ingest(content, &metadata).await.unwrap();
    }

    Fixture {
        vectors,
        graph,
        stores,
        provider,
        config,
    }
}

async fn fixture() -> Fixture {
    fixture_with(Arc::new(HashingProvider::default()), RetrievalConfig::default()).await
}

fn open_graph() -> GraphConfig {
    GraphConfig {
        seed_threshold: -1.0,
        ..GraphConfig::default()
    }
}

#[tokio::test]
async fn test_code_query_returns_the_function() {
    let fixture = fixture().await;
    let engine = fixture.engine().await;

    let result = engine
        .retrieve(
            "show me the code for the parseHeader function",
            &RetrieveOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.metadata.intent, QueryIntent::CodeSearch);
    assert_eq!(result.metadata.strategy, RetrievalStrategyKind::SemanticChunks);
    assert!(result.content.contains("function parseHeader(buf)"));
    assert_eq!(result.metadata.documents[0].title, "parser.js");
    assert!(result.metadata.tokens <= QueryIntent::CodeSearch.estimated_tokens());
}

#[tokio::test]
async fn test_results_never_exceed_the_budget() {
    let fixture = fixture().await;
    let engine = fixture.engine().await;

    for budget in [0, 10, 50, 200, 1000] {
        for strategy in RetrievalStrategyKind::ALL {
            let options = RetrieveOptions::default()
                .with_max_tokens(budget)
                .with_strategy(strategy);
            let result = engine.retrieve("how do retries back off", &options).await.unwrap();
            assert!(
                result.metadata.tokens <= budget,
                "{strategy} returned {} tokens for a budget of {budget}",
                result.metadata.tokens
            );
            assert_eq!(
                result.metadata.tokens,
                nexus_chunker::estimate_tokens(&result.content)
            );
        }
    }
}

#[tokio::test]
async fn test_adaptive_skips_graph_when_relevance_is_high() {
    let provider = Arc::new(FixedRerank {
        inner: HashingProvider::default(),
        score: 0.9,
    });
    let fixture = fixture_with(provider, RetrievalConfig::default().with_graph(open_graph())).await;
    let engine = fixture.engine().await;

    let result = engine
        .retrieve("why do uploads retry", &RetrieveOptions::default())
        .await
        .unwrap();

    assert_eq!(result.metadata.strategy, RetrievalStrategyKind::Adaptive);
    assert!((result.relevance - 0.9).abs() < 1e-6);
    assert_eq!(fixture.graph.traversal_count(), 0);
    assert!(!result.metadata.counters.contains_key("graph_invoked"));
}

#[tokio::test]
async fn test_adaptive_adds_graph_when_relevance_is_low() {
    let provider = Arc::new(FixedRerank {
        inner: HashingProvider::default(),
        score: 0.2,
    });
    let fixture = fixture_with(provider, RetrievalConfig::default().with_graph(open_graph())).await;
    let engine = fixture.engine().await;

    let result = engine
        .retrieve("why do uploads retry", &RetrieveOptions::default())
        .await
        .unwrap();

    assert_eq!(result.metadata.strategy, RetrievalStrategyKind::Adaptive);
    assert_eq!(fixture.graph.traversal_count(), 1);
    assert_eq!(result.metadata.counters.get("graph_invoked"), Some(&1));
    assert!(!result.chunks.is_empty());
}

#[tokio::test]
async fn test_repeated_query_is_served_from_cache() {
    let fixture = fixture().await;
    let engine = fixture.engine().await;
    let options = RetrieveOptions::default().with_max_tokens(500);

    let first = engine.retrieve("how do retries back off", &options).await.unwrap();
    let searches = fixture.vectors.search_count();
    let traversals = fixture.graph.traversal_count();

    // Case and spacing do not change the cache key.
    let second = engine.retrieve("How do  retries back off", &options).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(fixture.vectors.search_count(), searches);
    assert_eq!(fixture.graph.traversal_count(), traversals);
    let stats = engine.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);

    assert_eq!(engine.clear_cache().await.unwrap(), 1);
    engine.retrieve("how do retries back off", &options).await.unwrap();
    assert!(fixture.vectors.search_count() > searches);
}

#[tokio::test]
async fn test_concurrent_identical_queries_run_once() {
    let fixture = fixture().await;
    let options = RetrieveOptions::default().with_max_tokens(500);
    let query = "how do retries back off";

    let baseline = fixture.vectors.search_count();
    fixture.engine().await.retrieve(query, &options).await.unwrap();
    let per_run = fixture.vectors.search_count() - baseline;
    assert!(per_run > 0);

    let engine = fixture.engine().await;
    let before = fixture.vectors.search_count();
    let (a, b) = tokio::join!(engine.retrieve(query, &options), engine.retrieve(query, &options));

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(fixture.vectors.search_count() - before, per_run);
    let stats = engine.cache_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits + stats.coalesced, 1);
}

#[tokio::test]
async fn test_unreachable_cache_fails_construction() {
    let fixture = fixture().await;
    let outcome = RetrievalEngine::new(
        fixture.provider.clone(),
        fixture.stores.clone(),
        Arc::new(InMemoryCache::unreachable("cache.internal", 6390)),
        fixture.config.clone(),
    )
    .await;

    match outcome {
        Err(RetrievalError::CacheUnavailable { host, port, .. }) => {
            assert_eq!(host, "cache.internal");
            assert_eq!(port, 6390);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("engine built without a cache"),
    }
}

#[tokio::test]
async fn test_named_document_is_returned_whole() {
    let fixture = fixture().await;
    let engine = fixture.engine().await;

    let result = engine
        .retrieve(
            r#"show me the entire document "operations guide""#,
            &RetrieveOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.metadata.intent, QueryIntent::FullDocument);
    assert_eq!(result.metadata.strategy, RetrievalStrategyKind::FullDocument);
    assert_eq!(result.metadata.fallback, None);
    assert_eq!(result.relevance, 1.0);
    assert_eq!(result.metadata.documents.len(), 1);
    assert_eq!(result.metadata.documents[0].title, "Operations Guide");
    assert!(result.content.starts_with("## Table of Contents"));
    assert!(result.content.contains(GUIDE.trim_end()));
}

#[tokio::test]
async fn test_named_document_is_cut_to_budget() {
    let fixture = fixture().await;
    let engine = fixture.engine().await;

    let result = engine
        .retrieve(
            r#"show me the entire document "operations guide""#,
            &RetrieveOptions::default().with_max_tokens(80),
        )
        .await
        .unwrap();

    assert_eq!(result.metadata.strategy, RetrievalStrategyKind::FullDocument);
    assert!(result.metadata.tokens <= 80);
    assert!(!result.content.contains(GUIDE.trim_end()));
    assert!(result.chunks.iter().all(|c| c.document_id == "guide"));
}

#[tokio::test]
async fn test_unknown_document_falls_back_to_semantic_chunks() {
    let config = RetrievalConfig {
        full_document: FullDocumentConfig {
            score_threshold: 0.99,
        },
        ..RetrievalConfig::default()
    };
    let fixture = fixture_with(Arc::new(HashingProvider::default()), config).await;
    let engine = fixture.engine().await;

    let result = engine
        .retrieve(
            r#"show me the entire document "Quarterly Budget""#,
            &RetrieveOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.metadata.strategy, RetrievalStrategyKind::FullDocument);
    assert_eq!(
        result.metadata.fallback,
        Some(RetrievalStrategyKind::SemanticChunks)
    );
    assert_eq!(result.metadata.counters.get("name_lookups"), Some(&1));
    assert!(!result.content.starts_with("## Table of Contents"));
}

#[tokio::test]
async fn test_summary_request_uses_outlines() {
    let fixture = fixture().await;
    let engine = fixture.engine().await;

    let result = engine
        .retrieve(
            "give me an overview of the operations guide",
            &RetrieveOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.metadata.intent, QueryIntent::SummaryRequest);
    assert_eq!(result.metadata.strategy, RetrievalStrategyKind::Hierarchical);
    assert_eq!(result.metadata.fallback, None);
    assert!(result.metadata.counters["summaries"] > 0);
    assert!(!result.metadata.documents.is_empty());
    assert!(result.metadata.tokens <= QueryIntent::SummaryRequest.estimated_tokens());
}

#[tokio::test]
async fn test_graph_traversal_walks_from_seeds() {
    let config = RetrievalConfig::default().with_graph(open_graph());
    let fixture = fixture_with(Arc::new(HashingProvider::default()), config).await;
    let engine = fixture.engine().await;

    let result = engine
        .retrieve(
            "how does the retry budget work",
            &RetrieveOptions::default().with_strategy(RetrievalStrategyKind::GraphTraversal),
        )
        .await
        .unwrap();

    assert_eq!(result.metadata.strategy, RetrievalStrategyKind::GraphTraversal);
    assert_eq!(result.metadata.fallback, None);
    assert!(result.metadata.counters["seeds"] > 0);
    assert_eq!(fixture.graph.traversal_count(), 1);
    assert!(!result.chunks.is_empty());
}

#[tokio::test]
async fn test_content_type_filter_limits_chunks() {
    let fixture = fixture().await;
    let engine = fixture.engine().await;

    let result = engine
        .retrieve(
            "retry budget",
            &RetrieveOptions::default()
                .with_strategy(RetrievalStrategyKind::SemanticChunks)
                .with_content_types(vec![ContentType::Markdown]),
        )
        .await
        .unwrap();

    assert!(!result.chunks.is_empty());
    assert!(result.chunks.iter().all(|c| c.document_id == "guide"));
    assert!(
        result
            .metadata
            .documents
            .iter()
            .all(|d| d.content_type == ContentType::Markdown)
    );
}

#[tokio::test]
async fn test_reingest_replaces_previous_version() {
    let fixture = fixture().await;
    let ingestor = DocumentIngestor::new(
        ChunkingEngine::new(ChunkingConfig::new(60)),
        fixture.provider.clone(),
        fixture.stores.clone(),
        fixture.config.clone(),
    );
    let metadata = DocumentMetadata::new("notes", "Meeting Notes", ContentType::Text);
    let report = ingestor
        .ingest("The retry budget moved to the zeppelin service.", &metadata)
        .await
        .unwrap();
    assert!(report.replaced_chunks > 0);

    let engine = fixture.engine().await;
    let result = engine
        .retrieve(
            "zeppelin",
            &RetrieveOptions::default().with_strategy(RetrievalStrategyKind::SemanticChunks),
        )
        .await
        .unwrap();
    let notes: Vec<&str> = result
        .chunks
        .iter()
        .filter(|c| c.document_id == "notes")
        .map(|c| c.content.as_str())
        .collect();
    assert_eq!(notes, vec!["The retry budget moved to the zeppelin service."]);
}
