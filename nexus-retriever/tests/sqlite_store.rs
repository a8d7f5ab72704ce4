//! Documents ingested into a SQLite database survive reopening it and can be
//! served by the retrieval engine.

use nexus_chunker::{ChunkingConfig, ChunkingEngine, ContentType, DocumentMetadata};
use nexus_embed::{EmbeddingProvider, HashingProvider};
use nexus_retriever::storage::DocumentStore;
use nexus_retriever::storage::memory::InMemoryCache;
use nexus_retriever::storage::sqlite_store::SqliteDocumentStore;
use nexus_retriever::{
    DocumentIngestor, RetrievalConfig, RetrievalEngine, RetrievalStrategyKind, RetrieveOptions,
    Stores,
};
use std::sync::Arc;
use tempfile::tempdir;

const RUNBOOK: &str = "# Incident Runbook

## Paging

Page the on-call engineer through the escalation policy.

## Rollback

Roll back by redeploying the previous release tag.
";

#[tokio::test]
async fn test_documents_persist_across_reopen() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("documents.db");
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashingProvider::default());
    let metadata = DocumentMetadata::new("runbook", "Incident Runbook", ContentType::Markdown);

    let report = {
        let documents = SqliteDocumentStore::open(&path).await?;
        let stores = Stores::in_memory().with_documents(Arc::new(documents.clone()));
        let ingestor = DocumentIngestor::new(
            ChunkingEngine::new(ChunkingConfig::new(40)),
            provider.clone(),
            stores,
            RetrievalConfig::default(),
        );
        let report = ingestor.ingest(RUNBOOK, &metadata).await?;
        assert!(documents.ingested_at("runbook").await?.is_some());
        documents.pool().close().await;
        report
    };

    let documents = SqliteDocumentStore::open(&path).await?;
    let stored = documents
        .get_document_by_name("incident runbook")
        .await?
        .expect("document saved");
    assert_eq!(stored.content, RUNBOOK);
    assert_eq!(stored.metadata.content_type, ContentType::Markdown);
    assert_eq!(stored.outline.title, "Incident Runbook");

    let chunks = documents.get_chunks_for_document("runbook").await?;
    assert_eq!(chunks.len(), report.chunks);
    assert!(chunks.iter().all(|c| c.embedding.is_some()));
    assert!(chunks.windows(2).all(|w| w[0].position.start <= w[1].position.start));

    // The document can be served whole from the reopened database.
    let engine = RetrievalEngine::new(
        provider,
        Stores::in_memory().with_documents(Arc::new(documents)),
        Arc::new(InMemoryCache::default()),
        RetrievalConfig::default(),
    )
    .await?;
    let result = engine
        .retrieve(
            r#"show me the whole document "Incident Runbook""#,
            &RetrieveOptions::default(),
        )
        .await?;
    assert_eq!(result.metadata.strategy, RetrievalStrategyKind::FullDocument);
    assert_eq!(result.metadata.fallback, None);
    assert!(result.content.contains("Roll back by redeploying the previous release tag."));
    Ok(())
}
