//! nexus-retriever: retrieval-augmented generation core
//!
//! Documents are chunked by `nexus-chunker`, embedded by `nexus-embed` and
//! written to vector, graph and document stores by the [`ingest`] pipeline.
//! At query time the [`retrieval`] engine analyzes the query, picks a
//! strategy and assembles a context string that fits a token budget.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: Intent analysis, strategies, result optimizer and query cache
//! - **[`ingest`]**: Chunk, embed and store documents
//! - **[`storage`]**: Store traits with in-memory and SQLite implementations
//! - **[`config`]**: TOML configuration for chunking and retrieval
//! - **[`error`]**: Errors callers match on
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nexus_chunker::{ChunkingEngine, ContentType, DocumentMetadata};
//! use nexus_embed::HashingProvider;
//! use nexus_retriever::storage::memory::InMemoryCache;
//! use nexus_retriever::{DocumentIngestor, NexusConfig, RetrievalEngine, RetrieveOptions, Stores};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = NexusConfig::default();
//! let provider = Arc::new(HashingProvider::default());
//! let stores = Stores::in_memory();
//!
//! let ingestor = DocumentIngestor::new(
//!     ChunkingEngine::new(config.chunking.clone()),
//!     provider.clone(),
//!     stores.clone(),
//!     config.retrieval.clone(),
//! );
//! ingestor
//!     .ingest(
//!         "# Guide\n\nRetries back off exponentially.",
//!         &DocumentMetadata::new("guide", "Guide", ContentType::Markdown),
//!     )
//!     .await?;
//!
//! let engine = RetrievalEngine::new(
//!     provider,
//!     stores,
//!     Arc::new(InMemoryCache::default()),
//!     config.retrieval,
//! )
//! .await?;
//! let result = engine
//!     .retrieve("how do retries work", &RetrieveOptions::default().with_max_tokens(500))
//!     .await?;
//! println!("{}", result.content);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Document → ChunkingEngine → EmbeddingProvider → VectorStore / GraphStore / DocumentStore
//!                                                              ↓
//! Query → QueryCache → IntentAnalyzer → Strategy → ResultOptimizer → RetrievalResult
//! ```

pub mod config;
pub mod error;
pub mod ingest;
pub mod retrieval;
pub mod storage;

pub use config::{NexusConfig, RetrievalConfig};
pub use error::RetrievalError;
pub use ingest::{DocumentIngestor, IngestReport};
pub use retrieval::{RetrievalEngine, RetrievalResult, RetrievalStrategyKind, RetrieveOptions};
pub use storage::Stores;
