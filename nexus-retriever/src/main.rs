use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use nexus_chunker::{ChunkingEngine, ContentType, DocumentMetadata};
use nexus_embed::{EmbeddingProvider, HashingProvider};
use nexus_retriever::retrieval::selector::select_strategy;
use nexus_retriever::storage::memory::InMemoryCache;
use nexus_retriever::storage::sqlite_store::SqliteDocumentStore;
use nexus_retriever::{
    DocumentIngestor, NexusConfig, RetrievalEngine, RetrievalStrategyKind, RetrieveOptions, Stores,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Ingest documents and retrieve LLM-ready context for queries.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file with [chunking] and [retrieval] sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the intent analysis of a query and the strategy it selects
    Analyze {
        query: String,
    },
    /// Ingest files, then retrieve context for a query
    Query {
        query: String,
        /// Files to ingest before querying
        #[arg(short, long = "file", num_args = 1..)]
        files: Vec<PathBuf>,
        /// Token budget for the returned context
        #[arg(short, long)]
        max_tokens: Option<usize>,
        /// Force a strategy (full_document, semantic_chunks, hierarchical,
        /// graph_traversal, adaptive)
        #[arg(short, long)]
        strategy: Option<String>,
        /// Only return chunks of these content types
        #[arg(short = 't', long = "content-type")]
        content_types: Vec<String>,
        /// Prefer whole documents
        #[arg(long)]
        full_document: bool,
        /// Keep documents in this SQLite database
        #[arg(long)]
        db: Option<PathBuf>,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// The context string followed by a short report
    Text,
    /// The whole result as pretty JSON
    Json,
}

#[derive(Serialize)]
struct AnalyzeOutput {
    analysis: nexus_retriever::retrieval::QueryAnalysis,
    strategy: RetrievalStrategyKind,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => NexusConfig::load(path).await?,
        None => NexusConfig::default(),
    };

    match args.command {
        Commands::Analyze { query } => {
            let analysis = nexus_retriever::retrieval::IntentAnalyzer::new().analyze(&query);
            let strategy = select_strategy(&analysis, &RetrieveOptions::default());
            let output = AnalyzeOutput { analysis, strategy };
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Commands::Query {
            query,
            files,
            max_tokens,
            strategy,
            content_types,
            full_document,
            db,
            format,
        } => {
            let mut options = RetrieveOptions::default().with_content_types(
                content_types.iter().map(|t| ContentType::from_tag(t)).collect(),
            );
            if let Some(max_tokens) = max_tokens {
                options = options.with_max_tokens(max_tokens);
            }
            if let Some(strategy) = strategy {
                options = options.with_strategy(strategy.parse()?);
            }
            if full_document {
                options = options.with_full_document();
            }

            let mut stores = Stores::in_memory();
            if let Some(path) = &db {
                let documents = SqliteDocumentStore::open(path).await?;
                stores = stores.with_documents(Arc::new(documents));
            }
            let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashingProvider::default());

            let ingestor = DocumentIngestor::new(
                ChunkingEngine::new(config.chunking.clone()),
                provider.clone(),
                stores.clone(),
                config.retrieval.clone(),
            );
            for path in &files {
                let content = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let metadata = DocumentMetadata::from_path(path.display().to_string(), path);
                let report = ingestor.ingest(content, &metadata).await?;
                info!(
                    "Ingested {} ({} chunks, {} relationships)",
                    path.display(),
                    report.chunks,
                    report.relationships
                );
            }

            let cache = Arc::new(InMemoryCache::new(
                config.retrieval.cache.host.clone(),
                config.retrieval.cache.port,
            ));
            let engine = RetrievalEngine::new(provider, stores, cache, config.retrieval).await?;
            let result = engine.retrieve(&query, &options).await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                OutputFormat::Text => {
                    println!("{}", result.content);
                    println!("---");
                    match result.metadata.fallback {
                        Some(fallback) => println!(
                            "Strategy: {} (fell back to {})",
                            result.metadata.strategy, fallback
                        ),
                        None => println!("Strategy: {}", result.metadata.strategy),
                    }
                    println!("Intent: {}", result.metadata.intent);
                    println!("Tokens: {}", result.metadata.tokens);
                    println!("Relevance: {:.3}", result.relevance);
                    println!("Documents: {}", result.metadata.documents.len());
                    for document in &result.metadata.documents {
                        println!("  {} ({})", document.title, document.content_type);
                    }
                }
            }
            Ok(())
        }
    }
}
