use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use nexus_chunker::{ChunkingConfig, ChunkingEngine, ContentType, DocumentMetadata};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// The full chunking result as pretty JSON
    Json,
    /// Outline, summary and one line per chunk
    Summary,
}

/// Chunk a document and print the chunks, relationships, summary and outline.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Content type (code, markdown, text, structured_data, multimodal).
    /// Inferred from the input extension when omitted.
    #[arg(short = 't', long)]
    content_type: Option<String>,

    /// Source format such as a file extension (rs, json, md).
    #[arg(short, long)]
    format: Option<String>,

    /// Programming language for code documents.
    #[arg(short, long)]
    language: Option<String>,

    /// Document id used on every chunk.
    #[arg(long, default_value = "stdin")]
    id: String,

    /// Maximum estimated tokens per chunk.
    #[arg(short, long, default_value_t = 1000)]
    max_tokens: usize,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    output: OutputFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let (content, mut metadata) = match &args.input {
        Some(path) => {
            let content = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let id = if args.id == "stdin" {
                path.display().to_string()
            } else {
                args.id.clone()
            };
            (content, DocumentMetadata::from_path(id, path))
        }
        None => {
            let mut buffer = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut buffer)
                .await
                .context("Failed to read stdin")?;
            let metadata = DocumentMetadata::new(args.id.clone(), "", ContentType::Text);
            (buffer, metadata)
        }
    };

    if let Some(tag) = &args.content_type {
        metadata.content_type = ContentType::from_tag(tag);
    }
    if let Some(format) = args.format {
        metadata = metadata.with_format(format);
    }
    if let Some(language) = args.language {
        metadata = metadata.with_language(language);
    }
    metadata = metadata.with_size(content.len());

    let engine = ChunkingEngine::new(ChunkingConfig::new(args.max_tokens));
    let result = engine.chunk_document(&content, &metadata).await;

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Summary => {
            print!("{}", result.outline.to_markdown());
            println!("\n{}\n", result.summary.summary);
            for chunk in &result.chunks {
                let line = chunk
                    .position
                    .line_start
                    .map(|l| format!("L{l}"))
                    .unwrap_or_default();
                let preview: String = chunk
                    .content
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .chars()
                    .take(60)
                    .collect();
                println!(
                    "{:<11} {:>5} tok {:>6}  {}",
                    chunk.chunk_type.as_str(),
                    chunk.tokens,
                    line,
                    preview
                );
            }
            println!("\n{} relationships", result.relationships.len());
        }
    }

    Ok(())
}
