//! Provider contracts for embeddings, reranking and visual descriptions

use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use half::f16;
use serde::{Deserialize, Serialize};

/// A normalized half-precision embedding vector.
pub type Embedding = Vec<f16>;

/// Whether a text is embedded as a search query or as stored content.
///
/// Asymmetric embedding models produce different vectors for the two roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Query,
    #[default]
    Document,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Query => "query",
            InputType::Document => "document",
        }
    }
}

/// Per-call embedding options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbedOptions {
    pub input_type: InputType,
    /// Content type tag of the text (`code`, `markdown`, ...), if known
    pub content_type: Option<String>,
}

impl EmbedOptions {
    /// Options for embedding a search query
    pub fn query() -> Self {
        Self {
            input_type: InputType::Query,
            content_type: None,
        }
    }

    /// Options for embedding stored content
    pub fn document() -> Self {
        Self::default()
    }

    /// Attach a content type tag (builder style)
    pub fn with_content_type<S: Into<String>>(self, content_type: S) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..self
        }
    }
}

/// Result of batch embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Embedding>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result. The dimension is inferred from the
    /// first vector and is 0 for an empty result.
    pub fn new(embeddings: Vec<Embedding>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// One reranked document: its index in the input slice and its relevance score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankedIndex {
    pub index: usize,
    pub score: f32,
}

/// Trait for providers that embed text and rerank candidate documents.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed(&self, text: &str, options: &EmbedOptions) -> Result<Embedding> {
        let result = self.embed_batch(&[text.to_string()], options).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::malformed("no embedding generated for text"))
    }

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_batch(&self, texts: &[String], options: &EmbedOptions)
    -> Result<EmbeddingResult>;

    /// Score `documents` against `query` and return at most `top_k` entries,
    /// best first.
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<RankedIndex>>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;
}

/// What kind of visual a [`VisualReference`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualKind {
    /// A raster or vector image referenced by URL or path
    Image,
    /// Diagram source such as mermaid or plantuml
    Diagram,
    /// Chart specification such as vega-lite
    Chart,
}

/// A visual element found in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualReference {
    pub kind: VisualKind,
    /// Image URL or path, or the diagram/chart source text
    pub source: String,
    pub alt_text: Option<String>,
    pub caption: Option<String>,
    /// Fence language for diagrams and charts (`mermaid`, `vega-lite`, ...)
    pub language: Option<String>,
}

/// Trait for providers that turn a visual into a textual description.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    async fn describe(&self, visual: &VisualReference) -> Result<String>;

    fn provider_name(&self) -> &str;
}

/// Convert an f32 vector to an L2-normalized f16 embedding.
///
/// A zero vector stays zero.
pub fn normalize_to_f16(values: &[f32]) -> Embedding {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter().map(|v| f16::from_f32(v / norm)).collect()
    } else {
        values.iter().map(|v| f16::from_f32(*v)).collect()
    }
}

/// Cosine similarity between two embeddings, 0.0 on length mismatch or
/// zero vectors.
pub fn cosine_similarity(a: &[f16], b: &[f16]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot_product = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (x.to_f32(), y.to_f32());
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a.sqrt() * norm_b.sqrt())
    }
}
