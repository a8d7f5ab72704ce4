//! # nexus-embed
//!
//! Model provider contracts for the Nexus RAG core, with implementations for
//! remote APIs, offline feature hashing and (optionally) local ONNX models.
//!
//! ## Features
//!
//! - **Embedding + reranking**: [`EmbeddingProvider`] embeds queries and documents
//!   into f16 vectors and reranks candidate passages against a query
//! - **Visual descriptions**: [`VisionProvider`] describes images, diagrams and charts
//! - **Remote APIs**: [`HttpProvider`] and [`HttpVisionProvider`] over `reqwest`
//! - **Offline**: [`HashingProvider`] is deterministic and needs no model files
//! - **Local ONNX models**: `FastEmbedProvider` behind the `local-models` feature
//!
//! ## Quick Start
//!
//! ```
//! use nexus_embed::{EmbedOptions, EmbeddingProvider, HashingProvider};
//!
//! # async fn example() -> nexus_embed::Result<()> {
//! let provider = HashingProvider::default();
//! let query = provider.embed("connection pool", &EmbedOptions::query()).await?;
//! assert_eq!(query.len(), provider.embedding_dimension());
//!
//! let docs = vec!["the pool hands out connections".to_string()];
//! let ranked = provider.rerank("connection pool", &docs, 5).await?;
//! assert_eq!(ranked[0].index, 0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] using the crate's [`ProviderError`] type.

pub mod config;
pub mod error;
pub mod hashing;
pub mod http;
#[cfg(feature = "local-models")]
pub mod local;
pub mod provider;

// Re-export main types for easy access
#[cfg(feature = "local-models")]
pub use config::LocalModelConfig;
pub use config::{ProviderConfig, VisionConfig};
pub use error::{ProviderError, Result};
pub use hashing::HashingProvider;
pub use http::{HttpProvider, HttpVisionProvider};
#[cfg(feature = "local-models")]
pub use local::FastEmbedProvider;
pub use provider::{
    EmbedOptions, Embedding, EmbeddingProvider, EmbeddingResult, InputType, RankedIndex,
    VisionProvider, VisualKind, VisualReference, cosine_similarity, normalize_to_f16,
};
