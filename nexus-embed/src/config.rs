//! Configuration for remote and local model providers

use crate::error::{ProviderError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for an HTTP embedding and reranking provider.
///
/// The wire format is the one used by Voyage-style APIs: `POST {base_url}/embeddings`
/// and `POST {base_url}/rerank` with a bearer token. Any field missing from a
/// TOML file takes its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the API, without a trailing slash
    pub base_url: String,
    /// API key. When absent the key is read from `api_key_env`.
    pub api_key: Option<String>,
    /// Environment variable consulted when `api_key` is not set
    pub api_key_env: String,
    /// Model used for document and query embeddings
    pub embedding_model: String,
    /// Model used for reranking
    pub rerank_model: String,
    /// Dimension of the vectors returned by `embedding_model`
    pub dimension: usize,
    /// Maximum number of texts per embeddings request
    pub batch_size: usize,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.voyageai.com/v1".to_string(),
            api_key: None,
            api_key_env: "VOYAGE_API_KEY".to_string(),
            embedding_model: "voyage-3".to_string(),
            rerank_model: "rerank-2".to_string(),
            dimension: 1024,
            batch_size: 64,
            timeout_secs: 30,
        }
    }
}

impl ProviderConfig {
    /// Set the base URL (builder style)
    pub fn with_base_url<S: Into<String>>(self, base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            ..self
        }
    }

    /// Set the API key explicitly (builder style)
    pub fn with_api_key<S: Into<String>>(self, api_key: S) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..self
        }
    }

    /// Set the embedding model and its dimension (builder style)
    pub fn with_embedding_model<S: Into<String>>(self, model: S, dimension: usize) -> Self {
        Self {
            embedding_model: model.into(),
            dimension,
            ..self
        }
    }

    /// Set the batch size for embedding requests (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// The request timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolve the API key from the config or the environment.
    pub fn resolve_api_key(&self) -> Result<String> {
        resolve_key(self.api_key.as_deref(), &self.api_key_env)
    }

    /// Check the configuration is usable before any request is made.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(ProviderError::invalid_config("base_url must not be empty"));
        }
        if self.embedding_model.trim().is_empty() {
            return Err(ProviderError::invalid_config(
                "embedding_model must not be empty",
            ));
        }
        if self.batch_size == 0 {
            return Err(ProviderError::invalid_config("batch_size must be positive"));
        }
        if self.dimension == 0 {
            return Err(ProviderError::invalid_config("dimension must be positive"));
        }
        Ok(())
    }
}

/// Configuration for an OpenAI-compatible chat completions endpoint used to
/// describe images and diagrams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub model: String,
    /// Upper bound on the length of a generated description
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 300,
            timeout_secs: 60,
        }
    }
}

impl VisionConfig {
    /// Set the model (builder style)
    pub fn with_model<S: Into<String>>(self, model: S) -> Self {
        Self {
            model: model.into(),
            ..self
        }
    }

    /// Set the API key explicitly (builder style)
    pub fn with_api_key<S: Into<String>>(self, api_key: S) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..self
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn resolve_api_key(&self) -> Result<String> {
        resolve_key(self.api_key.as_deref(), &self.api_key_env)
    }
}

/// Configuration for the local ONNX provider.
#[cfg(feature = "local-models")]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalModelConfig {
    /// One of `all-minilm-l6-v2`, `bge-small-en-v1.5`, `bge-base-en-v1.5`
    pub embedding_model: String,
    /// One of `bge-reranker-base`, `jina-reranker-v1-turbo-en`
    pub rerank_model: String,
    pub batch_size: usize,
    pub show_download_progress: bool,
}

#[cfg(feature = "local-models")]
impl Default for LocalModelConfig {
    fn default() -> Self {
        Self {
            embedding_model: "all-minilm-l6-v2".to_string(),
            rerank_model: "bge-reranker-base".to_string(),
            batch_size: 16,
            show_download_progress: true,
        }
    }
}

fn resolve_key(explicit: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = explicit.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }
    match std::env::var(env_var) {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => Err(ProviderError::invalid_config(format!(
            "no API key configured and {env_var} is not set"
        ))),
    }
}
