//! Error types for embedding, reranking and vision providers

/// Result type for provider operations.
///
/// Convenience alias using [`ProviderError`] as the error type.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Error type for all provider operations.
///
/// Covers configuration problems detected before any request is made,
/// transport failures talking to a remote model API, non-success API
/// responses, and failures inside a local model.
///
/// # Error Categories
///
/// - **Configuration Errors**: Missing API keys, empty model names
/// - **Transport Errors**: Connection and decoding failures from `reqwest`
/// - **API Errors**: The remote service answered with a non-2xx status
/// - **Runtime Errors**: A model produced no output or malformed output
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Error when provider configuration is invalid
    #[error("Invalid provider configuration: {message}")]
    InvalidConfig { message: String },

    /// Transport-level failure talking to a remote provider
    #[error("Request failed: {source}")]
    Request {
        #[from]
        source: reqwest::Error,
    },

    /// The remote provider answered with an error status
    #[error("Provider API returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Error during embedding, rerank or description generation
    #[error("Generation failed: {source}")]
    Generation {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The provider returned a response that does not match the request
    #[error("Malformed provider response: {message}")]
    MalformedResponse { message: String },

    /// Async task join errors
    #[error("Async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },

    /// Generic errors from other libraries
    #[error("External error: {source}")]
    External {
        #[from]
        source: anyhow::Error,
    },
}

impl ProviderError {
    /// Wrap any error raised while generating embeddings, scores or descriptions.
    pub fn generation<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Generation {
            source: Box::new(source),
        }
    }

    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a malformed response error with a custom message.
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ProviderError::invalid_config("missing api key");
        assert_eq!(
            err.to_string(),
            "Invalid provider configuration: missing api key"
        );

        let err = ProviderError::Api {
            status: 429,
            message: "rate limited".to_string(),
        };
        assert_eq!(err.to_string(), "Provider API returned 429: rate limited");

        let err = ProviderError::generation(std::io::Error::other("boom"));
        assert!(err.to_string().contains("boom"));
    }
}
