//! Error types raised at the retrieval engine boundary.
//!
//! Pipeline plumbing (stores, providers, strategies) composes with
//! `anyhow::Result`; this enum covers the failures callers are expected to
//! match on.

/// Errors surfaced by the retrieval engine.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// The cache backend could not be reached when the engine was built.
    /// The engine does not run uncached, so this is fatal.
    #[error("Cache backend unavailable at {host}:{port}: {status}")]
    CacheUnavailable {
        host: String,
        port: u16,
        status: String,
    },

    /// A retrieval strategy name that does not exist
    #[error("Unknown retrieval strategy: {name}")]
    UnknownStrategy { name: String },

    /// Configuration could not be loaded
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl RetrievalError {
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
