//! Error type shared across the retrieval and ingestion crates.

use thiserror::Error;

/// Result alias using [`RagError`].
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors raised by the query engine and the ingestion pipeline.
#[derive(Debug, Error)]
pub enum RagError {
    /// Timeout, connection failure or 5xx from an external provider.
    #[error("Transient provider error ({provider}): {message}")]
    TransientProvider {
        /// Which collaborator failed (embedding, rerank, vector-store)
        provider: String,
        /// Provider supplied detail
        message: String,
    },

    /// Permanent provider failure (4xx, malformed response).
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Which collaborator failed
        provider: String,
        /// Provider supplied detail
        message: String,
    },

    /// A result or a write crossed an authorization boundary.
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    /// Required namespace context or configuration is missing.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A stored checkpoint contradicts the document being processed.
    #[error("Checkpoint corruption: {0}")]
    CheckpointCorruption(String),

    /// A checkpoint status change outside the transition table.
    #[error("Illegal checkpoint transition: {from} -> {to}")]
    IllegalTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// The rate limiter could not admit a request within its wait bound.
    #[error("Rate limit wait exceeded: {0}")]
    RateLimited(String),

    /// Checkpoint or audit persistence failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Caller supplied input that cannot be processed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl RagError {
    /// Build a transient provider error.
    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientProvider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Build a permanent provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Build a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Build an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransientProvider { .. } | Self::RateLimited(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error()),
            _ => false,
        }
    }

    /// Map an HTTP status from a provider into the right error class.
    pub fn from_status(provider: &str, status: reqwest::StatusCode, body: String) -> Self {
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Self::transient(provider, format!("status {status}: {body}"))
        } else {
            Self::provider(provider, format!("status {status}: {body}"))
        }
    }
}
