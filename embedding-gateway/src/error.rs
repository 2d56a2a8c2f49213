//! Error types for the embedding gateway.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur in the embedding gateway.
///
/// Every variant is an expected failure mode. Callers are meant to branch on
/// the kind: wait and resubmit on [`EmbeddingError::RateLimited`], re-chunk on
/// [`EmbeddingError::TokenLimit`], fix credentials on [`EmbeddingError::ApiKey`].
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// No provider registered under this name.
    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    /// Model is not known to the registry or the built-in table.
    #[error("model not supported: {model}{}{}", format_suggestions(.suggestions), format_hint(.hint))]
    ModelNotSupported {
        model: String,
        suggestions: Vec<String>,
        hint: Option<String>,
    },

    /// API key missing or malformed.
    #[error("API key error: {0}")]
    ApiKey(String),

    /// Vendor failed to produce embeddings.
    #[error("embedding generation failed: {message}")]
    Generation { message: String, retryable: bool },

    /// Provider could not be initialized.
    #[error("provider initialization failed: {0}")]
    ProviderInitialization(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded: {message} (retry after {retry_after_secs}s)")]
    RateLimited {
        message: String,
        retry_after_secs: u64,
    },

    /// Input exceeded the model's token budget.
    #[error("token limit exceeded: {token_count} tokens, limit {limit}")]
    TokenLimit { token_count: usize, limit: usize },

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// Cache backend error.
    #[error("cache error: {0}")]
    Cache(String),

    /// Caller supplied invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Provider used before `initialize` succeeded.
    #[error("provider not initialized")]
    NotInitialized,

    /// A registered provider constructor violates the provider contract.
    #[error("invalid provider registration: {0}")]
    InvalidProvider(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl EmbeddingError {
    /// Shorthand for a transient generation failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
            retryable: true,
        }
    }

    /// Shorthand for a generation failure that retrying will not fix.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether the batch retry loop should try again after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) => true,
            Self::Generation { retryable, .. } => *retryable,
            Self::Http(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }

    /// Server-suggested wait before retrying, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }
}

fn format_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(". Did you mean: {}?", suggestions.join(", "))
    }
}

fn format_hint(hint: &Option<String>) -> String {
    match hint {
        Some(hint) => format!(" ({hint})"),
        None => String::new(),
    }
}
