//! Core data model shared by providers, caches and the factory.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

/// Default number of texts per vendor request.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default per-text token budget.
pub const DEFAULT_MAX_TOKENS: usize = 8192;

/// Default request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of retries per sub-batch.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// What kind of text is being embedded.
///
/// Vendors with asymmetric retrieval use this to pick the query or document
/// role. It is also part of the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingType {
    /// Source code.
    Code,
    /// A search query.
    Query,
    /// Prose documents.
    Document,
    /// Code comments and docstrings.
    Comment,
}

impl EmbeddingType {
    /// Lowercase name used in cache keys and vendor payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Query => "query",
            Self::Document => "document",
            Self::Comment => "comment",
        }
    }

    /// Whether the vendor should be asked for the query side of an
    /// asymmetric embedding.
    pub fn is_query(self) -> bool {
        matches!(self, Self::Query)
    }
}

impl fmt::Display for EmbeddingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbeddingType {
    type Err = EmbeddingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "code" => Ok(Self::Code),
            "query" => Ok(Self::Query),
            "document" => Ok(Self::Document),
            "comment" => Ok(Self::Comment),
            other => Err(EmbeddingError::InvalidInput(format!(
                "unknown embedding type: {other}"
            ))),
        }
    }
}

/// Configuration for a single provider instance.
///
/// Created once per provider and treated as immutable after
/// `initialize`, with one exception: the local provider corrects
/// `dimension` to the loaded model's real output size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name as understood by the vendor.
    pub model_name: String,

    /// Length of every returned vector.
    pub dimension: usize,

    /// Maximum texts per vendor request.
    pub batch_size: usize,

    /// Maximum tokens per text; longer texts are truncated.
    pub max_tokens: usize,

    /// L2-normalize returned vectors.
    pub normalize: bool,

    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,

    /// Retries per sub-batch after the first attempt.
    pub max_retries: u32,

    /// Normalize vectors before they are written to a cache. Fresh results
    /// are returned as stored, so cached and uncached calls agree.
    pub normalize_cache: bool,

    /// Vendor-specific settings (API key, base URL, device, ...).
    #[serde(default)]
    pub provider_config: HashMap<String, Value>,
}

impl EmbeddingConfig {
    /// Create a validated configuration with default batching and limits.
    pub fn new(model_name: impl Into<String>, dimension: usize) -> Result<Self> {
        Self::builder(model_name, dimension).build()
    }

    /// Start building a configuration.
    pub fn builder(model_name: impl Into<String>, dimension: usize) -> EmbeddingConfigBuilder {
        EmbeddingConfigBuilder {
            config: Self {
                model_name: model_name.into(),
                dimension,
                batch_size: DEFAULT_BATCH_SIZE,
                max_tokens: DEFAULT_MAX_TOKENS,
                normalize: true,
                timeout_seconds: DEFAULT_TIMEOUT_SECS,
                max_retries: DEFAULT_MAX_RETRIES,
                normalize_cache: true,
                provider_config: HashMap::new(),
            },
        }
    }

    /// Check the invariants every provider relies on.
    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(EmbeddingError::Config(
                "model_name must not be empty".to_string(),
            ));
        }
        if self.dimension == 0 {
            return Err(EmbeddingError::Config(
                "dimension must be greater than 0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(EmbeddingError::Config(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(EmbeddingError::Config(
                "max_tokens must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// String value from `provider_config`.
    pub fn provider_str(&self, key: &str) -> Option<&str> {
        self.provider_config.get(key).and_then(Value::as_str)
    }

    /// Float value from `provider_config`; integers are accepted too.
    pub fn provider_f64(&self, key: &str) -> Option<f64> {
        self.provider_config.get(key).and_then(Value::as_f64)
    }

    /// Unsigned integer value from `provider_config`.
    pub fn provider_u64(&self, key: &str) -> Option<u64> {
        self.provider_config.get(key).and_then(Value::as_u64)
    }

    /// Boolean value from `provider_config`.
    pub fn provider_bool(&self, key: &str) -> Option<bool> {
        self.provider_config.get(key).and_then(Value::as_bool)
    }
}

/// Builder for [`EmbeddingConfig`]. `build` validates.
#[derive(Debug, Clone)]
pub struct EmbeddingConfigBuilder {
    config: EmbeddingConfig,
}

impl EmbeddingConfigBuilder {
    /// Set the batch size.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    /// Set the per-text token budget.
    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.config.max_tokens = max_tokens;
        self
    }

    /// Enable or disable L2 normalization.
    pub fn normalize(mut self, normalize: bool) -> Self {
        self.config.normalize = normalize;
        self
    }

    /// Set the request timeout.
    pub fn timeout_seconds(mut self, secs: u64) -> Self {
        self.config.timeout_seconds = secs;
        self
    }

    /// Set the number of retries per sub-batch.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Enable or disable normalization before caching.
    pub fn normalize_cache(mut self, normalize: bool) -> Self {
        self.config.normalize_cache = normalize;
        self
    }

    /// Add a vendor-specific setting.
    pub fn provider_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.provider_config.insert(key.into(), value.into());
        self
    }

    /// Set the API key.
    pub fn api_key(self, key: impl Into<String>) -> Self {
        self.provider_option("api_key", key.into())
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<EmbeddingConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// An ordered batch of texts to embed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingBatch {
    /// Texts in caller order.
    pub texts: Vec<String>,

    /// How the texts should be embedded.
    pub embedding_type: EmbeddingType,

    /// Per-text metadata, either empty or parallel to `texts`.
    #[serde(default)]
    pub metadata: Vec<Map<String, Value>>,
}

impl EmbeddingBatch {
    /// Create a batch, rejecting metadata that is not parallel to `texts`.
    pub fn new(
        texts: Vec<String>,
        embedding_type: EmbeddingType,
        metadata: Vec<Map<String, Value>>,
    ) -> Result<Self> {
        if !metadata.is_empty() && metadata.len() != texts.len() {
            return Err(EmbeddingError::InvalidInput(format!(
                "metadata length {} does not match texts length {}",
                metadata.len(),
                texts.len()
            )));
        }
        Ok(Self {
            texts,
            embedding_type,
            metadata,
        })
    }

    /// Batch without metadata.
    pub fn from_texts(texts: Vec<String>, embedding_type: EmbeddingType) -> Self {
        Self {
            texts,
            embedding_type,
            metadata: Vec::new(),
        }
    }

    /// Number of texts.
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    /// Whether the batch has no texts.
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

/// Vectors produced for one `embed_batch` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    /// One vector per input text, in input order.
    pub embeddings: Vec<Embedding>,

    /// Model that produced the vectors.
    pub model_used: String,

    /// Tokens consumed, as reported or estimated.
    pub token_count: usize,

    /// Length of every vector.
    pub dimension: usize,

    /// Wall time for the whole call, retries included.
    pub processing_time_ms: f64,

    /// Provider name.
    pub provider: String,

    /// Free-form metadata (`batch_count`, `embedding_type`, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl EmbeddingResult {
    /// Create a result, failing if any vector's length differs from
    /// `dimension`.
    pub fn new(
        embeddings: Vec<Embedding>,
        model_used: impl Into<String>,
        token_count: usize,
        dimension: usize,
        provider: impl Into<String>,
    ) -> Result<Self> {
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }
        Ok(Self {
            embeddings,
            model_used: model_used.into(),
            token_count,
            dimension,
            processing_time_ms: 0.0,
            provider: provider.into(),
            metadata: Map::new(),
        })
    }

    /// Set the processing time.
    pub fn with_processing_time_ms(mut self, ms: f64) -> Self {
        self.processing_time_ms = ms;
        self
    }

    /// Insert a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Number of sub-batches recorded in metadata, if present.
    pub fn batch_count(&self) -> Option<u64> {
        self.metadata.get("batch_count").and_then(Value::as_u64)
    }
}
