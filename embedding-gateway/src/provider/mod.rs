//! Embedding providers.
//!
//! [`EmbeddingProvider`] is the capability every backend exposes. Backends do
//! not implement it directly: [`BaseProvider`] implements it once (batching,
//! retries, timing) and delegates the vendor-specific step to a small
//! [`ProviderHook`].

mod base;
pub mod candle;
pub mod http;
pub mod local;
pub mod mock;
pub mod vendors;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::types::{EmbeddingBatch, EmbeddingConfig, EmbeddingResult, EmbeddingType};
use crate::validators::estimate_tokens_by_chars;

pub use base::{BaseProvider, MAX_BACKOFF, backoff_delay};
pub use http::HttpVendor;
pub use candle::CandleLoader;
pub use local::{LocalHook, LocalModel, LocalModelLoader, LocalModelRequest};
pub use mock::MockHook;
pub use vendors::{ModelSpec, Protocol, VendorProfile};

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name (e.g. `"openai"`, `"mock"`).
    fn name(&self) -> &str;

    /// Active configuration, once initialized.
    fn config(&self) -> Option<&EmbeddingConfig>;

    /// Whether `initialize` has succeeded and `close` has not been called.
    fn is_initialized(&self) -> bool;

    /// Validate the configuration, resolve credentials and build the client.
    async fn initialize(&mut self, config: EmbeddingConfig) -> Result<()>;

    /// Embed `texts`, preserving order.
    async fn embed_batch(
        &self,
        texts: &[String],
        embedding_type: EmbeddingType,
    ) -> Result<EmbeddingResult>;

    /// Embed a single text.
    async fn embed_single(&self, text: &str, embedding_type: EmbeddingType) -> Result<Embedding> {
        let result = self
            .embed_batch(&[text.to_string()], embedding_type)
            .await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::permanent("provider returned no embedding"))
    }

    /// Embed an [`EmbeddingBatch`], carrying its metadata count into the
    /// result.
    async fn embed(&self, batch: &EmbeddingBatch) -> Result<EmbeddingResult> {
        let result = self
            .embed_batch(&batch.texts, batch.embedding_type)
            .await?;
        if batch.metadata.is_empty() {
            Ok(result)
        } else {
            Ok(result.with_metadata("input_metadata", batch.metadata.clone()))
        }
    }

    /// Describe the model and provider.
    fn model_info(&self) -> Map<String, Value>;

    /// Check the resolved credential against the vendor.
    async fn validate_api_key(&self) -> Result<bool>;

    /// Approximate token count for `texts`.
    fn estimate_tokens(&self, texts: &[String]) -> usize;

    /// Release the client. The provider behaves as uninitialized afterwards.
    fn close(&mut self);
}

/// Raw output of one vendor call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookOutput {
    /// One vector per input text, already reconciled to the configured
    /// dimension.
    pub embeddings: Vec<Embedding>,

    /// Tokens consumed by this call.
    pub token_count: usize,
}

/// The vendor-specific step plugged into [`BaseProvider`].
#[async_trait]
pub trait ProviderHook: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// Resolve credentials and build the client. May adjust `config`
    /// (the local provider corrects the dimension).
    async fn initialize(&mut self, config: &mut EmbeddingConfig) -> Result<()>;

    /// Embed one sub-batch. Called at most `batch_size` texts at a time.
    async fn embed(
        &self,
        texts: &[String],
        embedding_type: EmbeddingType,
        config: &EmbeddingConfig,
    ) -> Result<HookOutput>;

    /// Check the credential. Providers without credentials report `true`.
    async fn validate_api_key(&self, _config: &EmbeddingConfig) -> Result<bool> {
        Ok(true)
    }

    /// Characters per token used by the default estimator.
    fn chars_per_token(&self) -> f64 {
        4.0
    }

    /// Approximate token count. Override when a real tokenizer is available.
    fn estimate_tokens(&self, texts: &[String]) -> usize {
        let ratio = self.chars_per_token();
        texts
            .iter()
            .map(|t| estimate_tokens_by_chars(t, ratio))
            .sum()
    }

    /// Vendor-specific model details merged into `model_info`.
    fn model_info(&self, _config: Option<&EmbeddingConfig>) -> Map<String, Value> {
        Map::new()
    }

    /// Drop the client.
    fn close(&mut self) {}
}
