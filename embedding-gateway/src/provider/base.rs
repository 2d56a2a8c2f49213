//! Shared batching, retry and timing logic for every provider.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{EmbeddingProvider, HookOutput, ProviderHook};
use crate::error::{EmbeddingError, Result};
use crate::types::{EmbeddingConfig, EmbeddingResult, EmbeddingType};
use crate::validators::l2_normalize;

/// Upper bound on a single backoff wait.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Wait before retry number `attempt + 1`.
///
/// Exponential `2^attempt` seconds. A server hint longer than that wins.
/// Both are capped at [`MAX_BACKOFF`].
pub fn backoff_delay(attempt: u32, retry_after: Option<Duration>) -> Duration {
    let exponential = Duration::from_secs(1u64 << attempt.min(6));
    let delay = match retry_after {
        Some(hint) if hint > exponential => hint,
        _ => exponential,
    };
    delay.min(MAX_BACKOFF)
}

/// [`EmbeddingProvider`] implementation shared by all vendors.
///
/// `embed_batch` splits input into sub-batches of `batch_size`, calls the
/// hook for each with retry and exponential backoff, and assembles one
/// ordered [`EmbeddingResult`]. A sub-batch that still fails after
/// `max_retries` fails the whole call and earlier sub-batches are dropped.
pub struct BaseProvider<H> {
    hook: H,
    config: Option<EmbeddingConfig>,
    initialized: bool,
}

impl<H: ProviderHook> BaseProvider<H> {
    /// Wrap a hook. The provider is unusable until `initialize`.
    pub fn new(hook: H) -> Self {
        Self {
            hook,
            config: None,
            initialized: false,
        }
    }

    /// The vendor hook.
    pub fn hook(&self) -> &H {
        &self.hook
    }

    fn ready_config(&self) -> Result<&EmbeddingConfig> {
        match (&self.config, self.initialized) {
            (Some(config), true) => Ok(config),
            _ => Err(EmbeddingError::NotInitialized),
        }
    }

    async fn call_hook(
        &self,
        texts: &[String],
        embedding_type: EmbeddingType,
        config: &EmbeddingConfig,
    ) -> Result<HookOutput> {
        if config.timeout_seconds == 0 {
            return self.hook.embed(texts, embedding_type, config).await;
        }
        let limit = Duration::from_secs(config.timeout_seconds);
        match tokio::time::timeout(limit, self.hook.embed(texts, embedding_type, config)).await {
            Ok(result) => result,
            Err(_) => Err(EmbeddingError::Timeout(config.timeout_seconds)),
        }
    }

    /// Embed one sub-batch, retrying transient failures. Returns the output
    /// and how many retries it took.
    async fn embed_with_retry(
        &self,
        texts: &[String],
        embedding_type: EmbeddingType,
        config: &EmbeddingConfig,
        batch_index: usize,
    ) -> Result<(HookOutput, u32)> {
        let name = self.hook.name();
        let mut attempt = 0u32;
        loop {
            match self.call_hook(texts, embedding_type, config).await {
                Ok(output) => return Ok((output, attempt)),
                Err(err) if err.is_retryable() && attempt < config.max_retries => {
                    let delay = backoff_delay(attempt, err.retry_after());
                    warn!(
                        "{name}: sub-batch {batch_index} attempt {} failed: {err}; retrying in {}s",
                        attempt + 1,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(
                        "{name}: sub-batch {batch_index} failed after {} attempt(s): {err}",
                        attempt + 1
                    );
                    return Err(err);
                }
            }
        }
    }
}

#[async_trait]
impl<H: ProviderHook> EmbeddingProvider for BaseProvider<H> {
    fn name(&self) -> &str {
        self.hook.name()
    }

    fn config(&self) -> Option<&EmbeddingConfig> {
        self.config.as_ref()
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    async fn initialize(&mut self, mut config: EmbeddingConfig) -> Result<()> {
        config.validate()?;
        self.initialized = false;
        self.hook.initialize(&mut config).await?;
        info!(
            "Initialized {} provider with model {} (dimension {})",
            self.hook.name(),
            config.model_name,
            config.dimension
        );
        self.config = Some(config);
        self.initialized = true;
        Ok(())
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        embedding_type: EmbeddingType,
    ) -> Result<EmbeddingResult> {
        let config = self.ready_config()?;
        let name = self.hook.name();
        let start = Instant::now();

        let mut embeddings = Vec::with_capacity(texts.len());
        let mut token_count = 0usize;
        let mut retries = 0u32;
        let mut batch_count = 0usize;

        for (batch_index, chunk) in texts.chunks(config.batch_size).enumerate() {
            batch_count += 1;
            let (output, attempts) = self
                .embed_with_retry(chunk, embedding_type, config, batch_index)
                .await?;
            if output.embeddings.len() != chunk.len() {
                return Err(EmbeddingError::permanent(format!(
                    "{name} returned {} embeddings for {} texts",
                    output.embeddings.len(),
                    chunk.len()
                )));
            }
            retries += attempts;
            token_count += output.token_count;
            embeddings.extend(output.embeddings);
        }

        if config.normalize {
            for embedding in &mut embeddings {
                l2_normalize(embedding);
            }
        }

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        debug!(
            "{name}: embedded {} texts in {batch_count} sub-batch(es), {elapsed_ms:.1}ms",
            texts.len()
        );

        Ok(EmbeddingResult::new(
            embeddings,
            config.model_name.clone(),
            token_count,
            config.dimension,
            name,
        )?
        .with_processing_time_ms(elapsed_ms)
        .with_metadata("batch_count", batch_count)
        .with_metadata("embedding_type", embedding_type.as_str())
        .with_metadata("retries", retries))
    }

    fn model_info(&self) -> Map<String, Value> {
        let mut info = Map::new();
        info.insert("provider".to_string(), self.hook.name().into());
        info.insert("initialized".to_string(), self.initialized.into());
        if let Some(config) = &self.config {
            info.insert("model".to_string(), config.model_name.clone().into());
            info.insert("dimension".to_string(), config.dimension.into());
            info.insert("max_tokens".to_string(), config.max_tokens.into());
            info.insert("batch_size".to_string(), config.batch_size.into());
            info.insert("normalize".to_string(), config.normalize.into());
        }
        info.extend(self.hook.model_info(self.config.as_ref()));
        info
    }

    async fn validate_api_key(&self) -> Result<bool> {
        let config = self.ready_config()?;
        self.hook.validate_api_key(config).await
    }

    fn estimate_tokens(&self, texts: &[String]) -> usize {
        self.hook.estimate_tokens(texts)
    }

    fn close(&mut self) {
        if self.initialized {
            debug!("Closing {} provider", self.hook.name());
        }
        self.hook.close();
        self.initialized = false;
    }
}
