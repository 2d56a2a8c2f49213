//! Deterministic mock provider for tests and offline development.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::vendors::{MOCK_MODELS, find_model};
use super::{HookOutput, ProviderHook};
use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::types::{EmbeddingConfig, EmbeddingType};

/// Hash-derived vector for `text`.
///
/// SHA-256 of `"{type}:{text}"`, re-hashed until `dimension` values exist.
/// Each big-endian byte pair maps to `[-1, 1]`. A `salt` makes the output
/// differ between calls.
pub fn hash_vector(
    text: &str,
    embedding_type: EmbeddingType,
    dimension: usize,
    salt: Option<u64>,
) -> Embedding {
    let seed = match salt {
        Some(salt) => format!("{embedding_type}:{text}:{salt}"),
        None => format!("{embedding_type}:{text}"),
    };
    let mut digest = Sha256::digest(seed.as_bytes());
    let mut values = Vec::with_capacity(dimension);
    loop {
        for pair in digest.chunks_exact(2) {
            if values.len() == dimension {
                return values;
            }
            let raw = u16::from_be_bytes([pair[0], pair[1]]);
            values.push(f32::from(raw) / 32767.5 - 1.0);
        }
        digest = Sha256::digest(digest.as_slice());
    }
}

/// Mock hook. Never contacts a vendor.
///
/// `provider_config` knobs: `delay_ms` (artificial latency per call),
/// `failure_rate` (probability of a retryable failure per call) and
/// `deterministic` (default `true`).
#[derive(Default)]
pub struct MockHook {
    delay: Duration,
    failure_rate: f64,
    deterministic: bool,
    calls: Arc<AtomicUsize>,
}

impl MockHook {
    pub fn new() -> Self {
        Self {
            deterministic: true,
            ..Default::default()
        }
    }

    /// Shared counter of `embed` calls, including failed ones.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl ProviderHook for MockHook {
    fn name(&self) -> &str {
        "mock"
    }

    async fn initialize(&mut self, config: &mut EmbeddingConfig) -> Result<()> {
        let failure_rate = config.provider_f64("failure_rate").unwrap_or(0.0);
        if !(0.0..=1.0).contains(&failure_rate) {
            return Err(EmbeddingError::Config(format!(
                "failure_rate must be within 0.0..=1.0, got {failure_rate}"
            )));
        }
        self.failure_rate = failure_rate;
        self.delay = Duration::from_millis(config.provider_u64("delay_ms").unwrap_or(0));
        self.deterministic = config.provider_bool("deterministic").unwrap_or(true);
        debug!(
            "Mock provider ready (delay {:?}, failure rate {}, deterministic {})",
            self.delay, self.failure_rate, self.deterministic
        );
        Ok(())
    }

    async fn embed(
        &self,
        texts: &[String],
        embedding_type: EmbeddingType,
        config: &EmbeddingConfig,
    ) -> Result<HookOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.failure_rate > 0.0 && rand::random::<f64>() < self.failure_rate {
            return Err(EmbeddingError::transient("simulated mock failure"));
        }

        let embeddings = texts
            .iter()
            .map(|text| {
                let salt = (!self.deterministic).then(rand::random::<u64>);
                hash_vector(text, embedding_type, config.dimension, salt)
            })
            .collect();
        let token_count = texts.iter().map(|t| t.split_whitespace().count()).sum();

        Ok(HookOutput {
            embeddings,
            token_count,
        })
    }

    fn model_info(&self, config: Option<&EmbeddingConfig>) -> Map<String, Value> {
        let mut info = Map::new();
        info.insert(
            "supported_models".to_string(),
            MOCK_MODELS.iter().map(|m| Value::from(m.name)).collect(),
        );
        info.insert("deterministic".to_string(), self.deterministic.into());
        info.insert("failure_rate".to_string(), self.failure_rate.into());
        info.insert(
            "delay_ms".to_string(),
            (self.delay.as_millis() as u64).into(),
        );
        if let Some(spec) = config.and_then(|c| find_model(MOCK_MODELS, &c.model_name)) {
            info.insert("model_description".to_string(), spec.description.into());
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{BaseProvider, EmbeddingProvider};
    use pretty_assertions::assert_eq;

    async fn provider(config: EmbeddingConfig) -> BaseProvider<MockHook> {
        let mut provider = BaseProvider::new(MockHook::new());
        provider.initialize(config).await.unwrap();
        provider
    }

    #[test]
    fn test_hash_vector_range_and_length() {
        let v = hash_vector("fn main() {}", EmbeddingType::Code, 100, None);
        assert_eq!(v.len(), 100);
        assert!(v.iter().all(|x| (-1.0..=1.0).contains(x)));
    }

    #[test]
    fn test_hash_vector_depends_on_type() {
        let code = hash_vector("parse", EmbeddingType::Code, 16, None);
        let query = hash_vector("parse", EmbeddingType::Query, 16, None);
        assert_ne!(code, query);
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let config = EmbeddingConfig::builder("mock-embedding", 384)
            .batch_size(10)
            .build()
            .unwrap();
        let provider = provider(config).await;

        let texts = vec!["hello world".to_string(), "goodbye".to_string()];
        let result = provider
            .embed_batch(&texts, EmbeddingType::Document)
            .await
            .unwrap();

        assert_eq!(result.provider, "mock");
        assert_eq!(result.embeddings.len(), 2);
        assert!(result.embeddings.iter().all(|e| e.len() == 384));
        assert_eq!(result.token_count, 3);
    }

    #[tokio::test]
    async fn test_deterministic_vectors() {
        let config = EmbeddingConfig::new("mock-embedding", 64).unwrap();
        let provider = provider(config).await;

        let a = provider
            .embed_single("same text", EmbeddingType::Code)
            .await
            .unwrap();
        let b = provider
            .embed_single("same text", EmbeddingType::Code)
            .await
            .unwrap();
        let c = provider
            .embed_single("other text", EmbeddingType::Code)
            .await
            .unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_non_deterministic_mode() {
        let config = EmbeddingConfig::builder("mock-embedding", 32)
            .provider_option("deterministic", false)
            .build()
            .unwrap();
        let provider = provider(config).await;

        let a = provider.embed_single("x", EmbeddingType::Code).await.unwrap();
        let b = provider.embed_single("x", EmbeddingType::Code).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_normalized_output() {
        let config = EmbeddingConfig::new("mock-embedding", 128).unwrap();
        let provider = provider(config).await;

        let v = provider.embed_single("norm", EmbeddingType::Code).await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_mock_exhausts_retries() {
        let config = EmbeddingConfig::builder("mock-embedding", 8)
            .max_retries(2)
            .provider_option("failure_rate", 1.0)
            .build()
            .unwrap();
        let hook = MockHook::new();
        let calls = hook.call_counter();
        let mut provider = BaseProvider::new(hook);
        provider.initialize(config).await.unwrap();

        let err = provider
            .embed_single("x", EmbeddingType::Code)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejects_bad_failure_rate() {
        let config = EmbeddingConfig::builder("mock-embedding", 8)
            .provider_option("failure_rate", 1.5)
            .build()
            .unwrap();
        let mut provider = BaseProvider::new(MockHook::new());
        assert!(matches!(
            provider.initialize(config).await,
            Err(EmbeddingError::Config(_))
        ));
    }
}
