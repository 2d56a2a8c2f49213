//! In-process embedding models.
//!
//! The inference runtime is pluggable: a [`LocalModelLoader`] turns a
//! [`LocalModelRequest`] into a loaded [`LocalModel`]. The default loader is
//! [`CandleLoader`]. Loading and encoding are CPU-bound and run on the
//! blocking pool.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::candle::CandleLoader;
use super::vendors::{LOCAL_MODELS, find_model};
use super::{HookOutput, ProviderHook};
use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::types::{EmbeddingConfig, EmbeddingType};
use crate::validators::{estimate_tokens_by_chars, reconcile_all, truncate_to_tokens, validate_texts};

const SUPPORTED_DEVICES: &[&str] = &["cpu", "cuda", "mps"];

const CHARS_PER_TOKEN: f64 = 4.0;

/// A loaded model. `encode` is synchronous and may be slow.
pub trait LocalModel: Send + Sync {
    /// Output dimension of the loaded weights.
    fn dimension(&self) -> usize;

    /// Encode `texts`, one vector per text, in order.
    fn encode(&self, texts: &[String]) -> anyhow::Result<Vec<Embedding>>;

    /// Exact token count from the model's tokenizer, when it has one.
    fn count_tokens(&self, _texts: &[String]) -> Option<usize> {
        None
    }
}

/// What to load and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalModelRequest {
    pub model_name: String,
    pub device: String,
    pub cache_dir: Option<PathBuf>,
}

/// Loads models for [`LocalHook`].
pub trait LocalModelLoader: Send + Sync {
    /// Inference runtime name, reported in `model_info`.
    fn backend(&self) -> &str {
        "custom"
    }

    fn load(&self, request: &LocalModelRequest) -> anyhow::Result<Arc<dyn LocalModel>>;
}

/// Hook for models running inside this process.
pub struct LocalHook {
    loader: Arc<dyn LocalModelLoader>,
    model: Option<Arc<dyn LocalModel>>,
    device: String,
}

impl Default for LocalHook {
    fn default() -> Self {
        Self::new(Arc::new(CandleLoader))
    }
}

impl LocalHook {
    pub fn new(loader: Arc<dyn LocalModelLoader>) -> Self {
        Self {
            loader,
            model: None,
            device: "cpu".to_string(),
        }
    }

    fn loaded(&self) -> Result<Arc<dyn LocalModel>> {
        self.model
            .clone()
            .ok_or(EmbeddingError::NotInitialized)
    }
}

#[async_trait]
impl ProviderHook for LocalHook {
    fn name(&self) -> &str {
        "local"
    }

    async fn initialize(&mut self, config: &mut EmbeddingConfig) -> Result<()> {
        let device = config.provider_str("device").unwrap_or("cpu").to_string();
        if !SUPPORTED_DEVICES.contains(&device.as_str()) {
            return Err(EmbeddingError::Config(format!(
                "unsupported device {device}; expected one of {}",
                SUPPORTED_DEVICES.join(", ")
            )));
        }

        let request = LocalModelRequest {
            model_name: config.model_name.clone(),
            device: device.clone(),
            cache_dir: config.provider_str("cache_dir").map(PathBuf::from),
        };
        info!("Loading local model {} on {device}", request.model_name);

        let loader = Arc::clone(&self.loader);
        let model = tokio::task::spawn_blocking(move || loader.load(&request))
            .await
            .map_err(|e| EmbeddingError::ProviderInitialization(format!("model loader panicked: {e}")))?
            .map_err(|e| {
                EmbeddingError::ProviderInitialization(format!(
                    "failed to load local model {}: {e:#}",
                    config.model_name
                ))
            })?;

        let actual = model.dimension();
        if actual != config.dimension {
            warn!(
                "Local model {} produces {actual}-dimensional vectors, not {}; using {actual}",
                config.model_name, config.dimension
            );
            config.dimension = actual;
        }

        self.device = device;
        self.model = Some(model);
        Ok(())
    }

    async fn embed(
        &self,
        texts: &[String],
        _embedding_type: EmbeddingType,
        config: &EmbeddingConfig,
    ) -> Result<HookOutput> {
        validate_texts(texts)?;
        let model = self.loaded()?;

        let inputs: Vec<String> = texts
            .iter()
            .map(|t| truncate_to_tokens(t, config.max_tokens, CHARS_PER_TOKEN).to_string())
            .collect();
        let (mut embeddings, token_count) = tokio::task::spawn_blocking(move || {
            let token_count = model.count_tokens(&inputs).unwrap_or_else(|| {
                inputs
                    .iter()
                    .map(|t| estimate_tokens_by_chars(t, CHARS_PER_TOKEN))
                    .sum()
            });
            model.encode(&inputs).map(|embeddings| (embeddings, token_count))
        })
        .await
        .map_err(|e| EmbeddingError::permanent(format!("local inference panicked: {e}")))?
        .map_err(|e| EmbeddingError::permanent(format!("local inference failed: {e:#}")))?;
        debug!("Encoded {} texts locally", embeddings.len());

        reconcile_all(&mut embeddings, config.dimension, "local");
        Ok(HookOutput {
            embeddings,
            token_count,
        })
    }

    fn chars_per_token(&self) -> f64 {
        CHARS_PER_TOKEN
    }

    fn estimate_tokens(&self, texts: &[String]) -> usize {
        self.model
            .as_ref()
            .and_then(|model| model.count_tokens(texts))
            .unwrap_or_else(|| {
                texts
                    .iter()
                    .map(|t| estimate_tokens_by_chars(t, CHARS_PER_TOKEN))
                    .sum()
            })
    }

    fn model_info(&self, config: Option<&EmbeddingConfig>) -> Map<String, Value> {
        let mut info = Map::new();
        info.insert("backend".to_string(), self.loader.backend().into());
        info.insert("device".to_string(), self.device.clone().into());
        info.insert("loaded".to_string(), self.model.is_some().into());
        info.insert(
            "supported_models".to_string(),
            LOCAL_MODELS.iter().map(|m| Value::from(m.name)).collect(),
        );
        if let Some(spec) = config.and_then(|c| find_model(LOCAL_MODELS, &c.model_name)) {
            info.insert("model_description".to_string(), spec.description.into());
        }
        info
    }

    fn close(&mut self) {
        self.model = None;
    }
}
