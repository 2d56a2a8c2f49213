//! BERT-family sentence embedding models on candle.
//!
//! Weights, config and tokenizer come from the HuggingFace Hub (or a local
//! directory holding the same files). Short names such as
//! `all-MiniLM-L6-v2` resolve to the `sentence-transformers` organisation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::api::sync::ApiBuilder;
use serde::Deserialize;
use tokenizers::{PaddingParams, Tokenizer, TruncationParams};
use tracing::{debug, info};

use super::local::{LocalModel, LocalModelLoader, LocalModelRequest};
use crate::Embedding;

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const SAFETENSORS_FILE: &str = "model.safetensors";
const PYTORCH_FILE: &str = "pytorch_model.bin";

/// How token states collapse into one sentence vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pooling {
    /// Mask-weighted mean over tokens (sentence-transformers models).
    Mean,
    /// The `[CLS]` token state (BGE models).
    Cls,
}

/// Hub repository and pooling for a model name.
pub fn resolve_repo(model_name: &str) -> (String, Pooling) {
    let repo = if model_name.contains('/') {
        model_name.to_string()
    } else {
        format!("sentence-transformers/{model_name}")
    };
    let pooling = if repo.to_ascii_lowercase().starts_with("baai/bge") {
        Pooling::Cls
    } else {
        Pooling::Mean
    };
    (repo, pooling)
}

fn select_device(name: &str) -> anyhow::Result<Device> {
    match name {
        "cpu" => Ok(Device::Cpu),
        "cuda" => Device::new_cuda(0).context("CUDA device unavailable"),
        "mps" => Device::new_metal(0).context("Metal device unavailable"),
        other => anyhow::bail!("unsupported device {other}"),
    }
}

/// Collapse `hidden` (`batch x tokens x width`) into `batch x width`.
pub fn pool(hidden: &Tensor, attention_mask: &Tensor, pooling: Pooling) -> candle_core::Result<Tensor> {
    match pooling {
        Pooling::Cls => hidden.narrow(1, 0, 1)?.squeeze(1),
        Pooling::Mean => {
            let mask = attention_mask.to_dtype(DType::F32)?.unsqueeze(2)?;
            let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
            let counts = mask.sum(1)?;
            summed.broadcast_div(&counts)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelShape {
    hidden_size: usize,
    #[serde(default = "default_max_positions")]
    max_position_embeddings: usize,
}

fn default_max_positions() -> usize {
    512
}

struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

fn local_files(dir: &Path) -> Option<ModelFiles> {
    let config = dir.join(CONFIG_FILE);
    let tokenizer = dir.join(TOKENIZER_FILE);
    if !config.is_file() || !tokenizer.is_file() {
        return None;
    }
    let weights = [SAFETENSORS_FILE, PYTORCH_FILE]
        .iter()
        .map(|f| dir.join(f))
        .find(|p| p.is_file())?;
    Some(ModelFiles {
        config,
        tokenizer,
        weights,
    })
}

fn hub_files(repo: &str, cache_dir: Option<&Path>) -> anyhow::Result<ModelFiles> {
    let mut builder = ApiBuilder::new().with_progress(false);
    if let Some(dir) = cache_dir {
        builder = builder.with_cache_dir(dir.to_path_buf());
    }
    let api = builder.build().context("failed to create HuggingFace Hub client")?;
    let repo_api = api.model(repo.to_string());
    let config = repo_api
        .get(CONFIG_FILE)
        .with_context(|| format!("failed to fetch {CONFIG_FILE} for {repo}"))?;
    let tokenizer = repo_api
        .get(TOKENIZER_FILE)
        .with_context(|| format!("failed to fetch {TOKENIZER_FILE} for {repo}"))?;
    let weights = repo_api
        .get(SAFETENSORS_FILE)
        .or_else(|_| repo_api.get(PYTORCH_FILE))
        .with_context(|| format!("failed to fetch weights for {repo}"))?;
    Ok(ModelFiles {
        config,
        tokenizer,
        weights,
    })
}

/// Loads BERT-architecture models with candle.
///
/// `model_name` may also be a directory holding `config.json`,
/// `tokenizer.json` and `model.safetensors` (or `pytorch_model.bin`).
#[derive(Debug, Default, Clone, Copy)]
pub struct CandleLoader;

impl LocalModelLoader for CandleLoader {
    fn backend(&self) -> &str {
        "candle"
    }

    fn load(&self, request: &LocalModelRequest) -> anyhow::Result<Arc<dyn LocalModel>> {
        let device = select_device(&request.device)?;
        let (repo, pooling) = resolve_repo(&request.model_name);
        let files = match local_files(Path::new(&request.model_name)) {
            Some(files) => files,
            None => hub_files(&repo, request.cache_dir.as_deref())?,
        };
        debug!("Loading {repo} weights from {}", files.weights.display());

        let raw_config = std::fs::read_to_string(&files.config)
            .with_context(|| format!("failed to read {}", files.config.display()))?;
        let config: Config = serde_json::from_str(&raw_config)
            .with_context(|| format!("{repo} is not a BERT-architecture model"))?;
        let shape: ModelShape = serde_json::from_str(&raw_config)?;

        let vb = if files.weights.extension().is_some_and(|e| e == "safetensors") {
            let bytes = std::fs::read(&files.weights)
                .with_context(|| format!("failed to read {}", files.weights.display()))?;
            VarBuilder::from_buffered_safetensors(bytes, DTYPE, &device)?
        } else {
            VarBuilder::from_pth(&files.weights, DTYPE, &device)?
        };
        let model = BertModel::load(vb, &config)?;

        let mut tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(anyhow::Error::msg)?;
        tokenizer.with_padding(Some(PaddingParams::default()));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: shape.max_position_embeddings,
                ..Default::default()
            }))
            .map_err(anyhow::Error::msg)?;

        info!(
            "Loaded {repo} ({} dimensions, {pooling:?} pooling)",
            shape.hidden_size
        );
        Ok(Arc::new(CandleModel {
            model,
            tokenizer,
            device,
            pooling,
            dimension: shape.hidden_size,
        }))
    }
}

/// A loaded BERT encoder with its tokenizer.
pub struct CandleModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    pooling: Pooling,
    dimension: usize,
}

impl LocalModel for CandleModel {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, texts: &[String]) -> anyhow::Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(anyhow::Error::msg)?;

        let mut ids = Vec::with_capacity(encodings.len());
        let mut masks = Vec::with_capacity(encodings.len());
        for encoding in &encodings {
            ids.push(Tensor::new(encoding.get_ids(), &self.device)?);
            masks.push(Tensor::new(encoding.get_attention_mask(), &self.device)?);
        }
        let input_ids = Tensor::stack(&ids, 0)?;
        let attention_mask = Tensor::stack(&masks, 0)?;
        let token_type_ids = input_ids.zeros_like()?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        let pooled = pool(&hidden, &attention_mask, self.pooling)?;
        Ok(pooled.to_device(&Device::Cpu)?.to_vec2::<f32>()?)
    }

    fn count_tokens(&self, texts: &[String]) -> Option<usize> {
        texts
            .iter()
            .map(|text| {
                self.tokenizer
                    .encode(text.as_str(), true)
                    .ok()
                    .map(|e| e.get_ids().len())
            })
            .sum()
    }
}
