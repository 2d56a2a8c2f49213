//! Read-through caching wrapper for any provider.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::EmbeddingCache;
use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::provider::EmbeddingProvider;
use crate::types::{EmbeddingConfig, EmbeddingResult, EmbeddingType};
use crate::validators::l2_normalize;

/// A provider that consults a cache before calling the vendor.
///
/// Only texts missing from the cache are embedded. Cache failures are
/// logged and treated as misses, so a broken cache never fails a call.
pub struct CachedProvider {
    provider: Box<dyn EmbeddingProvider>,
    cache: Arc<dyn EmbeddingCache>,
    ttl: Option<Duration>,
}

impl CachedProvider {
    pub fn new(provider: Box<dyn EmbeddingProvider>, cache: Arc<dyn EmbeddingCache>) -> Self {
        Self {
            provider,
            cache,
            ttl: None,
        }
    }

    /// Expiry for vectors this provider writes.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// The underlying cache.
    pub fn cache(&self) -> &Arc<dyn EmbeddingCache> {
        &self.cache
    }

    /// The wrapped provider.
    pub fn inner(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    async fn lookup(
        &self,
        texts: &[String],
        embedding_type: EmbeddingType,
        config: &EmbeddingConfig,
    ) -> HashMap<String, Embedding> {
        match self
            .cache
            .get_batch(texts, embedding_type, &config.model_name)
            .await
        {
            Ok(mut found) => {
                found.retain(|_, e| e.len() == config.dimension);
                found
            }
            Err(err) => {
                warn!("Embedding cache lookup failed, treating as misses: {err}");
                HashMap::new()
            }
        }
    }

    /// Write `embedding` to the cache and return the vector as stored.
    async fn store(
        &self,
        text: &str,
        mut embedding: Embedding,
        embedding_type: EmbeddingType,
        config: &EmbeddingConfig,
    ) -> Embedding {
        // Provider output is already unit length when `normalize` is set.
        if config.normalize_cache && !config.normalize {
            l2_normalize(&mut embedding);
        }
        if let Err(err) = self
            .cache
            .put(text, &embedding, embedding_type, &config.model_name, self.ttl)
            .await
        {
            warn!("Failed to cache embedding: {err}");
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for CachedProvider {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn config(&self) -> Option<&EmbeddingConfig> {
        self.provider.config()
    }

    fn is_initialized(&self) -> bool {
        self.provider.is_initialized()
    }

    async fn initialize(&mut self, config: EmbeddingConfig) -> Result<()> {
        self.provider.initialize(config).await
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        embedding_type: EmbeddingType,
    ) -> Result<EmbeddingResult> {
        let config = match (self.provider.config(), self.provider.is_initialized()) {
            (Some(config), true) => config,
            _ => return Err(EmbeddingError::NotInitialized),
        };
        let start = Instant::now();

        let cached = self.lookup(texts, embedding_type, config).await;
        let hits = texts.iter().filter(|t| cached.contains_key(*t)).count();
        let mut seen = HashSet::new();
        let misses: Vec<String> = texts
            .iter()
            .filter(|t| !cached.contains_key(*t) && seen.insert(*t))
            .cloned()
            .collect();

        let mut fresh = HashMap::with_capacity(misses.len());
        let mut token_count = 0;
        let mut batch_count = 0;
        if !misses.is_empty() {
            let result = self.provider.embed_batch(&misses, embedding_type).await?;
            token_count = result.token_count;
            batch_count = result.batch_count().unwrap_or(1);
            for (text, embedding) in misses.iter().zip(result.embeddings) {
                let stored = self.store(text, embedding, embedding_type, config).await;
                fresh.insert(text.as_str(), stored);
            }
        }
        debug!(
            "{}: {hits} cache hit(s), {} text(s) embedded",
            self.name(),
            misses.len()
        );

        let embeddings = texts
            .iter()
            .map(|text| {
                cached
                    .get(text)
                    .or_else(|| fresh.get(text.as_str()))
                    .cloned()
                    .ok_or_else(|| {
                        EmbeddingError::permanent(format!("no embedding produced for text {text:?}"))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(EmbeddingResult::new(
            embeddings,
            config.model_name.clone(),
            token_count,
            config.dimension,
            self.provider.name(),
        )?
        .with_processing_time_ms(start.elapsed().as_secs_f64() * 1000.0)
        .with_metadata("embedding_type", embedding_type.as_str())
        .with_metadata("batch_count", batch_count)
        .with_metadata("cache_hits", hits)
        .with_metadata("cache_misses", texts.len() - hits))
    }

    fn model_info(&self) -> Map<String, Value> {
        let mut info = self.provider.model_info();
        info.insert("cached".to_string(), true.into());
        info
    }

    async fn validate_api_key(&self) -> Result<bool> {
        self.provider.validate_api_key().await
    }

    fn estimate_tokens(&self, texts: &[String]) -> usize {
        self.provider.estimate_tokens(texts)
    }

    fn close(&mut self) {
        self.provider.close();
    }
}
