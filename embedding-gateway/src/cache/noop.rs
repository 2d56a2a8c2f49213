//! Cache that stores nothing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{CacheStats, EmbeddingCache};
use crate::Embedding;
use crate::error::Result;
use crate::types::EmbeddingType;

/// Cache that stores nothing. Every lookup misses.
#[derive(Debug, Default)]
pub struct NoOpCache {
    misses: AtomicU64,
}

impl NoOpCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EmbeddingCache for NoOpCache {
    async fn get(
        &self,
        _text: &str,
        _embedding_type: EmbeddingType,
        _model: &str,
    ) -> Result<Option<Embedding>> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn put(
        &self,
        _text: &str,
        _embedding: &[f32],
        _embedding_type: EmbeddingType,
        _model: &str,
        _ttl: Option<Duration>,
    ) -> Result<()> {
        Ok(())
    }

    async fn clear(&self, _model: Option<&str>) -> Result<usize> {
        Ok(0)
    }

    async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: 0,
            misses: self.misses.load(Ordering::Relaxed),
            entries: Some(0),
        }
    }
}
