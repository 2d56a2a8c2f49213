//! In-process LRU cache with per-entry expiry.

use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{CacheStats, EmbeddingCache, cache_key, model_prefix};
use crate::Embedding;
use crate::error::Result;
use crate::types::EmbeddingType;

struct Entry {
    embedding: Embedding,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

struct Inner {
    /// `None` when the cache was created with zero capacity.
    entries: Option<LruCache<String, Entry>>,
    hits: u64,
    misses: u64,
}

/// Bounded in-process LRU cache with per-entry expiry.
pub struct MemoryCache {
    inner: Mutex<Inner>,
    default_ttl: Option<Duration>,
}

impl MemoryCache {
    /// Create a cache holding at most `max_entries` vectors. A capacity of
    /// zero stores nothing.
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: NonZeroUsize::new(max_entries).map(LruCache::new),
                hits: 0,
                misses: 0,
            }),
            default_ttl: None,
        }
    }

    /// Expiry applied when `put` is called without a TTL.
    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Configured capacity.
    pub async fn capacity(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.entries.as_ref().map_or(0, |e| e.cap().get())
    }
}

#[async_trait]
impl EmbeddingCache for MemoryCache {
    async fn get(
        &self,
        text: &str,
        embedding_type: EmbeddingType,
        model: &str,
    ) -> Result<Option<Embedding>> {
        let key = cache_key(text, embedding_type, model);
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let found = match inner.entries.as_mut() {
            Some(entries) => {
                if entries
                    .peek(&key)
                    .is_some_and(|e| e.is_expired(Instant::now()))
                {
                    entries.pop(&key);
                }
                entries.get(&key).map(|e| e.embedding.clone())
            }
            None => None,
        };

        if found.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        Ok(found)
    }

    async fn put(
        &self,
        text: &str,
        embedding: &[f32],
        embedding_type: EmbeddingType,
        model: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let key = cache_key(text, embedding_type, model);
        let expires_at = ttl.or(self.default_ttl).map(|ttl| Instant::now() + ttl);
        let mut inner = self.inner.lock().await;
        let Some(entries) = inner.entries.as_mut() else {
            return Ok(());
        };

        let entry = Entry {
            embedding: embedding.to_vec(),
            expires_at,
        };
        if let Some((evicted, _)) = entries.push(key.clone(), entry)
            && evicted != key
        {
            debug!("Evicted least recently used cache entry {evicted}");
        }
        Ok(())
    }

    async fn clear(&self, model: Option<&str>) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let Some(entries) = inner.entries.as_mut() else {
            return Ok(0);
        };

        let removed = match model {
            None => {
                let count = entries.len();
                entries.clear();
                count
            }
            Some(model) => {
                let prefix = model_prefix(model);
                let keys: Vec<String> = entries
                    .iter()
                    .filter(|(key, _)| key.starts_with(&prefix))
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in &keys {
                    entries.pop(key);
                }
                keys.len()
            }
        };
        info!("Cleared {removed} cached embedding(s)");
        Ok(removed)
    }

    async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: Some(inner.entries.as_ref().map_or(0, LruCache::len)),
        }
    }
}
