//! Embedding caches.
//!
//! Every backend stores vectors under the same key layout
//! (see [`cache_key`]), so a model's entries can be found by prefix no
//! matter where they live.

mod cached;
mod memory;
mod noop;
mod remote;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Embedding;
use crate::error::Result;
use crate::types::EmbeddingType;

pub use cached::CachedProvider;
pub use memory::MemoryCache;
pub use noop::NoOpCache;
pub use remote::{KeyValueStore, RedisStore, RemoteCache};

/// Namespace shared by every cache key.
pub const CACHE_KEY_PREFIX: &str = "emb";

/// Bumped when the key layout or value encoding changes.
pub const CACHE_KEY_VERSION: &str = "v1";

/// Hex characters of the text digest kept in the key.
const TEXT_HASH_LEN: usize = 16;

/// Cache key for `text` embedded by `model` as `embedding_type`.
///
/// Format: `emb:v1:{model}:{type}:{sha256(text)[..16]}`, with `/` in the
/// model name replaced by `_` and `%`, `:` and glob metacharacters
/// percent-escaped.
pub fn cache_key(text: &str, embedding_type: EmbeddingType, model: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hash = String::with_capacity(TEXT_HASH_LEN);
    for byte in digest.iter().take(TEXT_HASH_LEN / 2) {
        hash.push_str(&format!("{byte:02x}"));
    }
    format!("{}{embedding_type}:{hash}", model_prefix(model))
}

/// Key prefix shared by all entries of `model`.
///
/// The model segment never contains `:` or a glob metacharacter, so the
/// prefix matches exactly one model both by `starts_with` and as a Redis
/// `MATCH` pattern.
pub fn model_prefix(model: &str) -> String {
    let mut segment = String::with_capacity(model.len());
    for c in model.chars() {
        match c {
            '/' => segment.push('_'),
            '%' | ':' | '*' | '?' | '[' | ']' | '\\' => {
                segment.push_str(&format!("%{:02X}", c as u32));
            }
            c => segment.push(c),
        }
    }
    format!("{CACHE_KEY_PREFIX}:{CACHE_KEY_VERSION}:{segment}:")
}

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Current entry count, when the backend can tell cheaply.
    pub entries: Option<usize>,
}

impl CacheStats {
    /// Fraction of lookups that hit, or 0 with no lookups.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A store for computed embeddings.
#[async_trait]
pub trait EmbeddingCache: Send + Sync {
    /// Look up one vector. Expired entries are misses.
    async fn get(
        &self,
        text: &str,
        embedding_type: EmbeddingType,
        model: &str,
    ) -> Result<Option<Embedding>>;

    /// Store a vector, optionally expiring after `ttl`.
    async fn put(
        &self,
        text: &str,
        embedding: &[f32],
        embedding_type: EmbeddingType,
        model: &str,
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// Look up many texts at once. The map holds hits only, keyed by text.
    async fn get_batch(
        &self,
        texts: &[String],
        embedding_type: EmbeddingType,
        model: &str,
    ) -> Result<HashMap<String, Embedding>> {
        let mut found = HashMap::new();
        for text in texts {
            if let Some(embedding) = self.get(text, embedding_type, model).await? {
                found.insert(text.clone(), embedding);
            }
        }
        Ok(found)
    }

    /// Remove entries for `model`, or everything. Returns how many were
    /// removed.
    async fn clear(&self, model: Option<&str>) -> Result<usize>;

    /// Counters since creation.
    async fn stats(&self) -> CacheStats;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cache_key_layout() {
        let key = cache_key("fn main() {}", EmbeddingType::Code, "voyage-code-3");
        assert!(key.starts_with("emb:v1:voyage-code-3:code:"));
        let hash = key.rsplit(':').next().unwrap();
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_cache_key_normalizes_model() {
        let key = cache_key("x", EmbeddingType::Query, "BAAI/bge-small-en-v1.5");
        assert!(key.starts_with("emb:v1:BAAI_bge-small-en-v1.5:query:"));
        assert!(key.starts_with(&model_prefix("BAAI/bge-small-en-v1.5")));
    }

    #[test]
    fn test_model_prefix_escapes_separators() {
        assert_eq!(model_prefix("nomic"), "emb:v1:nomic:");
        assert_eq!(model_prefix("nomic:latest"), "emb:v1:nomic%3Alatest:");
        assert_eq!(model_prefix("m*[?]\\%"), "emb:v1:m%2A%5B%3F%5D%5C%25:");
        assert!(!cache_key("x", EmbeddingType::Code, "nomic:latest").starts_with(&model_prefix("nomic")));
    }

    #[test]
    fn test_cache_key_distinguishes_inputs() {
        let a = cache_key("x", EmbeddingType::Code, "m");
        assert_eq!(a, cache_key("x", EmbeddingType::Code, "m"));
        assert_ne!(a, cache_key("y", EmbeddingType::Code, "m"));
        assert_ne!(a, cache_key("x", EmbeddingType::Document, "m"));
        assert_ne!(a, cache_key("x", EmbeddingType::Code, "n"));
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            entries: None,
        };
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
