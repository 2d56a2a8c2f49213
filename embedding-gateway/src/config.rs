//! Gateway settings loaded from TOML or the environment.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::cache::{CachedProvider, EmbeddingCache, MemoryCache, NoOpCache, RedisStore, RemoteCache};
use crate::error::{EmbeddingError, Result};
use crate::factory::ProviderFactory;
use crate::provider::EmbeddingProvider;
use crate::types::{
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS, EmbeddingConfig,
};

/// Model used when settings name none.
pub const DEFAULT_MODEL: &str = "voyage-code-3";

/// Dimension used when neither settings nor the model tables give one.
pub const DEFAULT_DIMENSION: usize = 1024;

/// Default cache capacity.
pub const DEFAULT_CACHE_ENTRIES: usize = 1000;

/// Default cache expiry (one hour).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Which cache backs embedding lookups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
    None,
}

impl FromStr for CacheBackend {
    type Err = EmbeddingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            "none" | "off" | "disabled" => Ok(Self::None),
            other => Err(EmbeddingError::Config(format!(
                "unknown cache backend: {other}"
            ))),
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub backend: CacheBackend,

    /// Capacity of the memory cache.
    pub max_entries: usize,

    /// Entry expiry in seconds. `0` keeps entries until evicted.
    pub ttl_secs: u64,

    /// Connection URL for the Redis backend.
    pub redis_url: Option<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            max_entries: DEFAULT_CACHE_ENTRIES,
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
            redis_url: None,
        }
    }
}

impl CacheSettings {
    /// Expiry as a duration, if any.
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then_some(Duration::from_secs(self.ttl_secs))
    }
}

/// Top-level gateway settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Model to embed with.
    pub model: String,

    /// Provider name. When set, model lookup is skipped.
    pub provider: Option<String>,

    /// Output dimension. Defaults to the model's native dimension.
    pub dimension: Option<usize>,

    pub batch_size: usize,

    /// Per-text token budget. Defaults to the model's limit.
    pub max_tokens: Option<usize>,

    pub timeout_seconds: u64,

    pub max_retries: u32,

    pub normalize: bool,

    pub api_key: Option<String>,

    /// Vendor API root override.
    pub base_url: Option<String>,

    /// Extra vendor-specific settings, merged into `provider_config`.
    pub provider_options: HashMap<String, Value>,

    pub cache: CacheSettings,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            provider: None,
            dimension: None,
            batch_size: DEFAULT_BATCH_SIZE,
            max_tokens: None,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            normalize: true,
            api_key: None,
            base_url: None,
            provider_options: HashMap::new(),
            cache: CacheSettings::default(),
        }
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| EmbeddingError::Config(format!("invalid {key}={value}: {e}")))
}

impl GatewaySettings {
    /// Parse settings from TOML. Missing fields take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| EmbeddingError::Config(format!("invalid gateway settings: {e}")))
    }

    /// Settings from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Settings from an arbitrary variable source.
    ///
    /// Reads `EMBEDDING_MODEL`, `EMBEDDING_PROVIDER`, `EMBEDDING_DIMENSION`,
    /// `EMBEDDING_BATCH_SIZE`, `EMBEDDING_MAX_TOKENS`,
    /// `EMBEDDING_CACHE_BACKEND`, `MEMORY_CACHE_SIZE`, `CACHE_DEFAULT_TTL`
    /// and `REDIS_URL`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();
        if let Some(model) = lookup("EMBEDDING_MODEL") {
            settings.model = model;
        }
        settings.provider = lookup("EMBEDDING_PROVIDER");
        if let Some(value) = lookup("EMBEDDING_DIMENSION") {
            settings.dimension = Some(parse_env("EMBEDDING_DIMENSION", &value)?);
        }
        if let Some(value) = lookup("EMBEDDING_BATCH_SIZE") {
            settings.batch_size = parse_env("EMBEDDING_BATCH_SIZE", &value)?;
        }
        if let Some(value) = lookup("EMBEDDING_MAX_TOKENS") {
            settings.max_tokens = Some(parse_env("EMBEDDING_MAX_TOKENS", &value)?);
        }
        if let Some(value) = lookup("EMBEDDING_CACHE_BACKEND") {
            settings.cache.backend = value.parse()?;
        }
        if let Some(value) = lookup("MEMORY_CACHE_SIZE") {
            settings.cache.max_entries = parse_env("MEMORY_CACHE_SIZE", &value)?;
        }
        if let Some(value) = lookup("CACHE_DEFAULT_TTL") {
            settings.cache.ttl_secs = parse_env("CACHE_DEFAULT_TTL", &value)?;
        }
        settings.cache.redis_url = lookup("REDIS_URL");
        Ok(settings)
    }

    /// Provider configuration for these settings, starting from the
    /// model's default configuration when one is known.
    pub fn embedding_config(&self, base: Option<EmbeddingConfig>) -> Result<EmbeddingConfig> {
        let mut config = match base {
            Some(config) => config,
            None => EmbeddingConfig::new(
                self.model.as_str(),
                self.dimension.unwrap_or(DEFAULT_DIMENSION),
            )?,
        };
        config.model_name = self.model.clone();
        if let Some(dimension) = self.dimension {
            config.dimension = dimension;
        }
        if let Some(max_tokens) = self.max_tokens {
            config.max_tokens = max_tokens;
        }
        config.batch_size = self.batch_size;
        config.timeout_seconds = self.timeout_seconds;
        config.max_retries = self.max_retries;
        config.normalize = self.normalize;
        config
            .provider_config
            .extend(self.provider_options.clone());
        if let Some(api_key) = &self.api_key {
            config
                .provider_config
                .insert("api_key".to_string(), api_key.clone().into());
        }
        if let Some(base_url) = &self.base_url {
            config
                .provider_config
                .insert("base_url".to_string(), base_url.clone().into());
        }
        config.validate()?;
        Ok(config)
    }
}

/// Build the cache selected by `settings`.
pub async fn build_cache(settings: &CacheSettings) -> Result<Arc<dyn EmbeddingCache>> {
    let cache: Arc<dyn EmbeddingCache> = match settings.backend {
        CacheBackend::Memory => {
            Arc::new(MemoryCache::new(settings.max_entries).with_default_ttl(settings.ttl()))
        }
        CacheBackend::Redis => {
            let url = settings.redis_url.as_deref().ok_or_else(|| {
                EmbeddingError::Config("redis cache backend requires redis_url".to_string())
            })?;
            let store = RedisStore::connect(url).await?;
            Arc::new(RemoteCache::new(store).with_default_ttl(settings.ttl()))
        }
        CacheBackend::None => Arc::new(NoOpCache::new()),
    };
    info!("Using {:?} embedding cache", settings.backend);
    Ok(cache)
}

/// Create, initialize and, unless caching is off, wrap a provider for
/// `settings`.
pub async fn build_provider(
    factory: &ProviderFactory,
    settings: &GatewaySettings,
) -> Result<Box<dyn EmbeddingProvider>> {
    let provider = factory.create_from_settings(settings).await?.initialize().await?;
    if settings.cache.backend == CacheBackend::None {
        return Ok(provider);
    }
    let cache = build_cache(&settings.cache).await?;
    Ok(Box::new(
        CachedProvider::new(provider, cache).with_ttl(settings.cache.ttl()),
    ))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let settings = GatewaySettings::default();
        assert_eq!(settings.model, "voyage-code-3");
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.cache.backend, CacheBackend::Memory);
        assert_eq!(settings.cache.ttl(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_from_toml() {
        let settings = GatewaySettings::from_toml_str(
            r#"
            model = "mock-embedding"
            dimension = 128
            batch_size = 10

            [provider_options]
            delay_ms = 5

            [cache]
            backend = "none"
            ttl_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(settings.model, "mock-embedding");
        assert_eq!(settings.dimension, Some(128));
        assert_eq!(settings.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(settings.cache.backend, CacheBackend::None);
        assert_eq!(settings.cache.ttl(), None);

        let config = settings.embedding_config(None).unwrap();
        assert_eq!(config.dimension, 128);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.provider_u64("delay_ms"), Some(5));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            GatewaySettings::from_toml_str("batch_size = \"many\""),
            Err(EmbeddingError::Config(_))
        ));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("EMBEDDING_MODEL", "mock-embedding"),
            ("EMBEDDING_DIMENSION", "384"),
            ("EMBEDDING_CACHE_BACKEND", "redis"),
            ("REDIS_URL", "redis://localhost:6379/0"),
        ]
        .into_iter()
        .collect();
        let settings =
            GatewaySettings::from_lookup(|k| vars.get(k).map(ToString::to_string)).unwrap();

        assert_eq!(settings.model, "mock-embedding");
        assert_eq!(settings.dimension, Some(384));
        assert_eq!(settings.cache.backend, CacheBackend::Redis);
        assert_eq!(
            settings.cache.redis_url.as_deref(),
            Some("redis://localhost:6379/0")
        );
    }

    #[test]
    fn test_from_lookup_rejects_bad_numbers() {
        let err = GatewaySettings::from_lookup(|k| {
            (k == "EMBEDDING_BATCH_SIZE").then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("EMBEDDING_BATCH_SIZE"));
    }

    #[test]
    fn test_settings_override_model_defaults() {
        let settings = GatewaySettings {
            model: "voyage-code-3".to_string(),
            api_key: Some("pa-test".to_string()),
            max_tokens: Some(1000),
            ..Default::default()
        };
        let base = EmbeddingConfig::builder("voyage-code-3", 1024)
            .max_tokens(32000)
            .build()
            .unwrap();
        let config = settings.embedding_config(Some(base)).unwrap();
        assert_eq!(config.dimension, 1024);
        assert_eq!(config.max_tokens, 1000);
        assert_eq!(config.provider_str("api_key"), Some("pa-test"));
    }

    #[tokio::test]
    async fn test_redis_backend_requires_url() {
        let settings = CacheSettings {
            backend: CacheBackend::Redis,
            ..Default::default()
        };
        assert!(matches!(
            build_cache(&settings).await,
            Err(EmbeddingError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_build_memory_cache() {
        let cache = build_cache(&CacheSettings::default()).await.unwrap();
        assert_eq!(cache.stats().await.entries, Some(0));
    }
}
