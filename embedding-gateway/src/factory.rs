//! Model-name to provider resolution.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::GatewaySettings;
use crate::error::{EmbeddingError, Result};
use crate::provider::EmbeddingProvider;
use crate::registry::ProviderRegistry;
use crate::types::EmbeddingConfig;

/// Most suggestions listed in a `ModelNotSupported` error.
const MAX_SUGGESTIONS: usize = 5;

/// A model the factory can route without registry help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinModel {
    pub name: &'static str,
    pub provider: &'static str,
    pub dimension: usize,
    pub max_tokens: usize,
}

const fn builtin(
    name: &'static str,
    provider: &'static str,
    dimension: usize,
    max_tokens: usize,
) -> BuiltinModel {
    BuiltinModel {
        name,
        provider,
        dimension,
        max_tokens,
    }
}

/// Fallback routing table, including historical model names.
pub const BUILTIN_MODELS: &[BuiltinModel] = &[
    builtin("text-embedding-3-small", "openai", 1536, 8191),
    builtin("text-embedding-3-large", "openai", 3072, 8191),
    builtin("text-embedding-ada-002", "openai", 1536, 8191),
    builtin("voyage-code-3", "voyage", 1024, 32000),
    builtin("voyage-3-large", "voyage", 1024, 32000),
    builtin("voyage-3", "voyage", 1024, 32000),
    builtin("voyage-3-lite", "voyage", 512, 32000),
    builtin("voyage-code-2", "voyage", 1536, 16000),
    builtin("voyage-large-2", "voyage", 1536, 16000),
    builtin("voyage-2", "voyage", 1024, 4000),
    builtin("embed-english-v3.0", "cohere", 1024, 512),
    builtin("embed-multilingual-v3.0", "cohere", 1024, 512),
    builtin("embed-english-light-v3.0", "cohere", 384, 512),
    builtin("embed-english-v2.0", "cohere", 4096, 512),
    builtin("text-embedding-004", "gemini", 768, 2048),
    builtin("gemini-embedding-001", "gemini", 3072, 2048),
    builtin("embedding-001", "gemini", 768, 2048),
    builtin("sentence-transformers/all-MiniLM-L6-v2", "huggingface", 384, 256),
    builtin("sentence-transformers/all-mpnet-base-v2", "huggingface", 768, 384),
    builtin("microsoft/codebert-base", "huggingface", 768, 512),
    builtin("microsoft/unixcoder-base", "huggingface", 768, 512),
    builtin("BAAI/bge-large-en-v1.5", "huggingface", 1024, 512),
    builtin("all-MiniLM-L6-v2", "local", 384, 256),
    builtin("all-MiniLM-L12-v2", "local", 384, 256),
    builtin("mock-embedding", "mock", 384, 8192),
];

impl BuiltinModel {
    fn default_config(&self) -> Result<EmbeddingConfig> {
        EmbeddingConfig::builder(self.name, self.dimension)
            .max_tokens(self.max_tokens)
            .build()
    }
}

fn find_builtin(model: &str) -> Option<&'static BuiltinModel> {
    BUILTIN_MODELS.iter().find(|m| m.name == model)
}

/// A constructed provider and the configuration to initialize it with.
pub struct ResolvedProvider {
    pub provider_name: String,
    pub provider: Box<dyn EmbeddingProvider>,
    pub config: EmbeddingConfig,
}

impl ResolvedProvider {
    /// Initialize the provider with the resolved configuration.
    pub async fn initialize(self) -> Result<Box<dyn EmbeddingProvider>> {
        let mut provider = self.provider;
        provider.initialize(self.config).await?;
        Ok(provider)
    }
}

/// Resolves model names to providers.
///
/// Lookup order: the registry, models added with
/// [`ProviderFactory::register_model`], then [`BUILTIN_MODELS`].
pub struct ProviderFactory {
    registry: Arc<ProviderRegistry>,
    extra_models: RwLock<HashMap<String, (String, EmbeddingConfig)>>,
}

impl ProviderFactory {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            extra_models: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    async fn resolve(&self, model: &str) -> Result<Option<(String, EmbeddingConfig)>> {
        if let Some(provider) = self.registry.get_provider_for_model(model).await {
            let config = match self.registry.get_default_config(model).await {
                Some(config) => config,
                None => match find_builtin(model) {
                    Some(builtin) => builtin.default_config()?,
                    None => {
                        return Err(EmbeddingError::Config(format!(
                            "no default configuration for model {model}"
                        )));
                    }
                },
            };
            return Ok(Some((provider, config)));
        }
        if let Some(entry) = self.extra_models.read().await.get(model) {
            return Ok(Some(entry.clone()));
        }
        match find_builtin(model) {
            Some(builtin) => Ok(Some((
                builtin.provider.to_string(),
                builtin.default_config()?,
            ))),
            None => Ok(None),
        }
    }

    async fn unsupported(&self, model: &str) -> EmbeddingError {
        let needle = model.to_lowercase();
        let mut suggestions: Vec<String> = self
            .available_models()
            .await
            .into_iter()
            .filter(|known| {
                let known = known.to_lowercase();
                known.contains(&needle) || needle.contains(&known)
            })
            .collect();
        suggestions.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        suggestions.truncate(MAX_SUGGESTIONS);

        let hint = model.contains('/').then(|| {
            "namespaced community models are served by the huggingface provider; \
             use create_provider_by_name(\"huggingface\", ...)"
                .to_string()
        });
        EmbeddingError::ModelNotSupported {
            model: model.to_string(),
            suggestions,
            hint,
        }
    }

    async fn instantiate(
        &self,
        provider_name: &str,
        config: EmbeddingConfig,
    ) -> Result<ResolvedProvider> {
        let provider = self.registry.create(provider_name).await.map_err(|e| {
            EmbeddingError::ProviderInitialization(format!(
                "could not construct provider {provider_name}: {e}"
            ))
        })?;
        debug!(
            "Created {provider_name} provider for model {}",
            config.model_name
        );
        Ok(ResolvedProvider {
            provider_name: provider_name.to_string(),
            provider,
            config,
        })
    }

    /// Default configuration for `model`.
    pub async fn default_config(&self, model: &str) -> Result<EmbeddingConfig> {
        match self.resolve(model).await? {
            Some((_, config)) => Ok(config),
            None => Err(self.unsupported(model).await),
        }
    }

    /// Provider for `model`. Uses `config` when given, else the model's
    /// default configuration.
    pub async fn create_provider(
        &self,
        model: &str,
        config: Option<EmbeddingConfig>,
    ) -> Result<ResolvedProvider> {
        let Some((provider_name, default_config)) = self.resolve(model).await? else {
            return Err(self.unsupported(model).await);
        };
        let config = config.unwrap_or(default_config);
        config.validate()?;
        self.instantiate(&provider_name, config).await
    }

    /// Provider by name, skipping model lookup.
    pub async fn create_provider_by_name(
        &self,
        provider_name: &str,
        config: EmbeddingConfig,
    ) -> Result<ResolvedProvider> {
        config.validate()?;
        if !self.registry.has_provider(provider_name).await {
            return Err(EmbeddingError::ProviderNotFound(provider_name.to_string()));
        }
        self.instantiate(provider_name, config).await
    }

    /// Provider described by `settings`.
    pub async fn create_from_settings(&self, settings: &GatewaySettings) -> Result<ResolvedProvider> {
        let base = match settings.provider.as_deref() {
            Some(_) => None,
            None => self.resolve(&settings.model).await?.map(|(_, c)| c),
        };
        let config = settings.embedding_config(base)?;
        match settings.provider.as_deref() {
            Some(provider) => self.create_provider_by_name(provider, config).await,
            None => self.create_provider(&settings.model, Some(config)).await,
        }
    }

    /// Route `model` to `provider` from now on.
    pub async fn register_model(
        &self,
        model: &str,
        provider: &str,
        config: EmbeddingConfig,
    ) -> Result<()> {
        config.validate()?;
        self.extra_models
            .write()
            .await
            .insert(model.to_string(), (provider.to_string(), config));
        info!("Registered model {model} for provider {provider}");
        Ok(())
    }

    /// Every model name the factory can resolve, sorted.
    pub async fn available_models(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.registry.list_models(None).await.into_iter().collect();
        names.extend(self.extra_models.read().await.keys().cloned());
        names.extend(BUILTIN_MODELS.iter().map(|m| m.name.to_string()));
        names.into_iter().collect()
    }

    /// Create and initialize a provider for `model`.
    pub async fn create_initialized(
        &self,
        model: &str,
        config: Option<EmbeddingConfig>,
    ) -> Result<Box<dyn EmbeddingProvider>> {
        self.create_provider(model, config).await?.initialize().await
    }
}
