//! Provider registry.
//!
//! Maps provider names to constructors and model names to providers. One
//! registry is built at startup and shared as `Arc<ProviderRegistry>`; the
//! factory resolves models through it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{EmbeddingError, Result};
use crate::provider::vendors::{HTTP_VENDORS, LOCAL_MODELS, MOCK_MODELS, ModelSpec, VendorProfile};
use crate::provider::{
    BaseProvider, CandleLoader, EmbeddingProvider, HttpVendor, LocalHook, LocalModelLoader,
    MockHook,
};
use crate::types::EmbeddingConfig;

/// Builds a fresh, uninitialized provider.
pub type ProviderConstructor =
    Arc<dyn Fn() -> Result<Box<dyn EmbeddingProvider>> + Send + Sync>;

/// Constructor for an HTTP vendor.
pub fn http_constructor(profile: &'static VendorProfile) -> ProviderConstructor {
    Arc::new(move || {
        let hook = HttpVendor::new(profile);
        Ok(Box::new(BaseProvider::new(hook)) as Box<dyn EmbeddingProvider>)
    })
}

/// Constructor for the local provider using `loader` to load models.
pub fn local_constructor(loader: Arc<dyn LocalModelLoader>) -> ProviderConstructor {
    Arc::new(move || {
        let hook = LocalHook::new(Arc::clone(&loader));
        Ok(Box::new(BaseProvider::new(hook)) as Box<dyn EmbeddingProvider>)
    })
}

/// Constructor for the mock provider.
pub fn mock_constructor() -> ProviderConstructor {
    Arc::new(|| Ok(Box::new(BaseProvider::new(MockHook::new())) as Box<dyn EmbeddingProvider>))
}

#[derive(Default)]
struct Catalog {
    constructors: HashMap<String, ProviderConstructor>,
    model_providers: HashMap<String, String>,
    default_configs: HashMap<String, HashMap<String, EmbeddingConfig>>,
    builtins_seeded: bool,
}

impl Catalog {
    fn insert(
        &mut self,
        name: &str,
        constructor: ProviderConstructor,
        models: HashMap<String, EmbeddingConfig>,
    ) {
        if self
            .constructors
            .insert(name.to_string(), constructor)
            .is_some()
        {
            warn!("Overwriting registered embedding provider {name}");
        }
        for model in models.keys() {
            if let Some(previous) = self.model_providers.insert(model.clone(), name.to_string())
                && previous != name
            {
                warn!("Model {model} moved from provider {previous} to {name}");
            }
        }
        self.default_configs
            .entry(name.to_string())
            .or_default()
            .extend(models);
    }

    fn seed_builtins(&mut self) {
        for profile in HTTP_VENDORS {
            self.insert(
                profile.name,
                http_constructor(*profile),
                default_configs(profile.models),
            );
        }
        self.insert(
            "local",
            local_constructor(Arc::new(CandleLoader)),
            default_configs(LOCAL_MODELS),
        );
        self.insert("mock", mock_constructor(), default_configs(MOCK_MODELS));
        self.builtins_seeded = true;
        info!(
            "Registered {} built-in embedding providers",
            self.constructors.len()
        );
    }
}

fn default_configs(models: &'static [ModelSpec]) -> HashMap<String, EmbeddingConfig> {
    let mut configs = HashMap::with_capacity(models.len());
    for spec in models {
        match spec.default_config() {
            Ok(config) => {
                configs.insert(spec.name.to_string(), config);
            }
            Err(err) => warn!("Skipping model {}: {err}", spec.name),
        }
    }
    configs
}

/// Catalog of embedding providers and the models they serve.
#[derive(Default)]
pub struct ProviderRegistry {
    catalog: RwLock<Catalog>,
}

impl ProviderRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the seven built-in providers: `openai`,
    /// `voyage`, `cohere`, `gemini`, `huggingface`, `local` and `mock`.
    pub fn with_builtins() -> Self {
        let mut catalog = Catalog::default();
        catalog.seed_builtins();
        Self {
            catalog: RwLock::new(catalog),
        }
    }

    /// Seed the built-in providers unless already done.
    pub async fn ensure_builtins(&self) {
        let mut catalog = self.catalog.write().await;
        if !catalog.builtins_seeded {
            catalog.seed_builtins();
        }
    }

    /// Register a provider and the models it serves.
    ///
    /// The constructor is called once up front; it must succeed and produce
    /// a provider with a non-empty name. Re-registering a name replaces the
    /// constructor with a warning.
    pub async fn register_provider(
        &self,
        name: &str,
        constructor: ProviderConstructor,
        models: HashMap<String, EmbeddingConfig>,
    ) -> Result<()> {
        if name.trim().is_empty() {
            return Err(EmbeddingError::InvalidProvider(
                "provider name must not be empty".to_string(),
            ));
        }
        let sample = constructor().map_err(|e| {
            EmbeddingError::InvalidProvider(format!("constructor for {name} failed: {e}"))
        })?;
        if sample.name().is_empty() {
            return Err(EmbeddingError::InvalidProvider(format!(
                "constructor for {name} built a provider without a name"
            )));
        }
        for (model, config) in &models {
            config.validate().map_err(|e| {
                EmbeddingError::InvalidProvider(format!("default config for {model}: {e}"))
            })?;
        }

        let count = models.len();
        self.catalog.write().await.insert(name, constructor, models);
        debug!("Registered embedding provider {name} with {count} model(s)");
        Ok(())
    }

    /// Remove a provider and every model mapped to it. Returns whether it
    /// was registered.
    pub async fn unregister_provider(&self, name: &str) -> bool {
        let mut catalog = self.catalog.write().await;
        let existed = catalog.constructors.remove(name).is_some();
        catalog.model_providers.retain(|_, provider| provider.as_str() != name);
        catalog.default_configs.remove(name);
        if existed {
            debug!("Unregistered embedding provider {name}");
        }
        existed
    }

    /// Provider serving `model`.
    pub async fn get_provider_for_model(&self, model: &str) -> Option<String> {
        self.catalog.read().await.model_providers.get(model).cloned()
    }

    /// Default configuration registered for `model`.
    pub async fn get_default_config(&self, model: &str) -> Option<EmbeddingConfig> {
        let catalog = self.catalog.read().await;
        let provider = catalog.model_providers.get(model)?;
        catalog.default_configs.get(provider)?.get(model).cloned()
    }

    /// Whether `name` is registered.
    pub async fn has_provider(&self, name: &str) -> bool {
        self.catalog.read().await.constructors.contains_key(name)
    }

    /// Build a new, uninitialized instance of provider `name`.
    pub async fn create(&self, name: &str) -> Result<Box<dyn EmbeddingProvider>> {
        let constructor = self
            .catalog
            .read()
            .await
            .constructors
            .get(name)
            .cloned()
            .ok_or_else(|| EmbeddingError::ProviderNotFound(name.to_string()))?;
        constructor()
    }

    /// Registered provider names, sorted.
    pub async fn list_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .catalog
            .read()
            .await
            .constructors
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Registered model names, sorted, optionally for one provider.
    pub async fn list_models(&self, provider: Option<&str>) -> Vec<String> {
        let catalog = self.catalog.read().await;
        let mut models: Vec<String> = catalog
            .model_providers
            .iter()
            .filter(|(_, p)| provider.is_none_or(|wanted| p.as_str() == wanted))
            .map(|(model, _)| model.clone())
            .collect();
        models.sort();
        models
    }

    /// Remove everything, built-ins included.
    pub async fn clear(&self) {
        *self.catalog.write().await = Catalog::default();
        debug!("Cleared embedding provider registry");
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn models(names: &[&str]) -> HashMap<String, EmbeddingConfig> {
        names
            .iter()
            .map(|n| (n.to_string(), EmbeddingConfig::new(*n, 8).unwrap()))
            .collect()
    }

    #[tokio::test]
    async fn test_builtins_seeded() {
        let registry = ProviderRegistry::with_builtins();
        assert_eq!(
            registry.list_providers().await,
            vec!["cohere", "gemini", "huggingface", "local", "mock", "openai", "voyage"]
        );
        assert_eq!(
            registry.get_provider_for_model("voyage-code-3").await.as_deref(),
            Some("voyage")
        );
        assert_eq!(
            registry
                .get_default_config("mock-embedding")
                .await
                .map(|c| c.dimension),
            Some(384)
        );
        let mock = registry.create("mock").await.unwrap();
        assert_eq!(mock.name(), "mock");
        assert!(!mock.is_initialized());
        let local = registry.create("local").await.unwrap();
        assert_eq!(local.model_info()["backend"], "candle");
    }

    #[tokio::test]
    async fn test_ensure_builtins_is_idempotent() {
        let registry = ProviderRegistry::new();
        registry.ensure_builtins().await;
        let first = registry.list_models(None).await;
        registry.ensure_builtins().await;
        assert_eq!(registry.list_models(None).await, first);
    }

    #[tokio::test]
    async fn test_register_round_trip() {
        let registry = ProviderRegistry::new();
        registry
            .register_provider("x", mock_constructor(), models(&["m"]))
            .await
            .unwrap();
        assert_eq!(registry.get_provider_for_model("m").await.as_deref(), Some("x"));
        assert_eq!(registry.list_models(Some("x")).await, vec!["m"]);

        assert!(registry.unregister_provider("x").await);
        assert_eq!(registry.get_provider_for_model("m").await, None);
        assert!(!registry.unregister_provider("x").await);
        assert!(matches!(
            registry.create("x").await,
            Err(EmbeddingError::ProviderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_register_rejects_broken_constructor() {
        let registry = ProviderRegistry::new();
        let broken: ProviderConstructor =
            Arc::new(|| Err(EmbeddingError::Config("no backend".to_string())));
        assert!(matches!(
            registry.register_provider("broken", broken, HashMap::new()).await,
            Err(EmbeddingError::InvalidProvider(_))
        ));
        assert!(matches!(
            registry
                .register_provider("", mock_constructor(), HashMap::new())
                .await,
            Err(EmbeddingError::InvalidProvider(_))
        ));
        assert!(registry.list_providers().await.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_keeps_latest() {
        let registry = ProviderRegistry::with_builtins();
        registry
            .register_provider("mock", mock_constructor(), models(&["custom-mock"]))
            .await
            .unwrap();
        assert_eq!(
            registry.get_provider_for_model("custom-mock").await.as_deref(),
            Some("mock")
        );
        assert!(
            registry
                .list_models(Some("mock"))
                .await
                .contains(&"mock-embedding".to_string())
        );
    }

    #[tokio::test]
    async fn test_clear() {
        let registry = ProviderRegistry::with_builtins();
        registry.clear().await;
        assert!(registry.list_providers().await.is_empty());
        assert!(registry.list_models(None).await.is_empty());

        registry.ensure_builtins().await;
        assert_eq!(registry.list_providers().await.len(), 7);
    }
}
