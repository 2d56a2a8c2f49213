//! # Embedding Gateway
//!
//! This crate turns text into embedding vectors through interchangeable
//! providers for the Codex code-search system.
//!
//! ## Features
//!
//! - **Providers**: OpenAI, Voyage AI, Cohere, Gemini, HuggingFace, local
//!   BERT models on candle and a deterministic mock behind one
//!   [`EmbeddingProvider`] trait
//! - **Batching and Retries**: Sub-batching, exponential backoff and timing
//!   shared by every provider through [`BaseProvider`]
//! - **Caching**: In-memory LRU with expiry, Redis, or none
//! - **Model Resolution**: [`ProviderFactory`] maps model names to providers
//!   through a [`ProviderRegistry`]
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embedding Gateway                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ProviderFactory ──► ProviderRegistry ──► BaseProvider<Hook>   │
//! │       │                                        │                │
//! │       ▼                                        ▼                │
//! │  CachedProvider ──► EmbeddingCache     HttpVendor/Local/Mock   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod factory;
pub mod provider;
pub mod registry;
pub mod types;
pub mod validators;

pub use cache::{CacheStats, CachedProvider, EmbeddingCache, MemoryCache, NoOpCache, RemoteCache};
pub use config::{CacheBackend, CacheSettings, GatewaySettings, build_cache, build_provider};
pub use error::{EmbeddingError, Result};
pub use factory::{ProviderFactory, ResolvedProvider};
pub use provider::{BaseProvider, EmbeddingProvider, ProviderHook};
pub use registry::{ProviderConstructor, ProviderRegistry};
pub use types::{EmbeddingBatch, EmbeddingConfig, EmbeddingResult, EmbeddingType};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;
