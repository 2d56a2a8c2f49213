//! Static per-vendor tables: supported models, credentials, endpoints.

use crate::error::Result;
use crate::types::EmbeddingConfig;
use crate::validators::ApiKeyRule;

/// A model a provider knows how to serve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSpec {
    /// Vendor model identifier.
    pub name: &'static str,
    /// Native output dimension.
    pub dimension: usize,
    /// Maximum input tokens per text.
    pub max_tokens: usize,
    /// Short description for `model_info`.
    pub description: &'static str,
    /// Vendor task types the model accepts, if any.
    pub task_types: &'static [&'static str],
}

const fn model(
    name: &'static str,
    dimension: usize,
    max_tokens: usize,
    description: &'static str,
) -> ModelSpec {
    ModelSpec {
        name,
        dimension,
        max_tokens,
        description,
        task_types: &[],
    }
}

impl ModelSpec {
    /// Configuration with this model's native dimension and token budget.
    pub fn default_config(&self) -> Result<EmbeddingConfig> {
        EmbeddingConfig::builder(self.name, self.dimension)
            .max_tokens(self.max_tokens)
            .build()
    }
}

/// Find a model by exact name.
pub fn find_model(models: &'static [ModelSpec], name: &str) -> Option<&'static ModelSpec> {
    models.iter().find(|m| m.name == name)
}

/// Wire format family spoken by an HTTP vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// `POST /embeddings` with `input`, `data[].embedding`.
    OpenAi,
    /// OpenAI-shaped, plus `input_type` and `output_dimension`.
    Voyage,
    /// `POST /embed` with `texts`, `input_type`, `embeddings.float`.
    Cohere,
    /// `POST /models/{model}:batchEmbedContents` with `taskType`.
    Gemini,
    /// Inference API `POST /models/{model}`, raw nested arrays.
    HuggingFace,
}

/// Everything the generic HTTP adapter needs to know about one vendor.
#[derive(Debug, Clone, Copy)]
pub struct VendorProfile {
    /// Provider name used by the registry.
    pub name: &'static str,
    /// Wire format.
    pub protocol: Protocol,
    /// Default API root; overridable with `provider_config.base_url`.
    pub base_url: &'static str,
    /// Environment variables consulted for the key, in order.
    pub env_vars: &'static [&'static str],
    /// Credential validation rule.
    pub key_rule: ApiKeyRule,
    /// Characters per token for estimation and truncation.
    pub chars_per_token: f64,
    /// Model used when none is requested.
    pub default_model: &'static str,
    /// Known models.
    pub models: &'static [ModelSpec],
    /// Whether namespaced models missing from `models` are accepted.
    pub accepts_unlisted_models: bool,
    /// Token budget for models missing from `models`.
    pub fallback_max_tokens: usize,
}

impl VendorProfile {
    /// Look up a model in this vendor's table.
    pub fn model(&self, name: &str) -> Option<&'static ModelSpec> {
        find_model(self.models, name)
    }

    /// Whether this vendor will serve `name`.
    pub fn supports(&self, name: &str) -> bool {
        self.model(name).is_some() || (self.accepts_unlisted_models && name.contains('/'))
    }

    /// Effective token budget for `name`.
    pub fn max_tokens_for(&self, name: &str) -> usize {
        self.model(name)
            .map_or(self.fallback_max_tokens, |m| m.max_tokens)
    }
}

pub const OPENAI_MODELS: &[ModelSpec] = &[
    model(
        "text-embedding-3-small",
        1536,
        8191,
        "Efficient general-purpose embeddings with shortening support",
    ),
    model(
        "text-embedding-3-large",
        3072,
        8191,
        "Highest-quality OpenAI embeddings with shortening support",
    ),
    model(
        "text-embedding-ada-002",
        1536,
        8191,
        "Legacy second-generation embeddings",
    ),
];

pub const VOYAGE_MODELS: &[ModelSpec] = &[
    model(
        "voyage-code-3",
        1024,
        32000,
        "Code retrieval optimized, flexible output dimension",
    ),
    model(
        "voyage-3-large",
        1024,
        32000,
        "Best general-purpose and multilingual retrieval quality",
    ),
    model("voyage-3", 1024, 32000, "General-purpose retrieval"),
    model(
        "voyage-3-lite",
        512,
        32000,
        "Latency and cost optimized retrieval",
    ),
    model(
        "voyage-code-2",
        1536,
        16000,
        "Previous generation code retrieval",
    ),
    model(
        "voyage-large-2",
        1536,
        16000,
        "Previous generation general retrieval",
    ),
    model("voyage-2", 1024, 4000, "Legacy general retrieval"),
];

pub const COHERE_MODELS: &[ModelSpec] = &[
    model("embed-english-v3.0", 1024, 512, "English embeddings"),
    model(
        "embed-multilingual-v3.0",
        1024,
        512,
        "Embeddings for 100+ languages",
    ),
    model(
        "embed-english-light-v3.0",
        384,
        512,
        "Faster, smaller English embeddings",
    ),
    model(
        "embed-multilingual-light-v3.0",
        384,
        512,
        "Faster, smaller multilingual embeddings",
    ),
    model("embed-english-v2.0", 4096, 512, "Legacy English embeddings"),
];

const GEMINI_TASK_TYPES: &[&str] = &[
    "RETRIEVAL_QUERY",
    "RETRIEVAL_DOCUMENT",
    "SEMANTIC_SIMILARITY",
    "CLASSIFICATION",
    "CLUSTERING",
];

const GEMINI_CODE_TASK_TYPES: &[&str] = &[
    "RETRIEVAL_QUERY",
    "RETRIEVAL_DOCUMENT",
    "SEMANTIC_SIMILARITY",
    "CLASSIFICATION",
    "CLUSTERING",
    "CODE_RETRIEVAL_QUERY",
    "QUESTION_ANSWERING",
    "FACT_VERIFICATION",
];

pub const GEMINI_MODELS: &[ModelSpec] = &[
    ModelSpec {
        name: "gemini-embedding-001",
        dimension: 3072,
        max_tokens: 2048,
        description: "Gemini embeddings with code retrieval task support",
        task_types: GEMINI_CODE_TASK_TYPES,
    },
    ModelSpec {
        name: "text-embedding-004",
        dimension: 768,
        max_tokens: 2048,
        description: "Text embeddings with task-type hints",
        task_types: GEMINI_TASK_TYPES,
    },
    ModelSpec {
        name: "embedding-001",
        dimension: 768,
        max_tokens: 2048,
        description: "Legacy text embeddings",
        task_types: GEMINI_TASK_TYPES,
    },
];

pub const HUGGINGFACE_MODELS: &[ModelSpec] = &[
    model(
        "nvidia/NV-Embed-v2",
        4096,
        32768,
        "NVIDIA embedding model (CC-BY-NC-4.0)",
    ),
    model(
        "sentence-transformers/all-MiniLM-L6-v2",
        384,
        256,
        "Fast, lightweight general-purpose embeddings",
    ),
    model(
        "sentence-transformers/all-mpnet-base-v2",
        768,
        384,
        "High-quality general-purpose embeddings",
    ),
    model(
        "sentence-transformers/paraphrase-multilingual-mpnet-base-v2",
        768,
        128,
        "Multilingual embeddings for 50+ languages",
    ),
    model(
        "intfloat/multilingual-e5-large",
        1024,
        512,
        "Multilingual retrieval embeddings",
    ),
    model(
        "BAAI/bge-large-en-v1.5",
        1024,
        512,
        "English retrieval embeddings",
    ),
    model(
        "BAAI/bge-m3",
        1024,
        8192,
        "Multi-lingual, multi-granular embeddings",
    ),
    model("thenlper/gte-large", 1024, 512, "General text embeddings"),
    model(
        "jinaai/jina-embeddings-v2-base-en",
        768,
        8192,
        "Long-context English embeddings",
    ),
    model(
        "microsoft/unixcoder-base",
        768,
        512,
        "Code understanding across languages",
    ),
    model(
        "microsoft/codebert-base",
        768,
        512,
        "Pre-trained model for programming languages",
    ),
];

pub const LOCAL_MODELS: &[ModelSpec] = &[
    model(
        "all-MiniLM-L6-v2",
        384,
        256,
        "Small local sentence embedding model",
    ),
    model(
        "all-MiniLM-L12-v2",
        384,
        256,
        "Deeper MiniLM sentence embeddings",
    ),
    model(
        "BAAI/bge-small-en-v1.5",
        384,
        512,
        "Small local retrieval model",
    ),
    model(
        "BAAI/bge-base-en-v1.5",
        768,
        512,
        "Higher quality local retrieval model",
    ),
];

pub const MOCK_MODELS: &[ModelSpec] = &[
    model(
        "mock-embedding",
        384,
        8192,
        "Deterministic hash-based vectors for tests",
    ),
    model(
        "mock-embedding-small",
        128,
        8192,
        "Deterministic hash-based vectors for tests",
    ),
    model(
        "mock-embedding-large",
        1024,
        8192,
        "Deterministic hash-based vectors for tests",
    ),
];

pub static OPENAI: VendorProfile = VendorProfile {
    name: "openai",
    protocol: Protocol::OpenAi,
    base_url: "https://api.openai.com/v1",
    env_vars: &["OPENAI_API_KEY"],
    key_rule: ApiKeyRule {
        vendor: "OpenAI",
        required_prefix: Some("sk-"),
        min_length: 20,
    },
    chars_per_token: 4.0,
    default_model: "text-embedding-3-small",
    models: OPENAI_MODELS,
    accepts_unlisted_models: false,
    fallback_max_tokens: 8191,
};

pub static VOYAGE: VendorProfile = VendorProfile {
    name: "voyage",
    protocol: Protocol::Voyage,
    base_url: "https://api.voyageai.com/v1",
    env_vars: &["VOYAGE_API_KEY", "VOYAGE_AI_API_KEY"],
    key_rule: ApiKeyRule {
        vendor: "Voyage AI",
        required_prefix: Some("pa-"),
        min_length: 20,
    },
    chars_per_token: 4.0,
    default_model: "voyage-code-3",
    models: VOYAGE_MODELS,
    accepts_unlisted_models: false,
    fallback_max_tokens: 16000,
};

pub static COHERE: VendorProfile = VendorProfile {
    name: "cohere",
    protocol: Protocol::Cohere,
    base_url: "https://api.cohere.com/v2",
    env_vars: &["COHERE_API_KEY", "CO_API_KEY"],
    key_rule: ApiKeyRule {
        vendor: "Cohere",
        required_prefix: None,
        min_length: 20,
    },
    chars_per_token: 4.0,
    default_model: "embed-english-v3.0",
    models: COHERE_MODELS,
    accepts_unlisted_models: false,
    fallback_max_tokens: 512,
};

pub static GEMINI: VendorProfile = VendorProfile {
    name: "gemini",
    protocol: Protocol::Gemini,
    base_url: "https://generativelanguage.googleapis.com/v1beta",
    env_vars: &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
    key_rule: ApiKeyRule {
        vendor: "Google Gemini",
        required_prefix: None,
        min_length: 20,
    },
    chars_per_token: 4.0,
    default_model: "text-embedding-004",
    models: GEMINI_MODELS,
    accepts_unlisted_models: false,
    fallback_max_tokens: 2048,
};

pub static HUGGINGFACE: VendorProfile = VendorProfile {
    name: "huggingface",
    protocol: Protocol::HuggingFace,
    base_url: "https://api-inference.huggingface.co",
    env_vars: &["HUGGINGFACE_API_TOKEN", "HF_TOKEN"],
    key_rule: ApiKeyRule {
        vendor: "HuggingFace",
        required_prefix: Some("hf_"),
        min_length: 30,
    },
    chars_per_token: 3.5,
    default_model: "sentence-transformers/all-MiniLM-L6-v2",
    models: HUGGINGFACE_MODELS,
    accepts_unlisted_models: true,
    fallback_max_tokens: 512,
};

/// All HTTP vendor profiles.
pub static HTTP_VENDORS: &[&VendorProfile] = &[&OPENAI, &VOYAGE, &COHERE, &GEMINI, &HUGGINGFACE];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_huggingface_accepts_namespaced_models() {
        assert!(HUGGINGFACE.supports("nvidia/NV-Embed-v2"));
        assert!(HUGGINGFACE.supports("acme/custom-embedder"));
        assert!(!HUGGINGFACE.supports("plain-name"));
        assert_eq!(HUGGINGFACE.max_tokens_for("acme/custom-embedder"), 512);
    }

    #[test]
    fn test_fixed_tables_reject_unknown_models() {
        assert!(OPENAI.supports("text-embedding-3-large"));
        assert!(!OPENAI.supports("gpt-4o"));
        assert!(!VOYAGE.supports("org/voyage-code-3"));
    }

    #[test]
    fn test_default_models_are_listed() {
        for vendor in HTTP_VENDORS {
            assert!(
                vendor.model(vendor.default_model).is_some(),
                "{} default model missing from its table",
                vendor.name
            );
        }
    }
}
