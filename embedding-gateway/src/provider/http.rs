//! Generic HTTP embedding adapter.
//!
//! One [`HttpVendor`] hook serves every remote vendor. The differences
//! (endpoint, auth header, role names, response shape) come from the
//! vendor's [`VendorProfile`] and [`Protocol`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use super::vendors::{ModelSpec, Protocol, VendorProfile};
use super::{HookOutput, ProviderHook};
use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::types::{EmbeddingConfig, EmbeddingType};
use crate::validators::{
    estimate_tokens_by_chars, reconcile_all, truncate_to_tokens, validate_api_key, validate_texts,
};

/// Default wait when a 429 carries no `Retry-After` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Hook for vendors reached over HTTPS.
pub struct HttpVendor {
    profile: &'static VendorProfile,
    client: Option<reqwest::Client>,
    api_key: Option<String>,
    base_url: String,
}

impl HttpVendor {
    /// Create an adapter for `profile`. Nothing is resolved until
    /// `initialize`.
    pub fn new(profile: &'static VendorProfile) -> Self {
        Self {
            profile,
            client: None,
            api_key: None,
            base_url: profile.base_url.to_string(),
        }
    }

    /// The vendor table this adapter is driven by.
    pub fn profile(&self) -> &'static VendorProfile {
        self.profile
    }

    fn resolve_api_key(&self, config: &EmbeddingConfig) -> Result<String> {
        let explicit = config
            .provider_str("api_key")
            .or_else(|| config.provider_str("api_token"))
            .map(str::to_string);
        let key = explicit.or_else(|| {
            self.profile
                .env_vars
                .iter()
                .find_map(|var| std::env::var(var).ok())
        });
        validate_api_key(key.as_deref(), &self.profile.key_rule).map_err(|err| match err {
            EmbeddingError::ApiKey(msg) if key.is_none() => EmbeddingError::ApiKey(format!(
                "{msg}; set provider_config.api_key or one of {}",
                self.profile.env_vars.join(", ")
            )),
            other => other,
        })
    }

    fn max_tokens(&self, config: &EmbeddingConfig) -> usize {
        self.profile
            .max_tokens_for(&config.model_name)
            .min(config.max_tokens)
    }

    fn vendor_role(
        &self,
        model: Option<&ModelSpec>,
        embedding_type: EmbeddingType,
    ) -> Option<&'static str> {
        let query = embedding_type.is_query();
        match self.profile.protocol {
            Protocol::OpenAi | Protocol::HuggingFace => None,
            Protocol::Voyage => Some(if query { "query" } else { "document" }),
            Protocol::Cohere => Some(if query {
                "search_query"
            } else {
                "search_document"
            }),
            Protocol::Gemini => {
                let code_aware =
                    model.is_some_and(|m| m.task_types.contains(&"CODE_RETRIEVAL_QUERY"));
                Some(match embedding_type {
                    EmbeddingType::Query if code_aware => "CODE_RETRIEVAL_QUERY",
                    EmbeddingType::Query => "RETRIEVAL_QUERY",
                    _ => "RETRIEVAL_DOCUMENT",
                })
            }
        }
    }

    fn request(
        &self,
        config: &EmbeddingConfig,
        texts: &[&str],
        role: Option<&str>,
    ) -> Result<reqwest::RequestBuilder> {
        let client = self
            .client
            .as_ref()
            .ok_or(EmbeddingError::NotInitialized)?;
        let api_key = self.api_key.as_deref().unwrap_or_default();
        let model = config.model_name.as_str();
        let base = self.base_url.trim_end_matches('/');
        let native = self.profile.model(model).map(|m| m.dimension);

        let builder = match self.profile.protocol {
            Protocol::OpenAi => {
                let mut body = json!({
                    "model": model,
                    "input": texts,
                    "encoding_format": "float",
                });
                if model.starts_with("text-embedding-3") && native != Some(config.dimension) {
                    body["dimensions"] = json!(config.dimension);
                }
                client
                    .post(format!("{base}/embeddings"))
                    .bearer_auth(api_key)
                    .json(&body)
            }
            Protocol::Voyage => {
                let mut body = json!({
                    "model": model,
                    "input": texts,
                    "input_type": role,
                    "truncation": true,
                });
                if matches!(model, "voyage-code-3" | "voyage-3-large")
                    && matches!(config.dimension, 256 | 512 | 2048)
                {
                    body["output_dimension"] = json!(config.dimension);
                }
                client
                    .post(format!("{base}/embeddings"))
                    .bearer_auth(api_key)
                    .json(&body)
            }
            Protocol::Cohere => {
                let body = json!({
                    "model": model,
                    "texts": texts,
                    "input_type": role,
                    "embedding_types": ["float"],
                    "truncate": "END",
                });
                client
                    .post(format!("{base}/embed"))
                    .bearer_auth(api_key)
                    .json(&body)
            }
            Protocol::Gemini => {
                let resource = format!("models/{model}");
                let requests: Vec<Value> = texts
                    .iter()
                    .map(|text| {
                        let mut request = json!({
                            "model": resource,
                            "content": { "parts": [{ "text": text }] },
                            "taskType": role,
                        });
                        if native.is_some_and(|d| d != config.dimension) {
                            request["outputDimensionality"] = json!(config.dimension);
                        }
                        request
                    })
                    .collect();
                client
                    .post(format!("{base}/{resource}:batchEmbedContents"))
                    .header("x-goog-api-key", api_key)
                    .json(&json!({ "requests": requests }))
            }
            Protocol::HuggingFace => {
                let body = json!({
                    "inputs": texts,
                    "options": { "wait_for_model": true, "use_cache": true },
                });
                client
                    .post(format!("{base}/models/{model}"))
                    .bearer_auth(api_key)
                    .json(&body)
            }
        };
        Ok(builder)
    }

    fn parse_response(&self, body: Value) -> Result<(Vec<Embedding>, Option<usize>)> {
        match self.profile.protocol {
            Protocol::OpenAi | Protocol::Voyage => {
                let mut parsed: OpenAiResponse = serde_json::from_value(body)?;
                parsed.data.sort_by_key(|d| d.index);
                let tokens = parsed.usage.map(|u| u.total_tokens);
                Ok((
                    parsed.data.into_iter().map(|d| d.embedding).collect(),
                    tokens,
                ))
            }
            Protocol::Cohere => {
                let parsed: CohereResponse = serde_json::from_value(body)?;
                let tokens = parsed
                    .meta
                    .and_then(|m| m.billed_units)
                    .and_then(|b| b.input_tokens);
                Ok((parsed.embeddings.float, tokens))
            }
            Protocol::Gemini => {
                let parsed: GeminiResponse = serde_json::from_value(body)?;
                Ok((
                    parsed.embeddings.into_iter().map(|e| e.values).collect(),
                    None,
                ))
            }
            Protocol::HuggingFace => Ok((parse_huggingface(body)?, None)),
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        config: &EmbeddingConfig,
        estimated_tokens: usize,
    ) -> Result<Value> {
        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                EmbeddingError::Timeout(config.timeout_seconds)
            } else {
                EmbeddingError::Http(err)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let headers = response.headers().clone();
        let text = response.text().await.unwrap_or_default();
        Err(classify_failure(
            self.profile.name,
            status,
            &headers,
            &text,
            estimated_tokens,
            self.max_tokens(config),
            config.timeout_seconds,
        ))
    }
}

/// Translate a failed vendor response into the shared taxonomy.
pub(crate) fn classify_failure(
    vendor: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    estimated_tokens: usize,
    limit: usize,
    timeout_secs: u64,
) -> EmbeddingError {
    let lowered = body.to_ascii_lowercase();
    let snippet: String = body.chars().take(300).collect();

    if status == StatusCode::TOO_MANY_REQUESTS
        || lowered.contains("rate limit")
        || lowered.contains("quota")
    {
        let retry_after_secs = headers
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        return EmbeddingError::RateLimited {
            message: format!("{vendor} rate limit exceeded"),
            retry_after_secs,
        };
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return EmbeddingError::ApiKey(format!("{vendor} rejected the API key ({status})"));
    }

    let token_phrase = lowered.contains("too many tokens")
        || lowered.contains("too long")
        || lowered.contains("maximum context length")
        || (lowered.contains("token") && lowered.contains("exceed"));
    if status.is_client_error() && token_phrase {
        return EmbeddingError::TokenLimit {
            token_count: estimated_tokens,
            limit,
        };
    }

    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        return EmbeddingError::Timeout(timeout_secs);
    }

    if status == StatusCode::SERVICE_UNAVAILABLE {
        return EmbeddingError::transient(format!(
            "{vendor} service unavailable (model may be loading): {snippet}"
        ));
    }

    if status.is_server_error() {
        return EmbeddingError::transient(format!("{vendor} API error ({status}): {snippet}"));
    }

    EmbeddingError::permanent(format!("{vendor} API error ({status}): {snippet}"))
}

/// Accept either pooled vectors or token-level matrices (mean-pooled).
fn parse_huggingface(body: Value) -> Result<Vec<Embedding>> {
    let items = match body {
        Value::Array(items) => items,
        other => {
            return Err(EmbeddingError::permanent(format!(
                "unexpected HuggingFace response: {other}"
            )));
        }
    };

    items
        .into_iter()
        .map(|item| {
            if let Ok(vector) = serde_json::from_value::<Vec<f32>>(item.clone()) {
                return Ok(vector);
            }
            let tokens: Vec<Vec<f32>> = serde_json::from_value(item)?;
            Ok(mean_pool(&tokens))
        })
        .collect()
}

fn mean_pool(tokens: &[Vec<f32>]) -> Embedding {
    let Some(width) = tokens.iter().map(Vec::len).max() else {
        return Vec::new();
    };
    let mut pooled = vec![0.0f32; width];
    for token in tokens {
        for (acc, value) in pooled.iter_mut().zip(token) {
            *acc += value;
        }
    }
    let count = tokens.len() as f32;
    for value in &mut pooled {
        *value /= count;
    }
    pooled
}

#[async_trait]
impl ProviderHook for HttpVendor {
    fn name(&self) -> &str {
        self.profile.name
    }

    async fn initialize(&mut self, config: &mut EmbeddingConfig) -> Result<()> {
        if !self.profile.supports(&config.model_name) {
            let suggestions = self
                .profile
                .models
                .iter()
                .map(|m| m.name.to_string())
                .collect();
            return Err(EmbeddingError::ModelNotSupported {
                model: config.model_name.clone(),
                suggestions,
                hint: Some(format!("supported by the {} provider", self.profile.name)),
            });
        }

        let api_key = self.resolve_api_key(config)?;

        let mut builder = reqwest::Client::builder();
        if config.timeout_seconds > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_seconds));
        }
        let client = builder.build().map_err(|err| {
            EmbeddingError::ProviderInitialization(format!(
                "failed to build {} client: {err}",
                self.profile.name
            ))
        })?;

        if let Some(url) = config.provider_str("base_url") {
            self.base_url = url.to_string();
        }

        match self.profile.model(&config.model_name) {
            Some(spec) if spec.dimension != config.dimension => warn!(
                "{} model {} natively produces {} dimensions, configured {}; vectors will be reconciled",
                self.profile.name, config.model_name, spec.dimension, config.dimension
            ),
            None => info!(
                "{} serving unlisted model {}; first request may be slow while it loads",
                self.profile.name, config.model_name
            ),
            _ => {}
        }
        if config.model_name.contains("NV-Embed") {
            warn!("NV-Embed models carry a non-commercial license (CC-BY-NC-4.0)");
        }

        self.api_key = Some(api_key);
        self.client = Some(client);
        Ok(())
    }

    async fn embed(
        &self,
        texts: &[String],
        embedding_type: EmbeddingType,
        config: &EmbeddingConfig,
    ) -> Result<HookOutput> {
        validate_texts(texts)?;

        let max_tokens = self.max_tokens(config);
        let ratio = self.profile.chars_per_token;
        let truncated: Vec<&str> = texts
            .iter()
            .map(|t| truncate_to_tokens(t, max_tokens, ratio))
            .collect();
        let clipped = truncated
            .iter()
            .zip(texts)
            .filter(|(cut, original)| cut.len() < original.len())
            .count();
        if clipped > 0 {
            debug!(
                "{}: truncated {clipped} text(s) to {max_tokens} tokens",
                self.profile.name
            );
        }

        let estimated: usize = truncated
            .iter()
            .map(|t| estimate_tokens_by_chars(t, ratio))
            .sum();
        let model = self.profile.model(&config.model_name);
        let role = self.vendor_role(model, embedding_type);
        let request = self.request(config, &truncated, role)?;
        let body = self.send(request, config, estimated).await?;
        let (mut embeddings, reported_tokens) = self.parse_response(body)?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::permanent(format!(
                "{} returned {} embeddings for {} texts",
                self.profile.name,
                embeddings.len(),
                texts.len()
            )));
        }
        reconcile_all(&mut embeddings, config.dimension, self.profile.name);

        Ok(HookOutput {
            embeddings,
            token_count: reported_tokens.unwrap_or(estimated),
        })
    }

    async fn validate_api_key(&self, config: &EmbeddingConfig) -> Result<bool> {
        match self
            .embed(&["ping".to_string()], EmbeddingType::Query, config)
            .await
        {
            Ok(_) | Err(EmbeddingError::RateLimited { .. }) => Ok(true),
            Err(EmbeddingError::ApiKey(msg)) => {
                warn!("{} API key validation failed: {msg}", self.profile.name);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    fn chars_per_token(&self) -> f64 {
        self.profile.chars_per_token
    }

    fn model_info(&self, config: Option<&EmbeddingConfig>) -> Map<String, Value> {
        let mut info = Map::new();
        info.insert("api_endpoint".to_string(), self.base_url.clone().into());
        info.insert(
            "default_model".to_string(),
            self.profile.default_model.into(),
        );
        info.insert(
            "supported_models".to_string(),
            self.profile
                .models
                .iter()
                .map(|m| Value::from(m.name))
                .collect(),
        );
        info.insert(
            "supports_custom_models".to_string(),
            self.profile.accepts_unlisted_models.into(),
        );
        if let Some(spec) = config.and_then(|c| self.profile.model(&c.model_name)) {
            info.insert("model_description".to_string(), spec.description.into());
            info.insert("native_dimension".to_string(), spec.dimension.into());
            info.insert("model_max_tokens".to_string(), spec.max_tokens.into());
            if !spec.task_types.is_empty() {
                info.insert(
                    "task_types".to_string(),
                    spec.task_types.iter().map(|t| Value::from(*t)).collect(),
                );
            }
        }
        info
    }

    fn close(&mut self) {
        self.client = None;
        self.api_key = None;
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    total_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct CohereResponse {
    embeddings: CohereEmbeddings,
    meta: Option<CohereMeta>,
}

#[derive(Debug, Deserialize)]
struct CohereEmbeddings {
    float: Vec<Embedding>,
}

#[derive(Debug, Deserialize)]
struct CohereMeta {
    billed_units: Option<CohereBilledUnits>,
}

#[derive(Debug, Deserialize)]
struct CohereBilledUnits {
    input_tokens: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    embeddings: Vec<GeminiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_classify_rate_limit_uses_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, HeaderValue::from_static("12"));
        let err = classify_failure(
            "voyage",
            StatusCode::TOO_MANY_REQUESTS,
            &headers,
            "",
            10,
            100,
            30,
        );
        assert!(matches!(
            err,
            EmbeddingError::RateLimited {
                retry_after_secs: 12,
                ..
            }
        ));
    }

    #[test]
    fn test_classify_quota_and_tokens() {
        let headers = HeaderMap::new();
        let quota = classify_failure(
            "cohere",
            StatusCode::BAD_REQUEST,
            &headers,
            "You have exceeded your monthly quota",
            1,
            512,
            30,
        );
        assert!(matches!(quota, EmbeddingError::RateLimited { .. }));

        let tokens = classify_failure(
            "openai",
            StatusCode::BAD_REQUEST,
            &headers,
            "This model's maximum context length is 8191 tokens",
            9000,
            8191,
            30,
        );
        assert!(matches!(
            tokens,
            EmbeddingError::TokenLimit {
                token_count: 9000,
                limit: 8191
            }
        ));
    }

    #[test]
    fn test_classify_status_families() {
        let headers = HeaderMap::new();
        let auth = classify_failure("openai", StatusCode::UNAUTHORIZED, &headers, "", 0, 1, 30);
        assert!(matches!(auth, EmbeddingError::ApiKey(_)));

        let loading = classify_failure(
            "huggingface",
            StatusCode::SERVICE_UNAVAILABLE,
            &headers,
            "loading",
            0,
            1,
            30,
        );
        assert!(loading.is_retryable());

        let timeout =
            classify_failure("gemini", StatusCode::GATEWAY_TIMEOUT, &headers, "", 0, 1, 15);
        assert!(matches!(timeout, EmbeddingError::Timeout(15)));

        let bad =
            classify_failure("gemini", StatusCode::BAD_REQUEST, &headers, "invalid", 0, 1, 30);
        assert!(!bad.is_retryable());
    }

    #[test]
    fn test_huggingface_mean_pooling() {
        let body = json!([[1.0, 2.0], [[1.0, 1.0], [3.0, 5.0]]]);
        let vectors = parse_huggingface(body).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 2.0], vec![2.0, 3.0]]);
    }
}
