//! HTTP vendor adapters against a local mock server.
//!
//! Each test points a provider at wiremock through the `base_url` provider
//! option and checks the wire format it sends and the vectors it returns.

use std::sync::Arc;

use codex_embedding_gateway::{
    EmbeddingConfig, EmbeddingError, EmbeddingProvider, EmbeddingType, ProviderFactory,
    ProviderRegistry,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OPENAI_KEY: &str = "sk-test-0123456789abcdef";
const VOYAGE_KEY: &str = "pa-test-0123456789abcdef";
const COHERE_KEY: &str = "co-test-0123456789abcdef";
const GEMINI_KEY: &str = "gm-test-0123456789abcdef";
const HF_TOKEN: &str = "hf_test0123456789abcdef0123456789";

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

fn config(model: &str, dimension: usize, key: &str, server: &MockServer) -> EmbeddingConfig {
    EmbeddingConfig::builder(model, dimension)
        .normalize(false)
        .max_retries(1)
        .api_key(key)
        .provider_option("base_url", server.uri())
        .build()
        .unwrap()
}

async fn provider(config: EmbeddingConfig) -> Box<dyn EmbeddingProvider> {
    let factory = ProviderFactory::new(Arc::new(ProviderRegistry::with_builtins()));
    let model = config.model_name.clone();
    tokio_test::assert_ok!(factory.create_initialized(&model, Some(config)).await)
}

#[tokio::test]
async fn test_openai_requests_reduced_dimensions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("authorization", format!("Bearer {OPENAI_KEY}").as_str()))
        .and(body_partial_json(json!({
            "model": "text-embedding-3-small",
            "input": ["fn main() {}", "struct Foo;"],
            "dimensions": 4,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0, 0.0, 0.0] },
                { "index": 0, "embedding": [1.0, 0.0, 0.0, 0.0] },
            ],
            "usage": { "total_tokens": 9 },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(config("text-embedding-3-small", 4, OPENAI_KEY, &server)).await;
    let result = provider
        .embed_batch(&texts(&["fn main() {}", "struct Foo;"]), EmbeddingType::Code)
        .await
        .unwrap();

    assert_eq!(
        result.embeddings,
        vec![vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0]]
    );
    assert_eq!(result.token_count, 9);
    assert_eq!(result.provider, "openai");
}

#[tokio::test]
async fn test_voyage_sends_input_type_per_role() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(body_partial_json(json!({ "input_type": "query" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "index": 0, "embedding": [0.5, 0.5, 0.5] }],
            "usage": { "total_tokens": 2 },
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(body_partial_json(json!({ "input_type": "document" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "index": 0, "embedding": [0.1, 0.2, 0.3] }],
            "usage": { "total_tokens": 2 },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(config("voyage-code-3", 3, VOYAGE_KEY, &server)).await;
    let query = provider
        .embed_single("find the parser", EmbeddingType::Query)
        .await
        .unwrap();
    let document = provider
        .embed_single("fn parse() {}", EmbeddingType::Code)
        .await
        .unwrap();

    assert_eq!(query, vec![0.5, 0.5, 0.5]);
    assert_eq!(document, vec![0.1, 0.2, 0.3]);
}

#[tokio::test]
async fn test_cohere_reads_billed_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .and(body_partial_json(json!({
            "model": "embed-english-v3.0",
            "texts": ["hello"],
            "input_type": "search_query",
            "embedding_types": ["float"],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": { "float": [[0.25, 0.75]] },
            "meta": { "billed_units": { "input_tokens": 7 } },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(config("embed-english-v3.0", 2, COHERE_KEY, &server)).await;
    let result = provider
        .embed_batch(&texts(&["hello"]), EmbeddingType::Query)
        .await
        .unwrap();

    assert_eq!(result.embeddings, vec![vec![0.25, 0.75]]);
    assert_eq!(result.token_count, 7);
}

#[tokio::test]
async fn test_gemini_batch_embed_contents() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/text-embedding-004:batchEmbedContents"))
        .and(header("x-goog-api-key", GEMINI_KEY))
        .and(body_partial_json(json!({
            "requests": [
                {
                    "model": "models/text-embedding-004",
                    "content": { "parts": [{ "text": "a" }] },
                    "taskType": "RETRIEVAL_DOCUMENT",
                    "outputDimensionality": 2,
                },
                {
                    "model": "models/text-embedding-004",
                    "content": { "parts": [{ "text": "b" }] },
                    "taskType": "RETRIEVAL_DOCUMENT",
                    "outputDimensionality": 2,
                },
            ],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [{ "values": [1.0, 2.0] }, { "values": [3.0, 4.0] }],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(config("text-embedding-004", 2, GEMINI_KEY, &server)).await;
    let result = provider
        .embed_batch(&texts(&["a", "b"]), EmbeddingType::Document)
        .await
        .unwrap();

    assert_eq!(result.embeddings, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    // Gemini reports no usage, so the character estimate is used.
    assert_eq!(result.token_count, 2);
}

#[tokio::test]
async fn test_huggingface_pools_token_embeddings() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/sentence-transformers/all-MiniLM-L6-v2"))
        .and(header("authorization", format!("Bearer {HF_TOKEN}").as_str()))
        .and(body_partial_json(json!({
            "inputs": ["one", "two"],
            "options": { "wait_for_model": true },
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            [1.0, 0.0, 2.0],
            [[1.0, 1.0, 1.0], [3.0, 1.0, 5.0]],
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(config(
        "sentence-transformers/all-MiniLM-L6-v2",
        3,
        HF_TOKEN,
        &server,
    ))
    .await;
    let result = provider
        .embed_batch(&texts(&["one", "two"]), EmbeddingType::Code)
        .await
        .unwrap();

    assert_eq!(
        result.embeddings,
        vec![vec![1.0, 0.0, 2.0], vec![2.0, 1.0, 3.0]]
    );
}

#[tokio::test]
async fn test_short_vectors_are_padded_to_dimension() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "index": 0, "embedding": [0.5, 0.5] }],
        })))
        .mount(&server)
        .await;

    let provider = provider(config("voyage-code-3", 4, VOYAGE_KEY, &server)).await;
    let embedding = provider
        .embed_single("x", EmbeddingType::Code)
        .await
        .unwrap();

    assert_eq!(embedding, vec![0.5, 0.5, 0.0, 0.0]);
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "0")
                .set_body_string("Rate limit reached"),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "index": 0, "embedding": [1.0, 0.0] }],
            "usage": { "total_tokens": 1 },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(config("text-embedding-3-small", 2, OPENAI_KEY, &server)).await;
    let result = provider
        .embed_batch(&texts(&["retry me"]), EmbeddingType::Code)
        .await
        .unwrap();

    assert_eq!(result.embeddings, vec![vec![1.0, 0.0]]);
    assert_eq!(result.metadata["retries"], 1);
}

#[tokio::test]
async fn test_bad_request_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid input_type"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(config("embed-english-v3.0", 2, COHERE_KEY, &server)).await;
    let err = tokio_test::assert_err!(
        provider
            .embed_batch(&texts(&["x"]), EmbeddingType::Code)
            .await
    );

    assert!(matches!(
        err,
        EmbeddingError::Generation {
            retryable: false,
            ..
        }
    ));
}

#[tokio::test]
async fn test_rejected_key_reports_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Incorrect API key"))
        .mount(&server)
        .await;

    let provider = provider(config("text-embedding-3-small", 2, OPENAI_KEY, &server)).await;

    assert!(!provider.validate_api_key().await.unwrap());
    assert!(matches!(
        provider
            .embed_batch(&texts(&["x"]), EmbeddingType::Code)
            .await,
        Err(EmbeddingError::ApiKey(_))
    ));
}

#[tokio::test]
async fn test_malformed_key_fails_initialization() {
    let server = MockServer::start().await;
    let factory = ProviderFactory::new(Arc::new(ProviderRegistry::with_builtins()));
    let result = factory
        .create_initialized(
            "text-embedding-3-small",
            Some(config("text-embedding-3-small", 2, "pk-not-an-openai-key-000", &server)),
        )
        .await;

    assert!(matches!(result, Err(EmbeddingError::ApiKey(_))));
}
