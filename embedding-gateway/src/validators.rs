//! Validation and vector-shaping helpers shared by all providers.

use tracing::warn;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

/// Values commonly left in config templates instead of a real key.
const PLACEHOLDER_KEYS: &[&str] = &[
    "your-api-key",
    "your_api_key",
    "your-api-key-here",
    "your_api_key_here",
    "api-key",
    "api_key",
    "changeme",
    "replace-me",
    "xxx",
    "test",
    "none",
    "null",
];

/// Rules for accepting a vendor credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiKeyRule {
    /// Human-readable vendor name for error messages.
    pub vendor: &'static str,
    /// Prefix every valid key starts with.
    pub required_prefix: Option<&'static str>,
    /// Minimum accepted length.
    pub min_length: usize,
}

/// Validate an API key, returning it trimmed.
pub fn validate_api_key(key: Option<&str>, rule: &ApiKeyRule) -> Result<String> {
    let vendor = rule.vendor;
    let key = match key.map(str::trim) {
        Some(k) if !k.is_empty() => k,
        _ => {
            return Err(EmbeddingError::ApiKey(format!(
                "{vendor} API key is missing"
            )));
        }
    };

    let lowered = key.to_ascii_lowercase();
    if PLACEHOLDER_KEYS.contains(&lowered.as_str()) || lowered.starts_with("your-") {
        return Err(EmbeddingError::ApiKey(format!(
            "{vendor} API key looks like a placeholder value"
        )));
    }

    if let Some(prefix) = rule.required_prefix
        && !key.starts_with(prefix)
    {
        return Err(EmbeddingError::ApiKey(format!(
            "{vendor} API key must start with '{prefix}'"
        )));
    }

    if key.len() < rule.min_length {
        return Err(EmbeddingError::ApiKey(format!(
            "{vendor} API key is too short ({} < {} characters)",
            key.len(),
            rule.min_length
        )));
    }

    Ok(key.to_string())
}

/// Truncate or zero-pad a vector to `dimension`. Returns whether the vector
/// had to change.
pub fn reconcile_dimension(embedding: &mut Embedding, dimension: usize) -> bool {
    if embedding.len() == dimension {
        return false;
    }
    embedding.resize(dimension, 0.0);
    true
}

/// Reconcile every vector in place, logging once if any needed adjustment.
pub fn reconcile_all(embeddings: &mut [Embedding], dimension: usize, provider: &str) {
    let mut adjusted = 0usize;
    let mut observed = dimension;
    for embedding in embeddings.iter_mut() {
        let actual = embedding.len();
        if reconcile_dimension(embedding, dimension) {
            adjusted += 1;
            observed = actual;
        }
    }
    if adjusted > 0 {
        let action = if observed > dimension {
            "truncating"
        } else {
            "zero-padding"
        };
        warn!(
            "{provider}: dimension mismatch (expected {dimension}, got {observed}), {action} {adjusted} vector(s)"
        );
    }
}

/// L2-normalize in place. Zero vectors are left untouched.
pub fn l2_normalize(embedding: &mut [f32]) {
    let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in embedding.iter_mut() {
            *value /= norm;
        }
    }
}

/// Approximate token count from character length.
pub fn estimate_tokens_by_chars(text: &str, chars_per_token: f64) -> usize {
    let chars = text.chars().count();
    if chars == 0 {
        return 0;
    }
    (chars as f64 / chars_per_token).ceil() as usize
}

/// Cut `text` to roughly `max_tokens` tokens using a char-per-token ratio.
///
/// Cuts on a char boundary so multi-byte text never splits a code point.
pub fn truncate_to_tokens(text: &str, max_tokens: usize, chars_per_token: f64) -> &str {
    let max_chars = (max_tokens as f64 * chars_per_token).floor() as usize;
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Reject empty or whitespace-only texts before they reach a vendor.
pub fn validate_texts(texts: &[String]) -> Result<()> {
    if let Some(idx) = texts.iter().position(|t| t.trim().is_empty()) {
        return Err(EmbeddingError::InvalidInput(format!(
            "text at index {idx} is empty"
        )));
    }
    Ok(())
}
