//! Embedding generation with a provider chain and a guaranteed fallback.
//!
//! Provides a single `generate(text) -> vector` capability:
//! - Ordered provider strategies, each call bounded by a timeout
//! - Sequential retries with linear backoff between attempts
//! - Deterministic hash embedding when every provider fails
//! - Paced batch generation

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;

use crate::config::EmbeddingConfig;

use super::fallback::{HashEmbedder, HASH_MODEL_TAG};
use super::preprocess::prepare_input;

/// Model tag recorded for blank input, which never reaches a provider.
pub const EMPTY_INPUT_TAG: &str = "empty";

/// Error type for provider calls.
///
/// These never escape [`Embedder::generate`]; they are logged and the chain
/// moves on.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("malformed embedding: {0}")]
    Malformed(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
}

/// A remote or local model that turns text into a vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed already preprocessed, non-empty text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Name used in logs.
    fn name(&self) -> &str;

    /// Model identifier written next to the vectors it produces.
    fn model(&self) -> &str;
}

/// A vector together with the strategy that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedEmbedding {
    pub vector: Vec<f32>,
    pub model: String,
}

impl GeneratedEmbedding {
    /// True when the vector came from the hash fallback or blank input.
    pub fn is_fallback(&self) -> bool {
        self.model == HASH_MODEL_TAG || self.model == EMPTY_INPUT_TAG
    }
}

/// Retry and pacing knobs for [`Embedder`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub request_timeout: Duration,
    pub batch_size: usize,
    pub batch_pause: Duration,
}

impl From<&EmbeddingConfig> for RetryPolicy {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            batch_size: config.batch_size,
            batch_pause: Duration::from_millis(config.batch_pause_ms),
        }
    }
}

/// Embedding generator.
///
/// Tries each provider in order on every attempt, and falls through to
/// [`HashEmbedder`] once all attempts are exhausted. Cheap to clone.
#[derive(Clone)]
pub struct Embedder {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
    fallback: HashEmbedder,
    policy: RetryPolicy,
    dimensions: usize,
    max_input_chars: usize,
}

impl Embedder {
    pub fn new(
        providers: Vec<Arc<dyn EmbeddingProvider>>,
        policy: RetryPolicy,
        dimensions: usize,
        max_input_chars: usize,
    ) -> Self {
        Self {
            providers,
            fallback: HashEmbedder::new(dimensions),
            policy,
            dimensions,
            max_input_chars,
        }
    }

    /// Embedder with no remote providers, always using the hash fallback.
    pub fn offline(dimensions: usize, max_input_chars: usize) -> Self {
        let policy = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::ZERO,
            request_timeout: Duration::from_secs(10),
            batch_size: 5,
            batch_pause: Duration::ZERO,
        };
        Self::new(vec![], policy, dimensions, max_input_chars)
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Generate a vector for `text`. Never fails.
    pub async fn generate(&self, text: &str) -> Vec<f32> {
        self.generate_tagged(text).await.vector
    }

    /// Generate a vector and report which strategy produced it.
    pub async fn generate_tagged(&self, text: &str) -> GeneratedEmbedding {
        let Some(input) = prepare_input(text, self.max_input_chars) else {
            return GeneratedEmbedding {
                vector: vec![0.0; self.dimensions],
                model: EMPTY_INPUT_TAG.to_string(),
            };
        };

        let attempts = self.policy.max_retries.max(1);
        if !self.providers.is_empty() {
            for attempt in 1..=attempts {
                if let Some(generated) = self.try_providers(&input, attempt).await {
                    return generated;
                }

                if attempt < attempts {
                    let delay = self.policy.base_delay * attempt;
                    log::debug!("embedding attempt={attempt} failed, backing off {delay:?}");
                    tokio::time::sleep(delay).await;
                }
            }

            log::warn!(
                "all embedding providers failed after {attempts} attempts, using {HASH_MODEL_TAG}"
            );
        }

        GeneratedEmbedding {
            vector: self.fallback.embed(&input),
            model: HASH_MODEL_TAG.to_string(),
        }
    }

    /// One pass over the provider chain.
    async fn try_providers(&self, input: &str, attempt: u32) -> Option<GeneratedEmbedding> {
        for provider in &self.providers {
            let name = provider.name();
            let outcome = tokio::time::timeout(self.policy.request_timeout, provider.embed(input))
                .await
                .unwrap_or(Err(EmbeddingError::Timeout(self.policy.request_timeout)))
                .and_then(|v| validate_vector(v, self.dimensions));

            match outcome {
                Ok(vector) => {
                    log::debug!("provider={name} attempt={attempt} outcome=success");
                    return Some(GeneratedEmbedding {
                        vector,
                        model: provider.model().to_string(),
                    });
                }
                Err(e) => {
                    log::warn!("provider={name} attempt={attempt} outcome=error err={e}");
                }
            }
        }
        None
    }

    /// Generate vectors for many texts.
    ///
    /// Texts are processed in batches of `batch_size`, concurrently within a
    /// batch, pausing `batch_pause` between batches. Output order matches
    /// input order.
    pub async fn generate_batch(&self, texts: &[String]) -> Vec<GeneratedEmbedding> {
        let batch_size = self.policy.batch_size.max(1);
        let mut results = Vec::with_capacity(texts.len());

        for (batch_idx, batch) in texts.chunks(batch_size).enumerate() {
            if batch_idx > 0 && !self.policy.batch_pause.is_zero() {
                tokio::time::sleep(self.policy.batch_pause).await;
            }
            let generated = join_all(batch.iter().map(|t| self.generate_tagged(t))).await;
            results.extend(generated);
        }

        results
    }
}

/// Check a provider vector: exactly `dimensions` finite numbers.
pub fn validate_vector(vector: Vec<f32>, dimensions: usize) -> Result<Vec<f32>, EmbeddingError> {
    if vector.len() != dimensions {
        return Err(EmbeddingError::Malformed(format!(
            "expected {dimensions} values, got {}",
            vector.len()
        )));
    }
    if let Some(idx) = vector.iter().position(|x| !x.is_finite()) {
        return Err(EmbeddingError::Malformed(format!(
            "non-finite value at index {idx}"
        )));
    }
    Ok(vector)
}

/// Decode a provider JSON response into a flat vector.
///
/// Accepts `[f, ...]` or a single nested `[[f, ...]]`. A `{"error": ...}`
/// object becomes [`EmbeddingError::Provider`].
pub fn parse_vector_response(body: &Value) -> Result<Vec<f32>, EmbeddingError> {
    if let Some(error) = body.get("error") {
        let message = error
            .as_str()
            .map(str::to_owned)
            .unwrap_or_else(|| error.to_string());
        return Err(EmbeddingError::Provider(message));
    }

    let items = body
        .as_array()
        .ok_or_else(|| EmbeddingError::Malformed("response is not an array".to_string()))?;

    let items = match items.as_slice() {
        [Value::Array(inner)] => inner,
        _ => items,
    };

    items
        .iter()
        .enumerate()
        .map(|(idx, v)| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbeddingError::Malformed(format!("value at index {idx} is not a number")))
        })
        .collect()
}
