//! Text embeddings via the Voyage AI API, plus the vector helpers shared by
//! the processor and search.
//!
//! Vectors are persisted as the bracketed literal `[0.1,0.2,...]`, the same
//! text form the web tier writes into its vector columns.

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const VOYAGE_API_URL: &str = "https://api.voyageai.com/v1/embeddings";
pub const DEFAULT_MODEL: &str = "voyage-3-large";
pub const DEFAULT_DIMENSION: usize = 1024;
/// Inputs per Voyage request.
pub const MAX_BATCH_SIZE: usize = 128;
/// voyage-3-large context window.
pub const MAX_TOKENS: usize = 32_000;
/// Rough chars-per-token used to size the truncation.
const CHARS_PER_TOKEN: usize = 4;
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.7;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("VOYAGE_API_KEY is not configured")]
    MissingApiKey,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Voyage API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("Malformed embedding response: {0}")]
    MalformedResponse(String),

    #[error("Expected {expected} embeddings, got {got}")]
    CountMismatch { expected: usize, got: usize },

    #[error("Invalid vector literal: {0}")]
    InvalidVector(String),
}

impl EmbeddingError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::Http(e) => e.is_timeout() || e.is_connect(),
            EmbeddingError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

fn default_api_url() -> String {
    VOYAGE_API_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_dimension() -> usize {
    DEFAULT_DIMENSION
}

fn default_match_threshold() -> f32 {
    DEFAULT_MATCH_THRESHOLD
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoyageConfig {
    /// Overridden by `VOYAGE_API_KEY` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dimension")]
    pub output_dimension: usize,
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for VoyageConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            output_dimension: default_dimension(),
            match_threshold: default_match_threshold(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

/// Something that turns text into vectors.
///
/// Implementors handle one request's worth of input; `embed_all` and
/// `embed_one` take care of batching.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn max_batch_size(&self) -> usize {
        MAX_BATCH_SIZE
    }
}

/// Embed every input, splitting into provider-sized batches. Results keep
/// input order. Empty input makes no request.
pub async fn embed_all<P>(provider: &P, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>
where
    P: EmbeddingProvider + ?Sized,
{
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(provider.max_batch_size().max(1)) {
        let vectors = provider.embed_chunk(batch).await?;
        if vectors.len() != batch.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: batch.len(),
                got: vectors.len(),
            });
        }
        out.extend(vectors);
    }
    Ok(out)
}

pub async fn embed_one<P>(provider: &P, text: &str) -> Result<Vec<f32>, EmbeddingError>
where
    P: EmbeddingProvider + ?Sized,
{
    let mut vectors = embed_all(provider, &[text.to_string()]).await?;
    vectors
        .pop()
        .ok_or(EmbeddingError::CountMismatch { expected: 1, got: 0 })
}

// ---------------------------------------------------------------------------
// Voyage client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 4_000,
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(exponent)
                .min(self.max_backoff_ms),
        )
    }
}

#[derive(Serialize)]
struct VoyageRequest<'a> {
    input: &'a [String],
    model: &'a str,
    output_dimension: usize,
}

#[derive(Deserialize)]
struct VoyageResponse {
    data: Vec<VoyageDatum>,
    #[serde(default)]
    usage: Option<VoyageUsage>,
}

#[derive(Deserialize)]
struct VoyageDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Deserialize)]
struct VoyageUsage {
    total_tokens: u64,
}

pub struct VoyageClient {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
    model: String,
    output_dimension: usize,
    retry: RetryPolicy,
}

impl VoyageClient {
    pub fn new(config: &VoyageConfig) -> Result<Self, EmbeddingError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(EmbeddingError::MissingApiKey)?
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            api_key,
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            output_dimension: config.output_dimension,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn post_once(
        &self,
        texts: &[String],
    ) -> Result<reqwest::Response, (EmbeddingError, Option<Duration>)> {
        let body = VoyageRequest {
            input: texts,
            model: &self.model,
            output_dimension: self.output_dimension,
        };
        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| (EmbeddingError::Http(e), None))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| Duration::from_secs(secs.min(30)));
        let text = resp.text().await.unwrap_or_default();
        let err = EmbeddingError::Api {
            status: status.as_u16(),
            body: text.chars().take(500).collect(),
        };
        Err((err, retry_after))
    }
}

#[async_trait]
impl EmbeddingProvider for VoyageClient {
    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        let resp = loop {
            match self.post_once(texts).await {
                Ok(resp) => break resp,
                Err((err, retry_after)) if err.is_retryable() && attempt < attempts => {
                    let delay = retry_after.unwrap_or_else(|| self.retry.delay(attempt));
                    log::warn!(
                        "Voyage: retry {}/{} after {} (sleep {:?})",
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err((err, _)) => return Err(err),
            }
        };

        let parsed: VoyageResponse = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::MalformedResponse(e.to_string()))?;
        if let Some(usage) = &parsed.usage {
            log::debug!(
                "Voyage: embedded {} inputs ({} tokens)",
                texts.len(),
                usage.total_tokens
            );
        }
        Ok(order_by_index(parsed.data))
    }
}

fn order_by_index(mut data: Vec<VoyageDatum>) -> Vec<Vec<f32>> {
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }
    data.into_iter().map(|d| d.embedding).collect()
}

// ---------------------------------------------------------------------------
// Vector helpers
// ---------------------------------------------------------------------------

/// Cut text that would overflow the model context, marking the cut with `...`.
pub fn truncate_for_embedding(text: &str) -> Cow<'_, str> {
    let max_chars = MAX_TOKENS * CHARS_PER_TOKEN;
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => Cow::Owned(format!("{}...", &text[..idx])),
        None => Cow::Borrowed(text),
    }
}

/// `[0.1,-0.2,0.3]`
pub fn to_vector_literal(values: &[f32]) -> String {
    let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

pub fn parse_vector_literal(raw: &str) -> Result<Vec<f32>, EmbeddingError> {
    let inner = raw
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| EmbeddingError::InvalidVector(truncate_str(raw, 40)))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|_| EmbeddingError::InvalidVector(truncate_str(part, 40)))
        })
        .collect()
}

fn truncate_str(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (va, vb) in a.iter().zip(b.iter()) {
        dot += va * vb;
        norm_a += va * va;
        norm_b += vb * vb;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}
