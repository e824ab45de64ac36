//! HTTP embedding providers.
//!
//! Concrete [`EmbeddingClient`] implementations:
//! - **[`DisabledProvider`]**: rejects every call; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: `POST {url}/v1/embeddings` with a bearer key from `OPENAI_API_KEY`.
//! - **[`OllamaProvider`]**: `POST {url}/api/embed` on a local Ollama instance.
//!
//! [`cache::with_cache`] puts a content-hash cache in front of a provider.
//!
//! # Retry Strategy
//!
//! Both HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! # Cancellation
//!
//! Each attempt and each backoff sleep races the caller's
//! [`CancellationToken`]; a cancelled token drops the in-flight request.

pub mod cache;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use codebase_index_core::embedding::EmbeddingClient;

use crate::config::EmbeddingConfig;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Build the provider named by `config.provider`.
///
/// ```rust
/// # use codebase_index::config::EmbeddingConfig;
/// # use codebase_index_core::embedding::EmbeddingClient;
/// # use codebase_index::embedding::create_provider;
/// let config = EmbeddingConfig::default(); // provider = "disabled"
/// let provider = create_provider(&config).unwrap();
/// assert_eq!(provider.model_name(), "disabled");
/// ```
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingClient for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String], _cancel: &CancellationToken) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.")
    }
}

// ============ Shared HTTP client ============

/// Failure of a single HTTP attempt.
#[derive(Debug, Error)]
enum AttemptError {
    #[error("{provider} API error {status}: {body}")]
    Status {
        provider: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("{provider} connection error ({url}): {source}")]
    Transport {
        provider: &'static str,
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} returned an unreadable response: {source}")]
    Body {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            AttemptError::Transport { .. } => true,
            AttemptError::Body { .. } => false,
        }
    }
}

/// Delay before retry `attempt` (1-based): 1s, 2s, 4s … capped at 32s.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}

/// POSTs JSON with retries, timeouts, and cancellation.
struct JsonPoster {
    provider: &'static str,
    client: reqwest::Client,
    max_retries: u32,
}

impl JsonPoster {
    fn new(provider: &'static str, config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            provider,
            client,
            max_retries: config.max_retries,
        })
    }

    async fn post(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                debug!(provider = self.provider, attempt, delay_secs = delay.as_secs(), "retrying embedding request");
                tokio::select! {
                    _ = cancel.cancelled() => bail!("{} request cancelled", self.provider),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => bail!("{} request cancelled", self.provider),
                r = self.attempt(url, bearer, body) => r,
            };

            match result {
                Ok(json) => return Ok(json),
                Err(e) if e.is_retryable() => {
                    warn!(provider = self.provider, attempt, error = %e, "embedding request failed");
                    last_err = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        match last_err {
            Some(e) => Err(anyhow::Error::new(e).context(format!(
                "{} embedding failed after {} attempts",
                self.provider,
                self.max_retries + 1
            ))),
            None => bail!("{} embedding failed after retries", self.provider),
        }
    }

    async fn attempt(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> std::result::Result<serde_json::Value, AttemptError> {
        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = bearer {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await.map_err(|source| AttemptError::Transport {
            provider: self.provider,
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Status {
                provider: self.provider,
                status,
                body,
            });
        }

        response.json().await.map_err(|source| AttemptError::Body {
            provider: self.provider,
            source,
        })
    }
}

fn required_model_and_dims(config: &EmbeddingConfig, provider: &str) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required for {} provider", provider))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow::anyhow!("embedding.dims required for {} provider", provider))?;
    Ok((model, dims))
}

fn base_url(config: &EmbeddingConfig, default: &str) -> String {
    config
        .url
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

fn json_vector(value: &serde_json::Value, what: &str) -> Result<Vec<f32>> {
    Ok(value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Invalid {} response: embedding is not an array", what))?
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API (or an OpenAI-compatible server).
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    endpoint: String,
    api_key: String,
    http: JsonPoster,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config,
    /// or if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model_and_dims(config, "OpenAI")?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            model,
            dims,
            endpoint: format!("{}/v1/embeddings", base_url(config, OPENAI_DEFAULT_URL)),
            api_key,
            http: JsonPoster::new("OpenAI", config)?,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String], cancel: &CancellationToken) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = self
            .http
            .post(&self.endpoint, Some(&self.api_key), &body, cancel)
            .await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, json_vector(embedding, "OpenAI")?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    endpoint: String,
    http: JsonPoster,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model_and_dims(config, "Ollama")?;
        Ok(Self {
            model,
            dims,
            endpoint: format!("{}/api/embed", base_url(config, OLLAMA_DEFAULT_URL)),
            http: JsonPoster::new("Ollama", config)?,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String], cancel: &CancellationToken) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = self.http.post(&self.endpoint, None, &body, cancel).await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings.iter().map(|e| json_vector(e, "Ollama")).collect()
}
