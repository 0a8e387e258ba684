//! Embedding capability: text → dense vector.
//!
//! Defines the [`EmbeddingClient`] trait and concrete providers:
//! - **openai** — `POST /v1/embeddings`, key from `OPENAI_API_KEY`
//! - **ollama** — `POST /api/embeddings` against a local endpoint
//! - **disabled** — always errors; records are not embeddable
//!
//! # Retry Strategy
//!
//! HTTP 429 and 5xx responses and network errors retry with exponential
//! backoff (1s, 2s, 4s, ... capped at 2^5); other 4xx responses fail
//! immediately.
//!
//! Providers report their native dimension; [`truncate_to_dimension`]
//! applies the Matryoshka-style prefix cut down to the collection's D'.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Produce a fixed-width embedding for one text.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Native output dimension of the model.
    fn dims(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Prefix-truncate a native-width vector to the collection dimension.
///
/// Wider vectors keep their first `dimension` components; a narrower
/// vector cannot be widened and is an error the pipeline maps to
/// `ErrEmbeddingFailed`.
pub fn truncate_to_dimension(mut vector: Vec<f32>, dimension: usize) -> Result<Vec<f32>> {
    if vector.len() < dimension {
        bail!(
            "embedding has {} components, narrower than the collection dimension {}",
            vector.len(),
            dimension
        );
    }
    vector.truncate(dimension);
    Ok(vector)
}

/// Instantiate the configured provider.
pub fn create_embedding_client(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingClient>> {
    match config.model_type.as_str() {
        "disabled" => Ok(Box::new(DisabledEmbedding)),
        "openai" => Ok(Box::new(OpenAiEmbedding::new(config)?)),
        "ollama" => Ok(Box::new(OllamaEmbedding::new(config)?)),
        other => bail!("Unknown embedding model_type: {other}"),
    }
}

// ───────────────────────── disabled ─────────────────────────

/// Placeholder provider used when embeddings are not configured.
pub struct DisabledEmbedding;

#[async_trait]
impl EmbeddingClient for DisabledEmbedding {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("Embedding provider is disabled")
    }
}

// ───────────────────────── openai ─────────────────────────

pub struct OpenAiEmbedding {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAiEmbedding {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model_name
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model_name required for openai"))?;
        let dims = config
            .embedding_dimensions
            .ok_or_else(|| anyhow::anyhow!("embedding.embedding_dimensions required for openai"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
            api_key,
            model,
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedding {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({ "model": self.model, "input": text });
        let json = post_with_backoff(
            &self.client,
            "https://api.openai.com/v1/embeddings",
            Some(&self.api_key),
            &body,
            self.max_retries,
        )
        .await?;

        let embedding = json
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|d| d.first())
            .and_then(|item| item.get("embedding"))
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing data[0].embedding"))?;

        Ok(embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect())
    }
}

// ───────────────────────── ollama ─────────────────────────

pub struct OllamaEmbedding {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OllamaEmbedding {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model_name
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model_name required for ollama"))?;
        let dims = config
            .embedding_dimensions
            .ok_or_else(|| anyhow::anyhow!("embedding.embedding_dimensions required for ollama"))?;

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model,
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedding {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.endpoint);
        let body = serde_json::json!({ "model": self.model, "prompt": text });
        let json = post_with_backoff(&self.client, &url, None, &body, self.max_retries).await?;

        let embedding = json
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid ollama response: missing embedding"))?;

        Ok(embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect())
    }
}

// ───────────────────────── shared call ─────────────────────────

/// POST a JSON body, retrying 429/5xx and network failures with
/// exponential backoff.
pub(crate) async fn post_with_backoff(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }
                let text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow::anyhow!("{url} returned {status}: {text}"));
                    continue;
                }
                bail!("{url} returned {status}: {text}");
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("request failed after retries")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_wider_vector() {
        let native: Vec<f32> = (0..4096).map(|i| i as f32).collect();
        let cut = truncate_to_dimension(native.clone(), 1920).unwrap();
        assert_eq!(cut.len(), 1920);
        assert_eq!(cut[..], native[..1920]);
    }

    #[test]
    fn test_truncate_exact_is_identity() {
        let v = vec![1.0, 2.0, 3.0];
        assert_eq!(truncate_to_dimension(v.clone(), 3).unwrap(), v);
    }

    #[test]
    fn test_narrower_vector_is_error() {
        assert!(truncate_to_dimension(vec![1.0, 2.0], 3).is_err());
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let provider = DisabledEmbedding;
        assert!(provider.embed("anything").await.is_err());
        assert_eq!(provider.model_name(), "disabled");
    }

    #[test]
    fn test_factory_rejects_unknown() {
        let mut config = EmbeddingConfig::default();
        config.model_type = "quantum".into();
        assert!(create_embedding_client(&config).is_err());
    }
}
