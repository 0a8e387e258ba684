//! Generative-language capability used for abstractive summaries.
//!
//! Mirrors the embedding capability's provider split (`openai`, `ollama`,
//! `disabled`) with the same backoff behavior. The prompt asks for the
//! unique technical contributions of a post rather than a generic recap,
//! and output is capped at the configured token budget.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::embedding::post_with_backoff;

const SUMMARY_PROMPT: &str = "Summarize the following technical blog post in a dense, \
insight-focused paragraph. Ignore generic intro and outro material. Focus on the core \
technical contributions:";

/// Produce a short abstractive summary for article text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str, max_tokens: usize) -> Result<String>;
}

pub fn create_summarizer(config: &LlmConfig) -> Result<Box<dyn Summarizer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledSummarizer)),
        "openai" => Ok(Box::new(OpenAiSummarizer::new(config)?)),
        "ollama" => Ok(Box::new(OllamaSummarizer::new(config)?)),
        other => bail!("Unknown llm provider: {other}"),
    }
}

pub struct DisabledSummarizer;

#[async_trait]
impl Summarizer for DisabledSummarizer {
    async fn summarize(&self, _text: &str, _max_tokens: usize) -> Result<String> {
        bail!("Summarization provider is disabled")
    }
}

pub struct OpenAiSummarizer {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiSummarizer {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model_name
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model_name required for openai"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, text: &str, max_tokens: usize) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "messages": [{ "role": "user", "content": format!("{SUMMARY_PROMPT}\n\n{text}") }],
        });
        let json = post_with_backoff(
            &self.client,
            "https://api.openai.com/v1/chat/completions",
            Some(&self.api_key),
            &body,
            2,
        )
        .await?;

        json.get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.pointer("/message/content"))
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))
    }
}

pub struct OllamaSummarizer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaSummarizer {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model_name
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model_name required for ollama"))?;
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model,
        })
    }
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    async fn summarize(&self, text: &str, max_tokens: usize) -> Result<String> {
        let url = format!("{}/api/generate", self.endpoint);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": format!("{SUMMARY_PROMPT}\n\n{text}"),
            "stream": false,
            "options": { "num_predict": max_tokens },
        });
        let json = post_with_backoff(&self.client, &url, None, &body, 2).await?;

        json.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid ollama response: missing response field"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_summarizer_errors() {
        assert!(DisabledSummarizer.summarize("text", 256).await.is_err());
    }

    #[test]
    fn test_factory_rejects_unknown() {
        let mut config = LlmConfig::default();
        config.provider = "parrot".into();
        assert!(create_summarizer(&config).is_err());
    }
}
