//! Completion provider for the fallback arbitrator.
//!
//! Calls an OpenAI-compatible chat-completions endpoint with the constrained
//! classification prompt and returns the raw response text. Strict schema
//! validation of that text happens in `nlquery_core::fallback`; this module
//! is transport only. Single-shot by design — the pipeline owns the one
//! permitted transient retry and the overall timeout.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use nlquery_core::fallback::CompletionProvider;

use crate::config::FallbackConfig;

/// HTTP chat-completions provider.
pub struct HttpCompletionProvider {
    url: String,
    model: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl HttpCompletionProvider {
    pub fn new(config: &FallbackConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("fallback.url required"))?;
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("fallback.model required"))?;
        let api_key = match &config.api_key_env {
            Some(var) => Some(
                std::env::var(var)
                    .with_context(|| format!("environment variable {} not set", var))?,
            ),
            None => None,
        };
        Ok(Self {
            url,
            model,
            api_key,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl CompletionProvider for HttpCompletionProvider {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "temperature": 0.0,
            "response_format": { "type": "json_object" },
        });

        let mut request = client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Completion API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        extract_content(&json)
    }
}

fn extract_content(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing choices[0].message.content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_content() {
        let json = serde_json::json!({
            "choices": [
                { "message": { "content": "{\"intent\": \"list_tables\"}" } }
            ]
        });
        assert_eq!(
            extract_content(&json).unwrap(),
            "{\"intent\": \"list_tables\"}"
        );
    }

    #[test]
    fn test_extract_content_rejects_malformed() {
        let json = serde_json::json!({ "choices": [] });
        assert!(extract_content(&json).is_err());
        let json = serde_json::json!({ "error": "boom" });
        assert!(extract_content(&json).is_err());
    }
}
