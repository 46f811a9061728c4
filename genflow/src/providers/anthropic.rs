//! Adapter for the Anthropic messages API.

use super::http::{classify_transport, elapsed_ms, failure_for_status, payload_from_text, resolve_api_key};
use super::{execute_with_timeout, GenerationTask, ProviderAdapter, ProviderMetadata, ProviderResponse};
use crate::config::ProviderConfig;
use crate::errors::ProviderFailure;
use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic messages API provider.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Creates a new provider.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client: reqwest::Client::new(),
        }
    }

    /// Creates a provider from its config entry.
    #[must_use]
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            &config.name,
            &config.base_url,
            &config.model,
            resolve_api_key(config.api_key.as_deref(), config.api_key_env.as_deref()),
        )
    }

    fn build_payload(&self, task: &GenerationTask) -> Value {
        let mut payload = serde_json::json!({
            "model": self.model,
            "max_tokens": task.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": [{ "role": "user", "content": task.prompt }],
        });
        if let Some(system) = &task.system {
            payload["system"] = serde_json::json!(system);
        }
        if let Some(temperature) = task.temperature {
            payload["temperature"] = serde_json::json!(temperature);
        }
        payload
    }

    /// Extracts the text blocks and token usage from a response body.
    fn parse_response(body: &Value) -> Result<(String, Option<u32>), ProviderFailure> {
        if body.get("type").and_then(Value::as_str) == Some("error") {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("backend reported an error");
            return Err(ProviderFailure::model(message));
        }

        let text: String = body
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ProviderFailure::model("empty completion"));
        }

        let usage = body.get("usage");
        let input = usage
            .and_then(|u| u.get("input_tokens"))
            .and_then(Value::as_u64);
        let output = usage
            .and_then(|u| u.get("output_tokens"))
            .and_then(Value::as_u64);
        let tokens = match (input, output) {
            (None, None) => None,
            (i, o) => u32::try_from(i.unwrap_or(0) + o.unwrap_or(0)).ok(),
        };

        Ok((text, tokens))
    }

    async fn call(
        &self,
        task: &GenerationTask,
        api_key: &str,
        timeout: Duration,
    ) -> Result<(String, Option<u32>), ProviderFailure> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .timeout(timeout)
            .json(&self.build_payload(task))
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failure_for_status(status, &body));
        }

        let body: Value = response.json().await.map_err(|e| classify_transport(&e))?;
        Self::parse_response(&body)
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn execute(&self, task: &GenerationTask, timeout: Duration) -> ProviderResponse {
        let started = Instant::now();
        let mut metadata = ProviderMetadata {
            model_used: self.model.clone(),
            ..ProviderMetadata::default()
        };

        let Some(api_key) = self.api_key.as_deref() else {
            return ProviderResponse::failure(
                &self.name,
                ProviderFailure::auth(format!("{} has no API key configured", self.name)),
                metadata,
            );
        };

        let result = execute_with_timeout(timeout, self.call(task, api_key, timeout)).await;
        metadata.latency_ms = elapsed_ms(started);

        match result {
            Ok((text, tokens)) => {
                metadata.tokens_used = tokens;
                ProviderResponse::success(&self.name, payload_from_text(&text, task.expect_json), metadata)
            }
            Err(failure) => {
                tracing::debug!(provider = %self.name, error_kind = %failure.kind, "Provider call failed");
                ProviderResponse::failure(&self.name, failure, metadata)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_build_payload_defaults_max_tokens() {
        let p = AnthropicProvider::new("anthropic", "https://api.example.com", "claude-test", Some("k".into()));
        let payload = p.build_payload(&GenerationTask::new("hello").with_system("sys"));

        assert_eq!(payload["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(payload["system"], "sys");
        assert_eq!(payload["messages"][0]["content"], "hello");
    }

    #[test]
    fn test_parse_response_joins_text_blocks() {
        let body = serde_json::json!({
            "type": "message",
            "content": [
                { "type": "text", "text": "part one, " },
                { "type": "tool_use", "id": "x" },
                { "type": "text", "text": "part two" }
            ],
            "usage": { "input_tokens": 10, "output_tokens": 5 }
        });
        let (text, tokens) = AnthropicProvider::parse_response(&body).unwrap();
        assert_eq!(text, "part one, part two");
        assert_eq!(tokens, Some(15));
    }

    #[test]
    fn test_parse_error_body() {
        let body = serde_json::json!({
            "type": "error",
            "error": { "type": "invalid_request_error", "message": "prompt is too long" }
        });
        let failure = AnthropicProvider::parse_response(&body).unwrap_err();
        assert_eq!(failure.kind, ErrorKind::ModelError);
        assert_eq!(failure.detail, "prompt is too long");
    }

    #[test]
    fn test_unavailable_without_key() {
        let p = AnthropicProvider::new("anthropic", "https://api.example.com", "m", None);
        assert!(!p.is_available());
    }
}
