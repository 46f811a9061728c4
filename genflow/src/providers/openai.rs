//! Adapter for OpenAI-compatible chat completion backends.
//!
//! Works against any server that speaks the `/chat/completions` dialect
//! (OpenAI, Groq, OpenRouter, local gateways) by pointing `base_url` at it.

use super::http::{classify_transport, elapsed_ms, failure_for_status, payload_from_text, resolve_api_key};
use super::{execute_with_timeout, GenerationTask, ProviderAdapter, ProviderMetadata, ProviderResponse};
use crate::config::ProviderConfig;
use crate::errors::ProviderFailure;
use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};

/// OpenAI-compatible provider.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    name: String,
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

struct Completion {
    text: String,
    model: String,
    tokens: Option<u32>,
}

impl OpenAiCompatibleProvider {
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
        let mut messages = Vec::new();
        if let Some(system) = &task.system {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": task.prompt }));

        let mut payload = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(max_tokens) = task.max_tokens {
            payload["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temperature) = task.temperature {
            payload["temperature"] = serde_json::json!(temperature);
        }
        if task.expect_json {
            payload["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        payload
    }

    fn parse_response(&self, body: &Value) -> Result<Completion, ProviderFailure> {
        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("backend reported an error");
            return Err(ProviderFailure::model(message));
        }

        let text = body
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if text.trim().is_empty() {
            return Err(ProviderFailure::model("empty completion"));
        }

        let tokens = body
            .get("usage")
            .and_then(|usage| usage.get("total_tokens"))
            .and_then(Value::as_u64)
            .and_then(|t| u32::try_from(t).ok());
        let model = body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(self.model.as_str())
            .to_string();

        Ok(Completion { text, model, tokens })
    }

    async fn call(
        &self,
        task: &GenerationTask,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Completion, ProviderFailure> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
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
        self.parse_response(&body)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleProvider {
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
            Ok(completion) => {
                metadata.model_used = completion.model;
                metadata.tokens_used = completion.tokens;
                ProviderResponse::success(
                    &self.name,
                    payload_from_text(&completion.text, task.expect_json),
                    metadata,
                )
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

    fn provider() -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new("openai", "https://api.example.com/v1/", "gpt-test", Some("k".into()))
    }

    #[test]
    fn test_base_url_trimmed_and_available() {
        let p = provider();
        assert_eq!(p.base_url, "https://api.example.com/v1");
        assert!(p.is_available());
        assert!(!OpenAiCompatibleProvider::new("x", "u", "m", Some(String::new())).is_available());
    }

    #[test]
    fn test_build_payload() {
        let task = GenerationTask::new("hello")
            .with_system("sys")
            .with_max_tokens(10)
            .expecting_json();
        let payload = provider().build_payload(&task);

        assert_eq!(payload["model"], "gpt-test");
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][1]["content"], "hello");
        assert_eq!(payload["max_tokens"], 10);
        assert_eq!(payload["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_parse_response() {
        let body = serde_json::json!({
            "model": "gpt-test-2024",
            "choices": [{ "message": { "content": "hi there" } }],
            "usage": { "total_tokens": 42 }
        });
        let completion = provider().parse_response(&body).unwrap();
        assert_eq!(completion.text, "hi there");
        assert_eq!(completion.model, "gpt-test-2024");
        assert_eq!(completion.tokens, Some(42));
    }

    #[test]
    fn test_parse_response_errors() {
        let p = provider();
        let empty = serde_json::json!({ "choices": [] });
        assert_eq!(p.parse_response(&empty).err().unwrap().kind, ErrorKind::ModelError);

        let reported = serde_json::json!({ "error": { "message": "context too long" } });
        let failure = p.parse_response(&reported).err().unwrap();
        assert_eq!(failure.kind, ErrorKind::ModelError);
        assert_eq!(failure.detail, "context too long");
    }

    #[tokio::test]
    async fn test_missing_key_is_auth_error_without_network() {
        let p = OpenAiCompatibleProvider::new("openai", "http://127.0.0.1:9", "m", None);
        let response = p
            .execute(&GenerationTask::new("x"), Duration::from_secs(1))
            .await;
        assert_eq!(response.error_kind(), Some(ErrorKind::AuthError));
    }
}
