//! Request and response types shared by all adapters.

use crate::errors::{ErrorKind, ProviderFailure};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// One unit of generation work handed to a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationTask {
    /// The user prompt.
    pub prompt: String,
    /// Optional system instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Upper bound on generated tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Whether the caller expects a JSON document back.
    #[serde(default)]
    pub expect_json: bool,
    /// Opaque caller metadata, passed through untouched.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl GenerationTask {
    /// Creates a task from a prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Sets the system instructions.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Sets the token limit.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Marks the task as expecting JSON output.
    #[must_use]
    pub fn expecting_json(mut self) -> Self {
        self.expect_json = true;
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Call metadata reported by every adapter, successful or not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetadata {
    /// The model that served (or was asked to serve) the call.
    pub model_used: String,
    /// Wall-clock latency of the call.
    pub latency_ms: u64,
    /// Tokens consumed, when the backend reports them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
}

/// The outcome of a single provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    /// The adapter that produced this response.
    pub provider: String,
    /// The payload, or the normalised failure.
    pub result: Result<serde_json::Value, ProviderFailure>,
    /// Call metadata.
    pub metadata: ProviderMetadata,
}

impl ProviderResponse {
    /// Creates a successful response.
    #[must_use]
    pub fn success(
        provider: impl Into<String>,
        payload: serde_json::Value,
        metadata: ProviderMetadata,
    ) -> Self {
        Self {
            provider: provider.into(),
            result: Ok(payload),
            metadata,
        }
    }

    /// Creates a failed response.
    #[must_use]
    pub fn failure(
        provider: impl Into<String>,
        failure: ProviderFailure,
        metadata: ProviderMetadata,
    ) -> Self {
        Self {
            provider: provider.into(),
            result: Err(failure),
            metadata,
        }
    }

    /// Returns true if the call succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Returns the failure, if any.
    #[must_use]
    pub fn failure_ref(&self) -> Option<&ProviderFailure> {
        self.result.as_ref().err()
    }

    /// Returns the error kind, if the call failed.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.failure_ref().map(|f| f.kind)
    }
}

/// Bounds an adapter's network future by `timeout`.
///
/// The in-flight future is dropped when the budget elapses, so the caller
/// never waits longer than `timeout` even if the socket lingers.
pub async fn execute_with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, ProviderFailure>
where
    F: Future<Output = Result<T, ProviderFailure>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderFailure::timeout(
            u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_builder() {
        let task = GenerationTask::new("write a title")
            .with_system("be brief")
            .with_max_tokens(64)
            .with_temperature(0.2)
            .expecting_json()
            .with_metadata("stage", serde_json::json!(1));

        assert_eq!(task.prompt, "write a title");
        assert_eq!(task.system.as_deref(), Some("be brief"));
        assert_eq!(task.max_tokens, Some(64));
        assert!(task.expect_json);
        assert_eq!(task.metadata.get("stage"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn test_response_accessors() {
        let ok = ProviderResponse::success("a", serde_json::json!("x"), ProviderMetadata::default());
        assert!(ok.is_success());
        assert_eq!(ok.error_kind(), None);

        let failed = ProviderResponse::failure(
            "b",
            ProviderFailure::network("reset"),
            ProviderMetadata::default(),
        );
        assert!(!failed.is_success());
        assert_eq!(failed.error_kind(), Some(ErrorKind::NetworkError));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_with_timeout_maps_to_timeout_error() {
        let result: Result<(), ProviderFailure> =
            execute_with_timeout(Duration::from_millis(100), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::TimeoutError);
        assert!(failure.detail.contains("100ms"));
    }

    #[tokio::test]
    async fn test_execute_with_timeout_passes_through() {
        let result = execute_with_timeout(Duration::from_secs(1), async {
            Err::<(), _>(ProviderFailure::model("bad request"))
        })
        .await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::ModelError);
    }
}
