//! Waterfall fallback across providers.
//!
//! Providers are tried strictly in the caller's priority order. Each one is
//! driven through the backoff retrier, which retries only transient kinds
//! (timeout, network, rate limit). The first success wins; later providers
//! are never called.

use crate::errors::{ErrorKind, ProviderFailure};
use crate::providers::{GenerationTask, ProviderMetadata, ProviderRegistry, ProviderResponse};
use crate::retry::{retry_with_backoff, RetryDecision, RetryPolicy};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

/// Diagnostics for one provider tried during a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackAttempt {
    /// The provider name.
    pub provider: String,
    /// Whether the provider eventually succeeded.
    pub success: bool,
    /// The last error kind, if it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// The last error detail, if it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Retries consumed beyond the first call.
    pub retries: u32,
}

/// The outcome of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    /// The winning payload, or the overall failure.
    pub result: Result<serde_json::Value, ProviderFailure>,
    /// The provider that succeeded.
    pub provider: Option<String>,
    /// Metadata of the winning call.
    pub metadata: Option<ProviderMetadata>,
    /// One entry per provider actually tried, in order.
    pub attempts: Vec<FallbackAttempt>,
}

impl DispatchResult {
    /// Creates a failed result.
    #[must_use]
    pub fn failed(failure: ProviderFailure, attempts: Vec<FallbackAttempt>) -> Self {
        Self {
            result: Err(failure),
            provider: None,
            metadata: None,
            attempts,
        }
    }

    /// Returns true if some provider succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Returns the overall failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&ProviderFailure> {
        self.result.as_ref().err()
    }

    /// Returns the error kind, if the dispatch failed.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.failure().map(|f| f.kind)
    }
}

/// Attempts recorded as each provider resolves.
///
/// Outlives the dispatch future, so a caller that abandons a dispatch on
/// timeout still keeps the attempts that finished before it.
#[derive(Debug, Default)]
pub struct AttemptLog {
    attempts: Mutex<Vec<FallbackAttempt>>,
}

impl AttemptLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, attempt: FallbackAttempt) {
        self.attempts.lock().push(attempt);
    }

    /// Returns the number of recorded attempts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attempts.lock().is_empty()
    }

    /// Drains the recorded attempts.
    pub fn take(&self) -> Vec<FallbackAttempt> {
        std::mem::take(&mut *self.attempts.lock())
    }
}

/// Tries providers in priority order until one succeeds.
#[derive(Debug, Clone)]
pub struct FallbackDispatcher {
    registry: Arc<ProviderRegistry>,
}

impl FallbackDispatcher {
    /// Creates a dispatcher over a provider registry.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Returns the underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Dispatches `task` across `priority_order`.
    pub async fn dispatch(
        &self,
        task: &GenerationTask,
        priority_order: &[String],
        timeout: Duration,
        policy: &RetryPolicy,
    ) -> DispatchResult {
        self.dispatch_logged(task, priority_order, timeout, policy, &AttemptLog::new())
            .await
    }

    /// Like [`dispatch`](Self::dispatch), also appending each resolved
    /// attempt to `log` as soon as it is known.
    pub async fn dispatch_logged(
        &self,
        task: &GenerationTask,
        priority_order: &[String],
        timeout: Duration,
        policy: &RetryPolicy,
        log: &AttemptLog,
    ) -> DispatchResult {
        let adapters: Vec<_> = self
            .registry
            .resolve(priority_order)
            .into_iter()
            .filter(|adapter| adapter.is_available())
            .collect();

        if adapters.is_empty() {
            tracing::warn!(?priority_order, "No providers configured");
            return DispatchResult::failed(
                ProviderFailure::auth("no providers configured"),
                Vec::new(),
            );
        }

        let mut attempts = Vec::with_capacity(adapters.len());

        for adapter in &adapters {
            let context = format!("provider:{}", adapter.name());
            let retried = retry_with_backoff(
                policy,
                &context,
                |_| async move { Ok::<_, Infallible>(adapter.execute(task, timeout).await) },
                classify_response,
            )
            .await
            .unwrap_or_else(|never| match never {});

            let retries = retried.retries();
            let response = retried.value;
            let failure = response.failure_ref().cloned();

            let attempt = FallbackAttempt {
                provider: adapter.name().to_string(),
                success: failure.is_none(),
                error_kind: failure.as_ref().map(|f| f.kind),
                error_detail: failure.as_ref().map(|f| f.detail.clone()),
                retries,
            };
            log.push(attempt.clone());
            attempts.push(attempt);

            match response.result {
                Ok(payload) => {
                    tracing::info!(
                        provider = adapter.name(),
                        retries,
                        tried = attempts.len(),
                        "Provider succeeded"
                    );
                    return DispatchResult {
                        result: Ok(payload),
                        provider: Some(response.provider),
                        metadata: Some(response.metadata),
                        attempts,
                    };
                }
                Err(failure) => {
                    tracing::warn!(
                        provider = adapter.name(),
                        retries,
                        error_kind = %failure.kind,
                        error = %failure.detail,
                        "Provider failed, falling back"
                    );
                }
            }
        }

        let tried = attempts.len();
        DispatchResult::failed(
            ProviderFailure::unknown(format!("all {tried} providers failed")),
            attempts,
        )
    }
}

fn classify_response(response: &ProviderResponse) -> RetryDecision {
    response
        .error_kind()
        .map_or_else(RetryDecision::stop, RetryDecision::for_kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::ScriptedProvider;
    use pretty_assertions::assert_eq;

    fn policy() -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(3)
            .with_initial_delay_ms(10)
    }

    fn order(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    fn dispatcher(providers: Vec<Arc<ScriptedProvider>>) -> FallbackDispatcher {
        let mut registry = ProviderRegistry::new();
        for p in providers {
            registry.register(p);
        }
        FallbackDispatcher::new(Arc::new(registry))
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_provider_wins_after_network_failures() {
        let a = Arc::new(ScriptedProvider::new("a").always_fail(ErrorKind::NetworkError));
        let b = Arc::new(ScriptedProvider::new("b").always_fail(ErrorKind::NetworkError));
        let c = Arc::new(ScriptedProvider::new("c").always_succeed(serde_json::json!("from c")));
        let d = dispatcher(vec![a.clone(), b.clone(), c.clone()]);

        let result = d
            .dispatch(
                &GenerationTask::new("x"),
                &order(&["a", "b", "c"]),
                Duration::from_secs(1),
                &policy(),
            )
            .await;

        assert!(result.is_success());
        assert_eq!(result.result, Ok(serde_json::json!("from c")));
        assert_eq!(result.provider.as_deref(), Some("c"));
        assert_eq!(result.attempts.len(), 3);
        // network errors are retried up to the policy limit
        assert_eq!(a.call_count(), 3);
        assert_eq!(result.attempts[0].retries, 2);
        assert_eq!(result.attempts[0].error_kind, Some(ErrorKind::NetworkError));
        assert!(result.attempts[2].success);
    }

    #[tokio::test]
    async fn test_no_available_providers() {
        let d = dispatcher(vec![
            Arc::new(ScriptedProvider::unavailable("a")),
            Arc::new(ScriptedProvider::unavailable("b")),
        ]);

        let result = d
            .dispatch(
                &GenerationTask::new("x"),
                &order(&["a", "b", "unknown"]),
                Duration::from_secs(1),
                &policy(),
            )
            .await;

        assert_eq!(result.error_kind(), Some(ErrorKind::AuthError));
        assert_eq!(result.failure().unwrap().detail, "no providers configured");
        assert!(result.attempts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_not_retried_but_falls_through() {
        let a = Arc::new(ScriptedProvider::new("a").always_fail(ErrorKind::AuthError));
        let b = Arc::new(ScriptedProvider::new("b"));
        let d = dispatcher(vec![a.clone(), b.clone()]);

        let result = d
            .dispatch(
                &GenerationTask::new("x"),
                &order(&["a", "b"]),
                Duration::from_secs(1),
                &policy(),
            )
            .await;

        assert!(result.is_success());
        assert_eq!(a.call_count(), 1);
        assert_eq!(result.attempts[0].retries, 0);
        assert_eq!(result.attempts[0].error_kind, Some(ErrorKind::AuthError));
        assert_eq!(result.provider.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_first_success_stops_waterfall() {
        let a = Arc::new(ScriptedProvider::new("a"));
        let b = Arc::new(ScriptedProvider::new("b"));
        let d = dispatcher(vec![a.clone(), b.clone()]);

        let result = d
            .dispatch(
                &GenerationTask::new("x"),
                &order(&["a", "b"]),
                Duration::from_secs(1),
                &policy(),
            )
            .await;

        assert_eq!(result.attempts.len(), 1);
        assert_eq!(b.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_exhausted_is_unknown_error() {
        let d = dispatcher(vec![
            Arc::new(ScriptedProvider::new("a").always_fail(ErrorKind::ModelError)),
            Arc::new(ScriptedProvider::new("b").always_fail(ErrorKind::TimeoutError)),
        ]);

        let result = d
            .dispatch(
                &GenerationTask::new("x"),
                &order(&["a", "b"]),
                Duration::from_secs(1),
                &policy(),
            )
            .await;

        assert_eq!(result.error_kind(), Some(ErrorKind::UnknownError));
        assert_eq!(result.failure().unwrap().detail, "all 2 providers failed");
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(result.attempts[0].retries, 0);
        assert_eq!(result.attempts[1].retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_recovers_on_same_provider() {
        let a = Arc::new(
            ScriptedProvider::new("a")
                .then_fail(ErrorKind::RateLimitError, "429")
                .then_succeed(serde_json::json!({"ok": true})),
        );
        let d = dispatcher(vec![a.clone()]);

        let result = d
            .dispatch(
                &GenerationTask::new("x"),
                &order(&["a"]),
                Duration::from_secs(1),
                &policy(),
            )
            .await;

        assert!(result.is_success());
        assert_eq!(
            result.attempts,
            vec![FallbackAttempt {
                provider: "a".to_string(),
                success: true,
                error_kind: None,
                error_detail: None,
                retries: 1,
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_keeps_attempts_when_dispatch_abandoned() {
        let a = Arc::new(ScriptedProvider::new("a").always_fail(ErrorKind::AuthError));
        let b = Arc::new(ScriptedProvider::new("b").with_latency(Duration::from_secs(30)));
        let d = dispatcher(vec![a, b.clone()]);
        let log = AttemptLog::new();
        let task = GenerationTask::new("x");
        let names = order(&["a", "b"]);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            d.dispatch_logged(&task, &names, Duration::from_secs(60), &policy(), &log),
        )
        .await;

        assert!(abandoned.is_err());
        assert_eq!(b.call_count(), 1);
        let attempts = log.take();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].provider, "a");
        assert_eq!(attempts[0].error_kind, Some(ErrorKind::AuthError));
        assert!(log.is_empty());
    }
}
