//! Scripted provider for tests and local dry runs.

use super::{execute_with_timeout, GenerationTask, ProviderAdapter, ProviderMetadata, ProviderResponse};
use crate::errors::{ErrorKind, ProviderFailure};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

type Step = Result<serde_json::Value, ProviderFailure>;

/// A provider that replays a scripted sequence of results.
///
/// Once the script is exhausted the fallback step is repeated.
#[derive(Debug)]
pub struct ScriptedProvider {
    name: String,
    available: bool,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    latency: Option<Duration>,
    tokens_used: Option<u32>,
    call_count: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    /// Creates an available provider that succeeds with `{"provider": name}`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let fallback = Ok(serde_json::json!({ "provider": name.clone() }));
        Self {
            name,
            available: true,
            script: Mutex::new(VecDeque::new()),
            fallback,
            latency: None,
            tokens_used: None,
            call_count: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Creates a provider that reports itself as unconfigured.
    #[must_use]
    pub fn unavailable(name: impl Into<String>) -> Self {
        Self {
            available: false,
            ..Self::new(name)
        }
    }

    /// Appends a success to the script.
    #[must_use]
    pub fn then_succeed(self, payload: serde_json::Value) -> Self {
        self.script.lock().push_back(Ok(payload));
        self
    }

    /// Appends a failure to the script.
    #[must_use]
    pub fn then_fail(self, kind: ErrorKind, detail: impl Into<String>) -> Self {
        self.script
            .lock()
            .push_back(Err(ProviderFailure::new(kind, detail)));
        self
    }

    /// Succeeds with `payload` once the script runs out.
    #[must_use]
    pub fn always_succeed(mut self, payload: serde_json::Value) -> Self {
        self.fallback = Ok(payload);
        self
    }

    /// Fails with `kind` once the script runs out.
    #[must_use]
    pub fn always_fail(mut self, kind: ErrorKind) -> Self {
        self.fallback = Err(ProviderFailure::new(kind, format!("{} scripted failure", self.name)));
        self
    }

    /// Simulates network latency on every call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Reports a token count on every call.
    #[must_use]
    pub fn with_tokens(mut self, tokens: u32) -> Self {
        self.tokens_used = Some(tokens);
        self
    }

    /// Returns the number of `execute` calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Returns the prompts received, in call order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    fn next_step(&self) -> Step {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn execute(&self, task: &GenerationTask, timeout: Duration) -> ProviderResponse {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(task.prompt.clone());
        let started = Instant::now();

        let step = self.next_step();
        let latency = self.latency;
        let result = execute_with_timeout(timeout, async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            step
        })
        .await;

        let metadata = ProviderMetadata {
            model_used: format!("{}-model", self.name),
            latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            tokens_used: self.tokens_used,
        };

        match result {
            Ok(payload) => ProviderResponse::success(&self.name, payload, metadata),
            Err(failure) => ProviderResponse::failure(&self.name, failure, metadata),
        }
    }
}
