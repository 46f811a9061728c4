//! The five-stage pipeline runner.
//!
//! Stages run strictly in sequence. Each stage is dispatched through an
//! outer bounded retry, and every attempt sits inside a guard bound to the
//! stage's timeout budget and the run's cancellation token. Progress is
//! written to a [`ProgressSink`] in stage order.

use super::cost::CostModel;
use super::history::{HistoryStore, InMemoryHistoryStore};
use super::stage::{Stage, StageContext};
use crate::cancellation::{run_guarded, CancellationToken, GuardError, RunRegistry, RunSnapshot};
use crate::config::{EngineConfig, STAGE_COUNT};
use crate::core::{ProgressEvent, RunRecord, RunStatus, StageOutcome};
use crate::dispatch::{AttemptLog, DispatchResult, ExecutionMode, FallbackDispatcher};
use crate::errors::{ErrorKind, GenflowError, ProviderFailure, Result};
use crate::events::{progress_channel, ProgressSink, ProgressStream};
use crate::governor::RateGovernor;
use crate::observability::SpanTimer;
use crate::providers::{GenerationTask, ProviderRegistry};
use crate::retry::{retry_with_backoff, RetryDecision};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Identity used when a request carries none.
pub const ANONYMOUS_IDENTITY: &str = "anonymous";

/// A caller's request to run the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Explicit run id; generated when absent.
    #[serde(default)]
    pub run_id: Option<String>,
    /// Caller identity for admission control.
    #[serde(default = "default_identity")]
    pub identity: String,
    /// Execution mode; the configured default when absent.
    #[serde(default)]
    pub mode: Option<ExecutionMode>,
    /// The input handed to stage 1.
    #[serde(default)]
    pub input: serde_json::Value,
}

fn default_identity() -> String {
    ANONYMOUS_IDENTITY.to_string()
}

impl RunRequest {
    /// Creates a request for `input`.
    #[must_use]
    pub fn new(input: serde_json::Value) -> Self {
        Self {
            run_id: None,
            identity: default_identity(),
            mode: None,
            input,
        }
    }

    /// Sets the run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Sets the caller identity.
    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Sets the execution mode.
    #[must_use]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// A run spawned in the background.
#[derive(Debug)]
pub struct RunHandle {
    /// The run id.
    pub run_id: String,
    /// The run's progress events.
    pub events: ProgressStream,
    /// Resolves to the final record.
    pub join: JoinHandle<Result<RunRecord>>,
}

impl RunHandle {
    /// Waits for the run to finish, discarding unread events.
    pub async fn wait(self) -> Result<RunRecord> {
        self.join
            .await
            .map_err(|e| GenflowError::Internal(format!("run task failed: {e}")))?
    }
}

enum Halt {
    Completed,
    Failed(String),
    Cancelled(String),
}

/// Executes five-stage runs.
#[derive(Clone)]
pub struct PipelineRunner {
    config: Arc<EngineConfig>,
    dispatcher: FallbackDispatcher,
    registry: Arc<RunRegistry>,
    history: Arc<dyn HistoryStore>,
    governor: Option<Arc<RateGovernor>>,
    stages: Arc<Vec<Arc<dyn Stage>>>,
    cost: CostModel,
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("stages", &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("running", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl PipelineRunner {
    /// Starts building a runner.
    #[must_use]
    pub fn builder(config: EngineConfig) -> PipelineRunnerBuilder {
        PipelineRunnerBuilder::new(config)
    }

    /// Returns the engine config.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the run registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Requests cancellation of a run. Unknown or finished ids are a no-op.
    pub fn cancel(&self, run_id: &str) -> bool {
        self.registry.request_cancel(run_id, "cancelled by client")
    }

    /// Returns the live status of a running run.
    #[must_use]
    pub fn status(&self, run_id: &str) -> Option<RunSnapshot> {
        self.registry.snapshot(run_id)
    }

    /// Executes a run inline, writing progress into `sink`.
    ///
    /// Failed and cancelled runs are returned as `Ok` with the matching
    /// status. `Err` means the run never started (rate limited, duplicate id).
    pub async fn run(&self, request: RunRequest, sink: &dyn ProgressSink) -> Result<RunRecord> {
        let (run_id, token) = self.admit(&request)?;
        self.execute(run_id, request, token, sink).await
    }

    /// Spawns a run on the tokio runtime.
    ///
    /// The run is registered before this returns, so it can be cancelled
    /// immediately.
    pub fn start(&self, request: RunRequest) -> Result<RunHandle> {
        let (run_id, token) = self.admit(&request)?;
        let (sink, events) = progress_channel();
        let runner = self.clone();
        let id = run_id.clone();
        let join = tokio::spawn(async move { runner.execute(id, request, token, &sink).await });
        Ok(RunHandle { run_id, events, join })
    }

    /// Registers the run, then charges the caller's rate budget.
    ///
    /// A duplicate id is rejected before the governor sees it, so it costs
    /// no budget. A rate-limited run is unregistered again.
    fn admit(&self, request: &RunRequest) -> Result<(String, Arc<CancellationToken>)> {
        let run_id = request
            .run_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let token = self.registry.start(&run_id)?;
        if let Some(governor) = &self.governor {
            if let Err(err) = governor.admit_run(&request.identity, &self.config.rate_limit) {
                self.registry.complete(&run_id);
                return Err(err);
            }
        }
        Ok((run_id, token))
    }

    async fn execute(
        &self,
        run_id: String,
        request: RunRequest,
        token: Arc<CancellationToken>,
        sink: &dyn ProgressSink,
    ) -> Result<RunRecord> {
        let span = tracing::info_span!("run", run_id = %run_id);
        self.execute_inner(run_id, request, token, sink)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        run_id: String,
        request: RunRequest,
        token: Arc<CancellationToken>,
        sink: &dyn ProgressSink,
    ) -> Result<RunRecord> {
        let timer = SpanTimer::start(format!("run:{run_id}"));
        let mut record = RunRecord::new(&run_id);
        let mode = request.mode.unwrap_or(self.config.default_mode);
        tracing::info!(%mode, identity = %request.identity, "Run started");
        sink.emit(ProgressEvent::RunStarted { run_id: run_id.clone() });

        let halt = match self
            .run_stages(&run_id, &request, mode, &token, &mut record, sink)
            .await
        {
            Ok(halt) => halt,
            Err(err) => Halt::Failed(err.to_string()),
        };

        self.registry.complete(&run_id);
        let total_duration_ms = timer.finish();

        let (status, terminal) = match halt {
            Halt::Completed => (
                RunStatus::Completed,
                ProgressEvent::PipelineComplete {
                    run_id: run_id.clone(),
                    total_duration_ms,
                    total_cost_usd: record.total_cost_usd(),
                    results: record.results(),
                },
            ),
            Halt::Failed(message) => (
                RunStatus::Failed,
                ProgressEvent::Error { message, cancelled: false },
            ),
            Halt::Cancelled(reason) => (
                RunStatus::Cancelled,
                ProgressEvent::Error {
                    message: GenflowError::Cancelled(reason).to_string(),
                    cancelled: true,
                },
            ),
        };

        record.finish(status, total_duration_ms)?;
        tracing::info!(
            %status,
            stages = record.outcomes().len(),
            total_duration_ms,
            total_cost_usd = record.total_cost_usd(),
            "Run finished"
        );
        sink.emit(terminal);

        if let Err(err) = self.history.save(&record).await {
            tracing::warn!(error = %err, "Failed to persist run record");
        }
        Ok(record)
    }

    async fn run_stages(
        &self,
        run_id: &str,
        request: &RunRequest,
        mode: ExecutionMode,
        token: &CancellationToken,
        record: &mut RunRecord,
        sink: &dyn ProgressSink,
    ) -> Result<Halt> {
        let order = self.config.modes.order(mode);

        for (index, stage) in self.stages.iter().enumerate() {
            let number = u8::try_from(index + 1)
                .map_err(|_| GenflowError::Internal(format!("stage index {index} out of range")))?;

            if token.is_cancelled() {
                tracing::info!(stage = number, "Cancelled before stage");
                return Ok(Halt::Cancelled(token.reason().unwrap_or_default()));
            }

            self.registry.set_active_stage(run_id, number);
            sink.emit(ProgressEvent::StageStart { stage_number: number });
            tracing::info!(stage = number, name = stage.name(), "Stage started");

            let task = stage.build_task(&StageContext {
                run_id,
                stage: number,
                mode,
                input: &request.input,
                outcomes: record.outcomes(),
            });

            let timer = SpanTimer::start(format!("stage:{number}"));
            let dispatched = match self.dispatch_stage(number, &task, order, token).await {
                Ok(result) => result,
                Err(GenflowError::Cancelled(reason)) => {
                    tracing::info!(stage = number, "Cancelled during stage");
                    return Ok(Halt::Cancelled(reason));
                }
                Err(err) => return Err(err),
            };
            let duration_ms = timer.finish();
            let attempts = dispatched.attempts;

            match dispatched.result {
                Ok(payload) => {
                    let provider = dispatched.provider.unwrap_or_default();
                    let validated = stage.validate(&payload);
                    if !validated {
                        tracing::warn!(stage = number, provider = %provider, "Stage output failed validation");
                    }
                    let cost_usd = self.cost.estimate(&provider, dispatched.metadata.as_ref(), &payload);
                    let summary = stage.summarize(&payload);

                    record.push_outcome(
                        StageOutcome::succeeded(number, payload, &provider)
                            .with_duration_ms(duration_ms)
                            .with_cost_usd(cost_usd)
                            .with_validated(validated)
                            .with_attempts(attempts),
                    )?;
                    tracing::info!(stage = number, provider = %provider, duration_ms, cost_usd, "Stage completed");
                    sink.emit(ProgressEvent::StageComplete {
                        stage_number: number,
                        success: true,
                        duration_ms,
                        cost_usd,
                        total_cost_usd: record.total_cost_usd(),
                        result_summary: summary,
                    });
                }
                Err(failure) if self.is_soft_failure(number) => {
                    tracing::warn!(stage = number, error = %failure, "Final stage failed, completing run");
                    let summary = failure.to_string();
                    record.push_outcome(
                        StageOutcome::failed(number, failure)
                            .with_duration_ms(duration_ms)
                            .with_attempts(attempts),
                    )?;
                    sink.emit(ProgressEvent::StageComplete {
                        stage_number: number,
                        success: false,
                        duration_ms,
                        cost_usd: 0.0,
                        total_cost_usd: record.total_cost_usd(),
                        result_summary: summary,
                    });
                }
                Err(failure) => {
                    tracing::error!(stage = number, error = %failure, tried = attempts.len(), "Stage failed");
                    return Ok(Halt::Failed(
                        GenflowError::StageFailed { stage: number, failure }.to_string(),
                    ));
                }
            }
        }

        Ok(Halt::Completed)
    }

    fn is_soft_failure(&self, stage: u8) -> bool {
        usize::from(stage) == STAGE_COUNT && self.config.final_stage_soft_failure
    }

    /// Outer retry around guarded dispatches. Only cancellation is an `Err`.
    async fn dispatch_stage(
        &self,
        stage: u8,
        task: &GenerationTask,
        order: &[String],
        token: &CancellationToken,
    ) -> Result<DispatchResult> {
        let budget = self.config.stage_timeout(stage);
        let provider_timeout = self.config.provider_timeout();
        let inner_retry = &self.config.inner_retry;
        let dispatcher = &self.dispatcher;
        let context = format!("stage:{stage}");

        let attempts = retry_with_backoff(
            &self.config.outer_retry,
            &context,
            |attempt| async move {
                tracing::debug!(stage, attempt, "Dispatching stage");
                let log = AttemptLog::new();
                let guarded = run_guarded(
                    dispatcher.dispatch_logged(task, order, provider_timeout, inner_retry, &log),
                    budget,
                    token,
                )
                .await;
                match guarded {
                    Ok(result) => Ok(result),
                    Err(GuardError::TimedOut(elapsed)) => {
                        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                        tracing::warn!(stage, attempt, budget_ms = ms, "Stage attempt timed out");
                        // the provider in flight never resolved, so it has no entry
                        Ok(DispatchResult::failed(ProviderFailure::timeout(ms), log.take()))
                    }
                    Err(GuardError::Cancelled(reason)) => Err(GenflowError::Cancelled(reason)),
                }
            },
            classify_dispatch,
        );

        // Cancellation also interrupts the backoff sleep between attempts.
        let retried = tokio::select! {
            biased;
            () = token.cancelled() => {
                return Err(GenflowError::Cancelled(token.reason().unwrap_or_default()));
            }
            retried = attempts => retried?,
        };
        Ok(retried.value)
    }
}

fn classify_dispatch(result: &DispatchResult) -> RetryDecision {
    match result.error_kind() {
        None => RetryDecision::stop(),
        Some(ErrorKind::AuthError) => RetryDecision::stop_on(ErrorKind::AuthError),
        Some(kind) => RetryDecision::retry(kind),
    }
}

/// Builds a [`PipelineRunner`].
pub struct PipelineRunnerBuilder {
    config: EngineConfig,
    providers: Arc<ProviderRegistry>,
    registry: Option<Arc<RunRegistry>>,
    history: Option<Arc<dyn HistoryStore>>,
    governor: Option<Arc<RateGovernor>>,
    stages: Vec<Arc<dyn Stage>>,
}

impl PipelineRunnerBuilder {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            providers: Arc::new(ProviderRegistry::new()),
            registry: None,
            history: None,
            governor: None,
            stages: Vec::with_capacity(STAGE_COUNT),
        }
    }

    /// Sets the provider registry.
    #[must_use]
    pub fn providers(mut self, providers: Arc<ProviderRegistry>) -> Self {
        self.providers = providers;
        self
    }

    /// Shares a run registry, e.g. with a status endpoint.
    #[must_use]
    pub fn registry(mut self, registry: Arc<RunRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the history store. Defaults to an in-memory store.
    #[must_use]
    pub fn history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Enables admission control.
    #[must_use]
    pub fn governor(mut self, governor: Arc<RateGovernor>) -> Self {
        self.governor = Some(governor);
        self
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Replaces all stages.
    #[must_use]
    pub fn stages(mut self, stages: Vec<Arc<dyn Stage>>) -> Self {
        self.stages = stages;
        self
    }

    /// Validates the config and stage count, then builds the runner.
    pub fn build(self) -> Result<PipelineRunner> {
        self.config.validate()?;
        if self.stages.len() != STAGE_COUNT {
            return Err(GenflowError::Config(format!(
                "expected {STAGE_COUNT} stages, got {}",
                self.stages.len()
            )));
        }

        Ok(PipelineRunner {
            cost: CostModel::from_config(&self.config),
            config: Arc::new(self.config),
            dispatcher: FallbackDispatcher::new(self.providers),
            registry: self.registry.unwrap_or_default(),
            history: self
                .history
                .unwrap_or_else(|| Arc::new(InMemoryHistoryStore::new())),
            governor: self.governor,
            stages: Arc::new(self.stages),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FnStage;

    fn stages() -> Vec<Arc<dyn Stage>> {
        (1..=5)
            .map(|i| Arc::new(FnStage::passthrough(format!("s{i}"))) as Arc<dyn Stage>)
            .collect()
    }

    #[test]
    fn test_builder_requires_five_stages() {
        let err = PipelineRunner::builder(EngineConfig::default())
            .stage(Arc::new(FnStage::passthrough("only")))
            .build()
            .unwrap_err();
        assert!(matches!(err, GenflowError::Config(_)));

        assert!(PipelineRunner::builder(EngineConfig::default())
            .stages(stages())
            .build()
            .is_ok());
    }

    #[test]
    fn test_builder_validates_config() {
        let config = EngineConfig::default().with_provider_timeout_ms(0);
        assert!(PipelineRunner::builder(config).stages(stages()).build().is_err());
    }

    #[test]
    fn test_classify_dispatch() {
        let ok = DispatchResult {
            result: Ok(serde_json::json!(1)),
            provider: Some("p".into()),
            metadata: None,
            attempts: Vec::new(),
        };
        assert!(!classify_dispatch(&ok).retry);

        let auth = DispatchResult::failed(ProviderFailure::auth("none"), Vec::new());
        assert!(!classify_dispatch(&auth).retry);

        let exhausted = DispatchResult::failed(ProviderFailure::unknown("all 3 failed"), Vec::new());
        assert!(classify_dispatch(&exhausted).retry);
    }

    #[test]
    fn test_request_defaults_from_json() {
        let request: RunRequest = serde_json::from_str(r#"{"input": "topic", "mode": "fast"}"#).unwrap();
        assert_eq!(request.identity, ANONYMOUS_IDENTITY);
        assert_eq!(request.mode, Some(ExecutionMode::Fast));
        assert!(request.run_id.is_none());
    }

    #[test]
    fn test_cancel_unknown_run_is_noop() {
        let runner = PipelineRunner::builder(EngineConfig::default())
            .stages(stages())
            .build()
            .unwrap();
        assert!(!runner.cancel("nope"));
        assert!(runner.status("nope").is_none());
    }
}
