//! Stage outcomes and the run record.

use super::RunStatus;
use crate::config::STAGE_COUNT;
use crate::dispatch::FallbackAttempt;
use crate::errors::{GenflowError, ProviderFailure, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The resolved result of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageOutcome {
    /// The 1-based stage number.
    pub stage: u8,
    /// Whether the stage succeeded.
    pub success: bool,
    /// The raw payload, opaque to the engine.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// The provider that produced the payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Wall-clock duration of the stage.
    pub duration_ms: u64,
    /// Estimated cost of the stage.
    pub cost_usd: f64,
    /// Whether the payload passed the stage's validator.
    pub validated: bool,
    /// The failure, when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderFailure>,
    /// Providers tried during the last dispatch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<FallbackAttempt>,
}

impl StageOutcome {
    /// Creates a successful outcome.
    #[must_use]
    pub fn succeeded(stage: u8, payload: serde_json::Value, provider: impl Into<String>) -> Self {
        Self {
            stage,
            success: true,
            payload,
            provider: Some(provider.into()),
            duration_ms: 0,
            cost_usd: 0.0,
            validated: true,
            error: None,
            attempts: Vec::new(),
        }
    }

    /// Creates a failed outcome.
    #[must_use]
    pub fn failed(stage: u8, failure: ProviderFailure) -> Self {
        Self {
            stage,
            success: false,
            payload: serde_json::Value::Null,
            provider: None,
            duration_ms: 0,
            cost_usd: 0.0,
            validated: false,
            error: Some(failure),
            attempts: Vec::new(),
        }
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Sets the estimated cost.
    #[must_use]
    pub fn with_cost_usd(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    /// Sets the validation flag.
    #[must_use]
    pub fn with_validated(mut self, validated: bool) -> Self {
        self.validated = validated;
        self
    }

    /// Attaches dispatch diagnostics.
    #[must_use]
    pub fn with_attempts(mut self, attempts: Vec<FallbackAttempt>) -> Self {
        self.attempts = attempts;
        self
    }
}

/// The durable record of one run.
///
/// Outcomes are append-only, capped at five, and strictly increasing in
/// stage number. Once the status leaves `Running` the record is frozen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    run_id: String,
    started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,
    outcomes: Vec<StageOutcome>,
    total_cost_usd: f64,
    total_duration_ms: u64,
    status: RunStatus,
}

impl RunRecord {
    /// Creates a running record.
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            outcomes: Vec::with_capacity(STAGE_COUNT),
            total_cost_usd: 0.0,
            total_duration_ms: 0,
            status: RunStatus::Running,
        }
    }

    /// Appends a stage outcome and accumulates its cost.
    pub fn push_outcome(&mut self, outcome: StageOutcome) -> Result<()> {
        self.ensure_running()?;
        if outcome.stage == 0 || usize::from(outcome.stage) > STAGE_COUNT {
            return Err(GenflowError::InvalidRecord(format!(
                "stage {} out of range 1..={STAGE_COUNT}",
                outcome.stage
            )));
        }
        if let Some(last) = self.outcomes.last() {
            if outcome.stage <= last.stage {
                return Err(GenflowError::InvalidRecord(format!(
                    "stage {} recorded after stage {}",
                    outcome.stage, last.stage
                )));
            }
        }
        self.total_cost_usd += outcome.cost_usd.max(0.0);
        self.outcomes.push(outcome);
        Ok(())
    }

    /// Moves the record to a terminal status.
    pub fn finish(&mut self, status: RunStatus, total_duration_ms: u64) -> Result<()> {
        self.ensure_running()?;
        if !status.is_terminal() {
            return Err(GenflowError::InvalidRecord(
                "a run can only finish in a terminal status".to_string(),
            ));
        }
        self.status = status;
        self.total_duration_ms = total_duration_ms;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(GenflowError::InvalidRecord(format!(
                "run {} is already {}",
                self.run_id, self.status
            )));
        }
        Ok(())
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Returns when the run started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns when the run finished.
    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Returns the recorded outcomes in stage order.
    #[must_use]
    pub fn outcomes(&self) -> &[StageOutcome] {
        &self.outcomes
    }

    /// Returns the most recent outcome.
    #[must_use]
    pub fn last_outcome(&self) -> Option<&StageOutcome> {
        self.outcomes.last()
    }

    /// Returns the payloads in stage order.
    #[must_use]
    pub fn results(&self) -> Vec<serde_json::Value> {
        self.outcomes.iter().map(|o| o.payload.clone()).collect()
    }

    /// Returns the aggregate cost so far.
    #[must_use]
    pub fn total_cost_usd(&self) -> f64 {
        self.total_cost_usd
    }

    /// Returns the total duration (zero while running).
    #[must_use]
    pub fn total_duration_ms(&self) -> u64 {
        self.total_duration_ms
    }

    /// Returns the status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }
}
