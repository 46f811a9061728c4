//! Progress events emitted by a run.
//!
//! Consumers rebuild run state purely from event order, so the variants map
//! one-to-one onto the runner's transitions. `PipelineComplete` and `Error`
//! end the stream.

use serde::{Deserialize, Serialize};

/// One entry in a run's progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The run was admitted and registered.
    #[serde(rename_all = "camelCase")]
    RunStarted {
        /// The run id.
        run_id: String,
    },
    /// A stage is about to dispatch.
    #[serde(rename_all = "camelCase")]
    StageStart {
        /// The 1-based stage number.
        stage_number: u8,
    },
    /// A stage resolved.
    #[serde(rename_all = "camelCase")]
    StageComplete {
        /// The 1-based stage number.
        stage_number: u8,
        /// Whether the stage succeeded.
        success: bool,
        /// Wall-clock duration of the stage.
        duration_ms: u64,
        /// Estimated cost of this stage.
        cost_usd: f64,
        /// Running total including this stage.
        total_cost_usd: f64,
        /// Short summary handed to the caller.
        result_summary: String,
    },
    /// The run halted.
    #[serde(rename_all = "camelCase")]
    Error {
        /// What went wrong.
        message: String,
        /// True if the run was cancelled rather than broken.
        cancelled: bool,
    },
    /// The run completed.
    #[serde(rename_all = "camelCase")]
    PipelineComplete {
        /// The run id.
        run_id: String,
        /// Wall-clock duration of the run.
        total_duration_ms: u64,
        /// Final aggregate cost.
        total_cost_usd: f64,
        /// Per-stage payloads in stage order.
        results: Vec<serde_json::Value>,
    },
}

impl ProgressEvent {
    /// Returns the wire name of the event.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::StageStart { .. } => "stage_start",
            Self::StageComplete { .. } => "stage_complete",
            Self::Error { .. } => "error",
            Self::PipelineComplete { .. } => "pipeline_complete",
        }
    }

    /// Returns true for events that end the stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::PipelineComplete { .. })
    }

    /// Returns the stage number carried by the event, if any.
    #[must_use]
    pub fn stage_number(&self) -> Option<u8> {
        match self {
            Self::StageStart { stage_number } | Self::StageComplete { stage_number, .. } => {
                Some(*stage_number)
            }
            _ => None,
        }
    }

    /// Serializes the event as JSON.
    pub fn to_json(&self) -> crate::errors::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Formats the event as a server-sent-events frame.
    pub fn to_sse_frame(&self) -> crate::errors::Result<String> {
        Ok(format!("data: {}\n\n", self.to_json()?))
    }
}
