//! Pipeline definition and execution.
//!
//! This module provides:
//! - The `Stage` trait and closure-backed stages
//! - Cost estimation
//! - The run history collaborator
//! - The five-stage runner

mod cost;
mod history;
mod runner;
mod stage;

#[cfg(test)]
pub use history::MockHistoryStore;
pub use cost::CostModel;
pub use history::{HistoryStore, InMemoryHistoryStore};
pub use runner::{PipelineRunner, PipelineRunnerBuilder, RunHandle, RunRequest, ANONYMOUS_IDENTITY};
pub use stage::{payload_text, summarize_value, FnStage, RequiredFields, Stage, StageContext};
