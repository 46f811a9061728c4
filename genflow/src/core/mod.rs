//! Core domain model types for genflow.
//!
//! - Run status
//! - Stage outcomes and the run record
//! - Progress events

mod event;
mod record;
mod status;

pub use event::ProgressEvent;
pub use record::{RunRecord, StageOutcome};
pub use status::RunStatus;
