//! Cooperative cancellation for pipeline runs.
//!
//! This module provides:
//! - CancellationToken for cooperative cancellation
//! - run_guarded, which races a future against a timeout and a token
//! - RunRegistry, the run id → cancellation handle store

mod guard;
mod registry;
mod token;

pub use guard::{run_guarded, GuardError};
pub use registry::{RunRegistry, RunSnapshot};
pub use token::CancellationToken;
