//! Provider dispatch: waterfall fallback and mode routing.

mod fallback;
mod modes;

pub use fallback::{AttemptLog, DispatchResult, FallbackAttempt, FallbackDispatcher};
pub use modes::{ExecutionMode, ModeTable};
