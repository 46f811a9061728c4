//! Timeout-and-cancellation guard.
//!
//! A timer and the run's cancellation token feed the same race: whichever
//! fires first drops the guarded future, abandoning any in-flight call and
//! discarding its result.

use super::CancellationToken;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Why a guarded future did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    /// The budget elapsed first.
    #[error("timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),
    /// The token fired first.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

/// Runs `future` until it completes, `budget` elapses, or `token` fires.
///
/// Cancellation wins ties so a cancelled run never reports a late result.
pub async fn run_guarded<F>(
    future: F,
    budget: Duration,
    token: &CancellationToken,
) -> Result<F::Output, GuardError>
where
    F: Future,
{
    if token.is_cancelled() {
        return Err(GuardError::Cancelled(token.reason().unwrap_or_default()));
    }

    tokio::select! {
        biased;
        () = token.cancelled() => {
            Err(GuardError::Cancelled(token.reason().unwrap_or_default()))
        }
        result = tokio::time::timeout(budget, future) => {
            result.map_err(|_| GuardError::TimedOut(budget))
        }
    }
}
