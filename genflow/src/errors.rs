//! Error types for the genflow engine.
//!
//! Two layers live here. [`ErrorKind`] and [`ProviderFailure`] form the flat
//! taxonomy every provider adapter normalises its faults into; the dispatcher
//! and retrier reason only in these terms. [`GenflowError`] is the crate-level
//! error returned in `Err` position for faults that are not expected domain
//! failures (cancellation, invalid records, configuration problems).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The fixed set of provider error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Missing or rejected credential. Never retried.
    AuthError,
    /// Quota exhausted or HTTP 429.
    RateLimitError,
    /// DNS, connection or transient upstream failure.
    NetworkError,
    /// The call did not return within its budget.
    TimeoutError,
    /// Backend-reported semantic fault. Retrying will not help.
    ModelError,
    /// Anything else.
    UnknownError,
}

impl ErrorKind {
    /// Returns true for kinds that are worth retrying with backoff.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::TimeoutError | Self::NetworkError | Self::RateLimitError
        )
    }

    /// Returns the kind's stable name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthError => "AuthError",
            Self::RateLimitError => "RateLimitError",
            Self::NetworkError => "NetworkError",
            Self::TimeoutError => "TimeoutError",
            Self::ModelError => "ModelError",
            Self::UnknownError => "UnknownError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalised provider failure: a kind plus a human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {detail}")]
pub struct ProviderFailure {
    /// The error kind.
    pub kind: ErrorKind,
    /// Free-form detail, usually the backend's message.
    pub detail: String,
}

impl ProviderFailure {
    /// Creates a new provider failure.
    #[must_use]
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Creates an auth failure.
    #[must_use]
    pub fn auth(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthError, detail)
    }

    /// Creates a rate-limit failure.
    #[must_use]
    pub fn rate_limited(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimitError, detail)
    }

    /// Creates a network failure.
    #[must_use]
    pub fn network(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, detail)
    }

    /// Creates a timeout failure for a budget in milliseconds.
    #[must_use]
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(
            ErrorKind::TimeoutError,
            format!("request timed out after {timeout_ms}ms"),
        )
    }

    /// Creates a model failure.
    #[must_use]
    pub fn model(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::ModelError, detail)
    }

    /// Creates an unknown failure.
    #[must_use]
    pub fn unknown(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownError, detail)
    }

    /// Returns true if the failure is worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind.as_str()));
        map.insert("detail".to_string(), serde_json::json!(self.detail));
        map
    }
}

/// The main error type for genflow operations.
#[derive(Debug, Error)]
pub enum GenflowError {
    /// The run was cancelled by an out-of-band request.
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    /// A stage failed after exhausting its retries and providers.
    #[error("Stage {stage} failed: {failure}")]
    StageFailed {
        /// The 1-based stage number.
        stage: u8,
        /// The last failure observed.
        failure: ProviderFailure,
    },

    /// The caller exceeded its request budget.
    #[error("Rate limit exceeded: {remaining} remaining, resets in {reset_in_ms}ms")]
    RateLimited {
        /// Requests left in the window (always 0 on rejection).
        remaining: u32,
        /// Milliseconds until the window resets.
        reset_in_ms: u64,
    },

    /// A run with this id is already registered.
    #[error("Run already registered: {0}")]
    DuplicateRun(String),

    /// A run record mutation violated its invariants.
    #[error("Invalid run record: {0}")]
    InvalidRecord(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The history store rejected a record.
    #[error("History store error: {0}")]
    History(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GenflowError {
    /// Returns true if this error represents a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Convenience alias for results in this crate.
pub type Result<T, E = GenflowError> = std::result::Result<T, E>;
