//! Shared plumbing for HTTP-backed adapters.

use crate::errors::{ErrorKind, ProviderFailure};
use std::time::Instant;

/// Maps an HTTP status (and body) to an error kind.
#[must_use]
pub fn classify_status(status: u16, body: &str) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::AuthError,
        429 => ErrorKind::RateLimitError,
        408 | 504 => ErrorKind::TimeoutError,
        400 | 404 | 413 | 422 => ErrorKind::ModelError,
        500..=599 => {
            if body.contains("overloaded") || body.contains("rate limit") {
                ErrorKind::RateLimitError
            } else {
                ErrorKind::NetworkError
            }
        }
        _ => ErrorKind::UnknownError,
    }
}

/// Maps a transport-level failure to a provider failure.
#[must_use]
pub fn classify_transport(err: &reqwest::Error) -> ProviderFailure {
    let kind = if err.is_timeout() {
        ErrorKind::TimeoutError
    } else if err.is_connect() || err.is_request() || err.is_body() {
        ErrorKind::NetworkError
    } else if err.is_decode() {
        ErrorKind::ModelError
    } else {
        ErrorKind::UnknownError
    };
    ProviderFailure::new(kind, err.to_string())
}

/// Builds the failure for a non-success HTTP response.
#[must_use]
pub fn failure_for_status(status: u16, body: &str) -> ProviderFailure {
    let mut detail: String = body.chars().take(500).collect();
    if detail.is_empty() {
        detail = format!("HTTP {status}");
    }
    ProviderFailure::new(classify_status(status, body), format!("HTTP {status}: {detail}"))
}

/// Resolves an API key from an inline value or an environment variable.
#[must_use]
pub fn resolve_api_key(inline: Option<&str>, env_var: Option<&str>) -> Option<String> {
    inline
        .map(str::to_string)
        .or_else(|| env_var.and_then(|var| std::env::var(var).ok()))
        .filter(|key| !key.trim().is_empty())
}

/// Turns raw completion text into a payload.
///
/// When JSON was requested and the text parses (optionally inside a fenced
/// block) the parsed document is returned; otherwise the text itself.
#[must_use]
pub fn payload_from_text(text: &str, expect_json: bool) -> serde_json::Value {
    if expect_json {
        let trimmed = text
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
        if let Ok(value) = serde_json::from_str(trimmed) {
            return value;
        }
    }
    serde_json::Value::String(text.to_string())
}

/// Milliseconds elapsed since `started`.
#[must_use]
pub fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
