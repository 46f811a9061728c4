//! Bounded retry with exponential backoff.
//!
//! The retrier is generic over the operation's result type. It never decides
//! whether a domain failure is retryable: the caller supplies a `should_retry`
//! closure that inspects each result and returns a [`RetryDecision`]. An
//! operation that returns `Err` is treated as an unexpected fault and is
//! propagated immediately, without retry.

use crate::errors::ErrorKind;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Jitter strategy applied on top of the computed backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

impl JitterStrategy {
    /// Applies jitter to a delay.
    #[must_use]
    pub fn apply(self, delay: Duration) -> Duration {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        match self {
            Self::None => delay,
            Self::Full => {
                if millis == 0 {
                    delay
                } else {
                    Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
                }
            }
            Self::Equal => {
                let half = millis / 2;
                if half == 0 {
                    delay
                } else {
                    Duration::from_millis(half + rand::thread_rng().gen_range(0..=half))
                }
            }
        }
    }
}

/// Retry policy. A value object: build it once, share it freely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Multiplier applied per subsequent attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The default policy wrapped around a whole stage invocation.
    #[must_use]
    pub fn outer_stage() -> Self {
        Self {
            max_attempts: 2,
            initial_delay_ms: 2000,
            ..Self::default()
        }
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay_ms(mut self, delay: u64) -> Self {
        self.initial_delay_ms = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns the backoff delay after the given 1-based attempt, before jitter.
    ///
    /// `min(initial * multiplier^(attempt - 1), max)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(capped as u64)
    }

    /// Returns the delay to actually sleep after the given attempt.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        self.jitter.apply(self.delay_for(attempt))
    }

    fn attempt_limit(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// What `should_retry` decided about one result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether to try again.
    pub retry: bool,
    /// The error kind behind the decision, for telemetry.
    pub error_kind: Option<ErrorKind>,
}

impl RetryDecision {
    /// Stop and return this result.
    #[must_use]
    pub fn stop() -> Self {
        Self {
            retry: false,
            error_kind: None,
        }
    }

    /// Stop, recording the (non-retryable) kind that stopped us.
    #[must_use]
    pub fn stop_on(kind: ErrorKind) -> Self {
        Self {
            retry: false,
            error_kind: Some(kind),
        }
    }

    /// Retry because of the given kind.
    #[must_use]
    pub fn retry(kind: ErrorKind) -> Self {
        Self {
            retry: true,
            error_kind: Some(kind),
        }
    }

    /// Standard decision for a failure kind: retry iff the kind is retryable.
    #[must_use]
    pub fn for_kind(kind: ErrorKind) -> Self {
        if kind.is_retryable() {
            Self::retry(kind)
        } else {
            Self::stop_on(kind)
        }
    }
}

/// The final result of a retried operation and how many attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    /// The last result produced by the operation.
    pub value: T,
    /// Attempts consumed, at least 1.
    pub attempts: u32,
}

impl<T> Retried<T> {
    /// Retries consumed beyond the first attempt.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Runs `operation` until `should_retry` says stop or the policy is exhausted.
///
/// The operation receives the 1-based attempt number. Exhaustion is not an
/// error: the last result is returned as-is. An `Err` from the operation
/// short-circuits without retry.
pub async fn retry_with_backoff<T, E, F, Fut, S>(
    policy: &RetryPolicy,
    context: &str,
    mut operation: F,
    should_retry: S,
) -> Result<Retried<T>, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    S: Fn(&T) -> RetryDecision,
{
    let limit = policy.attempt_limit();
    let mut attempt = 1;

    loop {
        let value = operation(attempt).await?;
        let decision = should_retry(&value);

        if !decision.retry {
            return Ok(Retried { value, attempts: attempt });
        }

        if attempt >= limit {
            tracing::warn!(
                context,
                attempt,
                max_attempts = limit,
                error_kind = ?decision.error_kind,
                "Retries exhausted"
            );
            return Ok(Retried { value, attempts: attempt });
        }

        let delay = policy.jittered_delay(attempt);
        tracing::debug!(
            context,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error_kind = ?decision.error_kind,
            "Retrying after backoff"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(max_attempts)
            .with_initial_delay_ms(10)
            .with_max_delay_ms(1000)
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay_ms, 1000);
        assert_eq!(policy.max_delay_ms, 10_000);
        assert_eq!(policy.jitter, JitterStrategy::None);
    }

    #[test]
    fn test_outer_stage_policy() {
        let policy = RetryPolicy::outer_stage();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.initial_delay_ms, 2000);
    }

    #[test]
    fn test_delay_formula() {
        let policy = RetryPolicy::new()
            .with_initial_delay_ms(100)
            .with_multiplier(3.0)
            .with_max_delay_ms(5000);

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(300));
        assert_eq!(policy.delay_for(3), Duration::from_millis(900));
        assert_eq!(policy.delay_for(4), Duration::from_millis(2700));
        assert_eq!(policy.delay_for(5), Duration::from_millis(5000));
        assert_eq!(policy.delay_for(60), Duration::from_millis(5000));
    }

    #[test]
    fn test_delay_is_monotonic() {
        let policy = RetryPolicy::new()
            .with_initial_delay_ms(7)
            .with_multiplier(1.5)
            .with_max_delay_ms(2500);

        let delays: Vec<_> = (1..40).map(|a| policy.delay_for(a)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*delays.last().unwrap(), Duration::from_millis(2500));
    }

    #[test]
    fn test_full_jitter_bounds() {
        let delay = Duration::from_millis(200);
        for _ in 0..100 {
            assert!(JitterStrategy::Full.apply(delay) <= delay);
            let equal = JitterStrategy::Equal.apply(delay);
            assert!(equal >= Duration::from_millis(100) && equal <= delay);
        }
    }

    #[test]
    fn test_decision_for_kind() {
        assert!(RetryDecision::for_kind(ErrorKind::NetworkError).retry);
        assert!(!RetryDecision::for_kind(ErrorKind::AuthError).retry);
        assert_eq!(
            RetryDecision::for_kind(ErrorKind::ModelError).error_kind,
            Some(ErrorKind::ModelError)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_retry_terminates_at_max_attempts() {
        for max in 1..=5 {
            let calls = Arc::new(AtomicU32::new(0));
            let counter = calls.clone();

            let result: Result<Retried<u32>, String> = retry_with_backoff(
                &fast_policy(max),
                "test",
                |attempt| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(attempt) }
                },
                |_| RetryDecision::retry(ErrorKind::NetworkError),
            )
            .await;

            let retried = result.unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), max);
            assert_eq!(retried.attempts, max);
            // the last result is returned as-is
            assert_eq!(retried.value, max);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_decision_says_so() {
        let result: Result<Retried<&str>, String> = retry_with_backoff(
            &fast_policy(5),
            "test",
            |attempt| async move { Ok(if attempt < 3 { "flaky" } else { "ok" }) },
            |value| {
                if *value == "ok" {
                    RetryDecision::stop()
                } else {
                    RetryDecision::retry(ErrorKind::TimeoutError)
                }
            },
        )
        .await;

        let retried = result.unwrap();
        assert_eq!(retried.value, "ok");
        assert_eq!(retried.attempts, 3);
        assert_eq!(retried.retries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_error_propagates_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<Retried<()>, String> = retry_with_backoff(
            &fast_policy(4),
            "test",
            |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("boom".to_string()) }
            },
            |_| RetryDecision::retry(ErrorKind::NetworkError),
        )
        .await;

        assert_eq!(result.unwrap_err(), "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts() {
        let policy = RetryPolicy::new()
            .with_max_attempts(3)
            .with_initial_delay_ms(100)
            .with_multiplier(2.0);
        let start = tokio::time::Instant::now();

        let _: Result<Retried<()>, String> = retry_with_backoff(
            &policy,
            "test",
            |_| async { Ok(()) },
            |_| RetryDecision::retry(ErrorKind::RateLimitError),
        )
        .await;

        // 100ms after attempt 1, 200ms after attempt 2
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_attempts_runs_once() {
        let result: Result<Retried<()>, String> = retry_with_backoff(
            &fast_policy(0),
            "test",
            |_| async { Ok(()) },
            |_| RetryDecision::retry(ErrorKind::NetworkError),
        )
        .await;
        assert_eq!(result.unwrap().attempts, 1);
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay_ms, 1000);
        assert!((policy.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }
}
