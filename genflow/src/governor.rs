//! Per-identity request admission.
//!
//! A fixed window per caller identity: the counter resets once the window
//! expires, otherwise it increments until `max_requests` is reached. Expired
//! windows are swept opportunistically when the map grows past a threshold,
//! so no background task is needed.

use crate::errors::{GenflowError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const DEFAULT_SWEEP_THRESHOLD: usize = 10_000;

/// Window size and request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Window length in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Requests admitted per window.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_max_requests() -> u32 {
    10
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
        }
    }
}

impl RateLimitPolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            window_ms,
            max_requests,
        }
    }

    fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// The result of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: u32,
    /// Milliseconds until the window resets.
    pub reset_in_ms: u64,
}

impl RateLimitDecision {
    /// Converts a denial into [`GenflowError::RateLimited`].
    pub fn into_result(self) -> Result<Self> {
        if self.allowed {
            Ok(self)
        } else {
            Err(GenflowError::RateLimited {
                remaining: self.remaining,
                reset_in_ms: self.reset_in_ms,
            })
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: Instant,
}

/// In-memory rate governor keyed by caller identity.
#[derive(Debug)]
pub struct RateGovernor {
    windows: DashMap<String, Window>,
    sweep_threshold: usize,
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new()
    }
}

impl RateGovernor {
    /// Creates a governor with the default sweep threshold.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sweep_threshold(DEFAULT_SWEEP_THRESHOLD)
    }

    /// Creates a governor that sweeps once more than `threshold` identities are tracked.
    #[must_use]
    pub fn with_sweep_threshold(threshold: usize) -> Self {
        Self {
            windows: DashMap::new(),
            sweep_threshold: threshold,
        }
    }

    /// Checks and counts one request for `identity`.
    pub fn check_limit(&self, identity: &str, policy: &RateLimitPolicy) -> RateLimitDecision {
        self.check_limit_at(identity, policy, Instant::now())
    }

    /// Like [`check_limit`](Self::check_limit) with an explicit clock reading.
    pub fn check_limit_at(
        &self,
        identity: &str,
        policy: &RateLimitPolicy,
        now: Instant,
    ) -> RateLimitDecision {
        if self.windows.len() > self.sweep_threshold {
            self.sweep(now);
        }

        let mut window = self.windows.entry(identity.to_string()).or_insert(Window {
            count: 0,
            reset_at: now + policy.window(),
        });

        if now >= window.reset_at {
            window.count = 0;
            window.reset_at = now + policy.window();
        }

        let reset_in_ms = duration_ms(window.reset_at.saturating_duration_since(now));

        if window.count >= policy.max_requests {
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_in_ms,
            };
        }

        window.count += 1;
        RateLimitDecision {
            allowed: true,
            remaining: policy.max_requests - window.count,
            reset_in_ms,
        }
    }

    /// Admits a run for `identity` or returns [`GenflowError::RateLimited`].
    pub fn admit_run(&self, identity: &str, policy: &RateLimitPolicy) -> Result<RateLimitDecision> {
        let decision = self.check_limit(identity, policy);
        if !decision.allowed {
            tracing::warn!(
                identity,
                reset_in_ms = decision.reset_in_ms,
                max_requests = policy.max_requests,
                "Rate limit exceeded"
            );
        }
        decision.into_result()
    }

    /// Drops every expired window.
    pub fn sweep(&self, now: Instant) {
        let before = self.windows.len();
        self.windows.retain(|_, window| window.reset_at > now);
        let swept = before.saturating_sub(self.windows.len());
        if swept > 0 {
            tracing::debug!(swept, remaining = self.windows.len(), "Swept expired rate windows");
        }
    }

    /// Returns the number of tracked identities.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sixth_call_in_window_denied() {
        let governor = RateGovernor::new();
        let policy = RateLimitPolicy::new(5, 60_000);
        let t0 = Instant::now();

        for expected_remaining in (0..5).rev() {
            let d = governor.check_limit_at("alice", &policy, t0);
            assert!(d.allowed);
            assert_eq!(d.remaining, expected_remaining);
        }

        let denied = governor.check_limit_at("alice", &policy, t0 + Duration::from_secs(10));
        assert_eq!(
            denied,
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_in_ms: 50_000,
            }
        );
    }

    #[test]
    fn test_fresh_window_after_reset() {
        let governor = RateGovernor::new();
        let policy = RateLimitPolicy::new(5, 60_000);
        let t0 = Instant::now();

        for _ in 0..6 {
            governor.check_limit_at("alice", &policy, t0);
        }
        let later = governor.check_limit_at("alice", &policy, t0 + Duration::from_millis(60_000));
        assert!(later.allowed);
        assert_eq!(later.remaining, 4);
        assert_eq!(later.reset_in_ms, 60_000);
    }

    #[test]
    fn test_identities_are_independent() {
        let governor = RateGovernor::new();
        let policy = RateLimitPolicy::new(1, 1_000);
        let t0 = Instant::now();

        assert!(governor.check_limit_at("a", &policy, t0).allowed);
        assert!(!governor.check_limit_at("a", &policy, t0).allowed);
        assert!(governor.check_limit_at("b", &policy, t0).allowed);
    }

    #[test]
    fn test_zero_budget_always_denies() {
        let governor = RateGovernor::new();
        let d = governor.check_limit("x", &RateLimitPolicy::new(0, 1_000));
        assert!(!d.allowed);
    }

    #[test]
    fn test_sweep_past_threshold() {
        let governor = RateGovernor::with_sweep_threshold(2);
        let policy = RateLimitPolicy::new(5, 100);
        let t0 = Instant::now();

        governor.check_limit_at("a", &policy, t0);
        governor.check_limit_at("b", &policy, t0);
        governor.check_limit_at("c", &policy, t0);
        assert_eq!(governor.tracked(), 3);

        governor.check_limit_at("d", &policy, t0 + Duration::from_millis(200));
        assert_eq!(governor.tracked(), 1);
    }

    #[test]
    fn test_admit_run_rejection_is_rate_limited_error() {
        let governor = RateGovernor::new();
        let policy = RateLimitPolicy::new(1, 60_000);

        assert!(governor.admit_run("a", &policy).is_ok());
        match governor.admit_run("a", &policy) {
            Err(GenflowError::RateLimited { remaining, reset_in_ms }) => {
                assert_eq!(remaining, 0);
                assert!(reset_in_ms <= 60_000);
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
    }
}
