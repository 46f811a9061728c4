//! Engine configuration.
//!
//! Every field has a serde default, so a partial JSON document (or none at
//! all) yields a usable config. `GENFLOW_*` environment variables override a
//! handful of operational knobs.

use crate::dispatch::{ExecutionMode, ModeTable};
use crate::errors::{GenflowError, Result};
use crate::governor::RateLimitPolicy;
use crate::retry::RetryPolicy;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Number of stages in a pipeline run.
pub const STAGE_COUNT: usize = 5;

/// Environment variables read by [`EngineConfig::from_env`].
pub const ENV_KEYS: [&str; 4] = [
    "GENFLOW_PROVIDER_TIMEOUT_MS",
    "GENFLOW_RATE_LIMIT_MAX",
    "GENFLOW_RATE_LIMIT_WINDOW_MS",
    "GENFLOW_DEFAULT_MODE",
];

/// Request dialect spoken by an HTTP backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFlavor {
    /// `/chat/completions` (OpenAI, Groq, OpenRouter, local gateways).
    OpenAiCompatible,
    /// Anthropic messages API.
    Anthropic,
}

/// One HTTP backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Name used in mode tables.
    pub name: String,
    /// Request dialect.
    pub flavor: ProviderFlavor,
    /// Base URL of the API.
    pub base_url: String,
    /// Model identifier sent with each request.
    pub model: String,
    /// Inline API key. Prefer `api_key_env`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl ProviderConfig {
    /// Creates a provider entry that reads its key from `api_key_env`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        flavor: ProviderFlavor,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            flavor,
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            api_key_env: None,
        }
    }

    /// Sets the environment variable holding the key.
    #[must_use]
    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }

    /// Sets an inline key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retry policy applied per provider inside the dispatcher.
    #[serde(default)]
    pub inner_retry: RetryPolicy,
    /// Retry policy wrapped around a whole stage.
    #[serde(default = "RetryPolicy::outer_stage")]
    pub outer_retry: RetryPolicy,
    /// Per-stage timeout budgets in milliseconds.
    #[serde(default = "default_stage_timeouts")]
    pub stage_timeouts_ms: [u64; STAGE_COUNT],
    /// Timeout for a single provider call in milliseconds.
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_ms: u64,
    /// Mode used when a request does not name one.
    #[serde(default)]
    pub default_mode: ExecutionMode,
    /// Mode → provider priority table.
    #[serde(default)]
    pub modes: ModeTable,
    /// Admission policy per caller identity.
    #[serde(default)]
    pub rate_limit: RateLimitPolicy,
    /// USD per 1k tokens, keyed by provider name.
    #[serde(default)]
    pub pricing: HashMap<String, f64>,
    /// USD per 1k tokens for providers missing from `pricing`.
    #[serde(default = "default_price")]
    pub default_price_per_1k: f64,
    /// Whether a failed final stage still completes the run.
    #[serde(default = "default_soft_failure")]
    pub final_stage_soft_failure: bool,
    /// HTTP backends.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

fn default_stage_timeouts() -> [u64; STAGE_COUNT] {
    [60_000, 90_000, 120_000, 120_000, 90_000]
}

fn default_provider_timeout() -> u64 {
    45_000
}

fn default_price() -> f64 {
    0.002
}

fn default_soft_failure() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            inner_retry: RetryPolicy::default(),
            outer_retry: RetryPolicy::outer_stage(),
            stage_timeouts_ms: default_stage_timeouts(),
            provider_timeout_ms: default_provider_timeout(),
            default_mode: ExecutionMode::default(),
            modes: ModeTable::default(),
            rate_limit: RateLimitPolicy::default(),
            pricing: HashMap::new(),
            default_price_per_1k: default_price(),
            final_stage_soft_failure: default_soft_failure(),
            providers: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document and validates it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON config file, then applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = Self::from_json_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        let config = config
            .with_env_overrides(&read_env())
            .context("applying GENFLOW_* overrides")?;
        tracing::info!(path = %path.display(), providers = config.providers.len(), "Loaded engine config");
        Ok(config)
    }

    /// Defaults with `GENFLOW_*` overrides applied.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides(&read_env())
    }

    /// Applies overrides from an environment map.
    pub fn with_env_overrides(mut self, envs: &HashMap<String, String>) -> Result<Self> {
        if let Some(v) = env_value(envs, "GENFLOW_PROVIDER_TIMEOUT_MS") {
            self.provider_timeout_ms = parse_env("GENFLOW_PROVIDER_TIMEOUT_MS", v)?;
        }
        if let Some(v) = env_value(envs, "GENFLOW_RATE_LIMIT_MAX") {
            self.rate_limit.max_requests = parse_env("GENFLOW_RATE_LIMIT_MAX", v)?;
        }
        if let Some(v) = env_value(envs, "GENFLOW_RATE_LIMIT_WINDOW_MS") {
            self.rate_limit.window_ms = parse_env("GENFLOW_RATE_LIMIT_WINDOW_MS", v)?;
        }
        if let Some(v) = env_value(envs, "GENFLOW_DEFAULT_MODE") {
            self.default_mode = v.parse()?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks that policies and budgets are usable.
    pub fn validate(&self) -> Result<()> {
        for (label, policy) in [("inner_retry", &self.inner_retry), ("outer_retry", &self.outer_retry)] {
            if policy.max_attempts == 0 {
                return Err(GenflowError::Config(format!("{label}.max_attempts must be at least 1")));
            }
            if policy.backoff_multiplier < 1.0 {
                return Err(GenflowError::Config(format!("{label}.backoff_multiplier must be >= 1.0")));
            }
        }
        if let Some(stage) = self.stage_timeouts_ms.iter().position(|t| *t == 0) {
            return Err(GenflowError::Config(format!("stage {} timeout must be positive", stage + 1)));
        }
        if self.provider_timeout_ms == 0 {
            return Err(GenflowError::Config("provider_timeout_ms must be positive".to_string()));
        }
        if self.rate_limit.window_ms == 0 {
            return Err(GenflowError::Config("rate_limit.window_ms must be positive".to_string()));
        }
        if let Some(mode) = self.modes.first_empty() {
            return Err(GenflowError::Config(format!("mode '{mode}' has no providers")));
        }
        Ok(())
    }

    /// Timeout budget for a 1-based stage number.
    #[must_use]
    pub fn stage_timeout(&self, stage: u8) -> Duration {
        let index = usize::from(stage.max(1)).min(STAGE_COUNT) - 1;
        Duration::from_millis(self.stage_timeouts_ms[index])
    }

    /// Per-call provider timeout.
    #[must_use]
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    /// Sets the inner retry policy.
    #[must_use]
    pub fn with_inner_retry(mut self, policy: RetryPolicy) -> Self {
        self.inner_retry = policy;
        self
    }

    /// Sets the outer retry policy.
    #[must_use]
    pub fn with_outer_retry(mut self, policy: RetryPolicy) -> Self {
        self.outer_retry = policy;
        self
    }

    /// Sets all stage timeouts.
    #[must_use]
    pub fn with_stage_timeouts_ms(mut self, timeouts: [u64; STAGE_COUNT]) -> Self {
        self.stage_timeouts_ms = timeouts;
        self
    }

    /// Sets the provider call timeout.
    #[must_use]
    pub fn with_provider_timeout_ms(mut self, timeout: u64) -> Self {
        self.provider_timeout_ms = timeout;
        self
    }

    /// Sets the mode table.
    #[must_use]
    pub fn with_modes(mut self, modes: ModeTable) -> Self {
        self.modes = modes;
        self
    }

    /// Sets a provider price.
    #[must_use]
    pub fn with_price(mut self, provider: impl Into<String>, usd_per_1k: f64) -> Self {
        self.pricing.insert(provider.into(), usd_per_1k);
        self
    }

    /// Enables or disables the final-stage soft failure path.
    #[must_use]
    pub fn with_final_stage_soft_failure(mut self, enabled: bool) -> Self {
        self.final_stage_soft_failure = enabled;
        self
    }

    /// Adds an HTTP backend.
    #[must_use]
    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.providers.push(provider);
        self
    }
}

fn read_env() -> HashMap<String, String> {
    ENV_KEYS
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|v| ((*key).to_string(), v)))
        .collect()
}

fn env_value<'a>(envs: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    envs.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| GenflowError::Config(format!("invalid {key}='{value}'")))
}
