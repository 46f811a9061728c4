//! Execution modes and their provider priority orders.

use crate::errors::GenflowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A caller-selected trade-off between latency and output quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Lowest latency first.
    Fast,
    /// The default trade-off.
    Balanced,
    /// Strongest models first.
    Quality,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Balanced
    }
}

impl ExecutionMode {
    /// All modes, in declaration order.
    pub const ALL: [Self; 3] = [Self::Fast, Self::Balanced, Self::Quality];

    /// Returns the wire name of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::Quality => "quality",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = GenflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "balanced" => Ok(Self::Balanced),
            "quality" => Ok(Self::Quality),
            other => Err(GenflowError::Config(format!("unknown execution mode '{other}'"))),
        }
    }
}

/// Fixed mapping from mode to an ordered list of provider names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeTable {
    /// Priority order for [`ExecutionMode::Fast`].
    #[serde(default = "default_fast")]
    pub fast: Vec<String>,
    /// Priority order for [`ExecutionMode::Balanced`].
    #[serde(default = "default_balanced")]
    pub balanced: Vec<String>,
    /// Priority order for [`ExecutionMode::Quality`].
    #[serde(default = "default_quality")]
    pub quality: Vec<String>,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

fn default_fast() -> Vec<String> {
    names(&["groq", "openai", "anthropic"])
}

fn default_balanced() -> Vec<String> {
    names(&["openai", "anthropic", "groq"])
}

fn default_quality() -> Vec<String> {
    names(&["anthropic", "openai", "groq"])
}

impl Default for ModeTable {
    fn default() -> Self {
        Self {
            fast: default_fast(),
            balanced: default_balanced(),
            quality: default_quality(),
        }
    }
}

impl ModeTable {
    /// Returns the priority order for a mode.
    #[must_use]
    pub fn order(&self, mode: ExecutionMode) -> &[String] {
        match mode {
            ExecutionMode::Fast => &self.fast,
            ExecutionMode::Balanced => &self.balanced,
            ExecutionMode::Quality => &self.quality,
        }
    }

    /// Replaces the priority order for a mode.
    #[must_use]
    pub fn with_order(mut self, mode: ExecutionMode, order: Vec<String>) -> Self {
        match mode {
            ExecutionMode::Fast => self.fast = order,
            ExecutionMode::Balanced => self.balanced = order,
            ExecutionMode::Quality => self.quality = order,
        }
        self
    }

    /// Returns the first mode with an empty order, if any.
    #[must_use]
    pub fn first_empty(&self) -> Option<ExecutionMode> {
        ExecutionMode::ALL
            .into_iter()
            .find(|mode| self.order(*mode).is_empty())
    }
}
