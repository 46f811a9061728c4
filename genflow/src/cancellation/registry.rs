//! Process-wide registry of running pipeline runs.
//!
//! An entry exists exactly while a run is `running`: it is inserted when the
//! run starts and removed when the run reaches a terminal state. The only
//! other writer is an out-of-band cancel request, which fires the entry's
//! token. Runs never share entries, so per-key atomicity is all we need.

use super::CancellationToken;
use crate::errors::{GenflowError, Result};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct RunEntry {
    token: Arc<CancellationToken>,
    active_stage: AtomicU8,
    started_at: DateTime<Utc>,
}

/// A point-in-time view of one registered run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    /// The run id.
    pub run_id: String,
    /// Stage currently executing, 0 before the first stage starts.
    pub active_stage: u8,
    /// Whether cancellation has been requested.
    pub cancel_requested: bool,
    /// When the run was registered.
    pub started_at: DateTime<Utc>,
}

/// Concurrency-safe map from run id to cancellation handle and progress.
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: DashMap<String, RunEntry>,
}

impl RunRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a run and returns its cancellation token.
    pub fn start(&self, run_id: &str) -> Result<Arc<CancellationToken>> {
        match self.runs.entry(run_id.to_string()) {
            Entry::Occupied(_) => Err(GenflowError::DuplicateRun(run_id.to_string())),
            Entry::Vacant(slot) => {
                let token = Arc::new(CancellationToken::new());
                slot.insert(RunEntry {
                    token: token.clone(),
                    active_stage: AtomicU8::new(0),
                    started_at: Utc::now(),
                });
                tracing::debug!(run_id, "Run registered");
                Ok(token)
            }
        }
    }

    /// Requests cancellation of a running run.
    ///
    /// Unknown or already-finished runs are ignored; returns whether a
    /// registered run was found.
    pub fn request_cancel(&self, run_id: &str, reason: &str) -> bool {
        match self.runs.get(run_id) {
            Some(entry) => {
                if entry.token.cancel(reason) {
                    tracing::info!(run_id, reason, "Cancellation requested");
                }
                true
            }
            None => {
                tracing::debug!(run_id, "Cancel ignored for unknown or finished run");
                false
            }
        }
    }

    /// Returns true if the run is registered and cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self, run_id: &str) -> bool {
        self.runs
            .get(run_id)
            .is_some_and(|entry| entry.token.is_cancelled())
    }

    /// Records which stage the run is executing.
    pub fn set_active_stage(&self, run_id: &str, stage: u8) {
        if let Some(entry) = self.runs.get(run_id) {
            entry.active_stage.store(stage, Ordering::SeqCst);
        }
    }

    /// Returns the active stage of a running run.
    #[must_use]
    pub fn active_stage(&self, run_id: &str) -> Option<u8> {
        self.runs
            .get(run_id)
            .map(|entry| entry.active_stage.load(Ordering::SeqCst))
    }

    /// Returns a snapshot of a running run.
    #[must_use]
    pub fn snapshot(&self, run_id: &str) -> Option<RunSnapshot> {
        self.runs.get(run_id).map(|entry| RunSnapshot {
            run_id: run_id.to_string(),
            active_stage: entry.active_stage.load(Ordering::SeqCst),
            cancel_requested: entry.token.is_cancelled(),
            started_at: entry.started_at,
        })
    }

    /// Removes a run on reaching a terminal state.
    pub fn complete(&self, run_id: &str) -> bool {
        let removed = self.runs.remove(run_id).is_some();
        if removed {
            tracing::debug!(run_id, "Run deregistered");
        }
        removed
    }

    /// Returns true if the run is registered.
    #[must_use]
    pub fn is_running(&self, run_id: &str) -> bool {
        self.runs.contains_key(run_id)
    }

    /// Returns the ids of all running runs.
    #[must_use]
    pub fn running_ids(&self) -> Vec<String> {
        self.runs.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Returns the number of running runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Returns true if no runs are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
