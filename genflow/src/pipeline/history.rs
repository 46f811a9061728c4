//! Run history collaborator.

use crate::core::RunRecord;
use crate::errors::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Durable storage for finished runs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Stores a terminal run record.
    async fn save(&self, record: &RunRecord) -> Result<()>;

    /// Fetches a record by run id.
    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>>;
}

/// Process-local history, mostly for tests and single-binary deployments.
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    records: RwLock<HashMap<String, RunRecord>>,
}

impl InMemoryHistoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Returns all records, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<RunRecord> {
        let mut records: Vec<_> = self.records.read().values().cloned().collect();
        records.sort_by_key(RunRecord::started_at);
        records
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn save(&self, record: &RunRecord) -> Result<()> {
        self.records
            .write()
            .insert(record.run_id().to_string(), record.clone());
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>> {
        Ok(self.records.read().get(run_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunStatus;

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let store = InMemoryHistoryStore::new();
        let mut record = RunRecord::new("r1");
        record.finish(RunStatus::Completed, 5).unwrap();

        store.save(&record).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("r1").await.unwrap(), Some(record));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_overwrites_same_id() {
        let store = InMemoryHistoryStore::new();
        store.save(&RunRecord::new("r1")).await.unwrap();
        store.save(&RunRecord::new("r1")).await.unwrap();
        assert_eq!(store.list().len(), 1);
    }
}
