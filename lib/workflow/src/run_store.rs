//! Run record persistence.
//!
//! The file-backed store writes one `<run_id>.json` document per run; the
//! in-memory store backs tests and single-process deployments.

use crate::error::RunStoreError;
use crate::record::RunRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use switchyard_core::WorkflowId;

/// Filter for [`RunStore::list`].
#[derive(Debug, Clone, Default)]
pub struct RunQuery {
    /// Only records for this workflow.
    pub workflow_id: Option<WorkflowId>,
    /// At most this many records.
    pub limit: Option<usize>,
}

/// Storage interface for run records.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persists a record, replacing any previous record for the same run.
    async fn save(&self, record: &RunRecord) -> Result<(), RunStoreError>;

    /// Loads the record for a run id (prefixed string form), if present.
    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>, RunStoreError>;

    /// Lists records matching the query, oldest first.
    async fn list(&self, query: RunQuery) -> Result<Vec<RunRecord>, RunStoreError> {
        let _ = query;
        Ok(Vec::new())
    }
}

/// In-memory run store.
#[derive(Default)]
pub struct InMemoryRunStore {
    records: Mutex<HashMap<String, RunRecord>>,
}

impl InMemoryRunStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn save(&self, record: &RunRecord) -> Result<(), RunStoreError> {
        let mut records = self.records.lock().expect("run store lock poisoned");
        records.insert(record.run_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>, RunStoreError> {
        let records = self.records.lock().expect("run store lock poisoned");
        Ok(records.get(run_id).cloned())
    }

    async fn list(&self, query: RunQuery) -> Result<Vec<RunRecord>, RunStoreError> {
        let records = self.records.lock().expect("run store lock poisoned");
        let workflow_id = query.workflow_id.map(|id| id.to_string());
        let mut matched: Vec<RunRecord> = records
            .values()
            .filter(|record| {
                workflow_id
                    .as_ref()
                    .is_none_or(|id| record.workflow_id == *id)
            })
            .cloned()
            .collect();
        // Run ids are ULIDs, so lexicographic order is creation order.
        matched.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}

/// File-backed run store: one pretty-printed JSON document per run.
pub struct FileRunStore {
    directory: PathBuf,
}

impl FileRunStore {
    /// Opens the store, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`RunStoreError::Storage`] when the directory cannot be
    /// created.
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self, RunStoreError> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|e| RunStoreError::Storage {
                message: e.to_string(),
            })?;
        Ok(Self { directory })
    }

    fn record_path(&self, run_id: &str) -> PathBuf {
        self.directory.join(format!("{run_id}.json"))
    }

    async fn read_record(path: &Path) -> Result<RunRecord, RunStoreError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| RunStoreError::Storage {
                message: e.to_string(),
            })?;
        serde_json::from_slice(&bytes).map_err(|e| RunStoreError::Serialization {
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn save(&self, record: &RunRecord) -> Result<(), RunStoreError> {
        let bytes =
            serde_json::to_vec_pretty(record).map_err(|e| RunStoreError::Serialization {
                message: e.to_string(),
            })?;
        tokio::fs::write(self.record_path(&record.run_id), bytes)
            .await
            .map_err(|e| RunStoreError::Storage {
                message: e.to_string(),
            })
    }

    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>, RunStoreError> {
        let path = self.record_path(run_id);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Self::read_record(&path).await.map(Some),
            Ok(false) => Ok(None),
            Err(e) => Err(RunStoreError::Storage {
                message: e.to_string(),
            }),
        }
    }

    async fn list(&self, query: RunQuery) -> Result<Vec<RunRecord>, RunStoreError> {
        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(|e| RunStoreError::Storage {
                message: e.to_string(),
            })?;

        let workflow_id = query.workflow_id.map(|id| id.to_string());
        let mut matched = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RunStoreError::Storage {
                message: e.to_string(),
            })?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let record = Self::read_record(&path).await?;
            if workflow_id
                .as_ref()
                .is_none_or(|id| record.workflow_id == *id)
            {
                matched.push(record);
            }
        }

        matched.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{RunStatus, WorkflowRunResult};
    use crate::to_run_record;
    use chrono::Utc;
    use switchyard_core::RunId;

    fn record_for(workflow_id: WorkflowId) -> RunRecord {
        let result = WorkflowRunResult {
            run_id: RunId::new(),
            workflow_id,
            status: RunStatus::Succeeded,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_ms: 5,
            results: HashMap::new(),
            errors: HashMap::new(),
            attempts: HashMap::new(),
            timeline: Vec::new(),
            conversation_id: None,
            memory: None,
        };
        to_run_record(&result)
    }

    #[tokio::test]
    async fn in_memory_save_and_get() {
        let store = InMemoryRunStore::new();
        let record = record_for(WorkflowId::new());

        store.save(&record).await.unwrap();
        let loaded = store.get(&record.run_id).await.unwrap();
        assert_eq!(loaded, Some(record));
        assert_eq!(store.get("run_missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn in_memory_list_filters_and_limits() {
        let store = InMemoryRunStore::new();
        let target = WorkflowId::new();
        let other = WorkflowId::new();

        for _ in 0..3 {
            store.save(&record_for(target)).await.unwrap();
        }
        store.save(&record_for(other)).await.unwrap();

        let all = store.list(RunQuery::default()).await.unwrap();
        assert_eq!(all.len(), 4);

        let filtered = store
            .list(RunQuery {
                workflow_id: Some(target),
                limit: Some(2),
            })
            .await
            .unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(
            filtered
                .iter()
                .all(|record| record.workflow_id == target.to_string())
        );
    }

    #[tokio::test]
    async fn file_store_writes_one_json_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).await.unwrap();
        let record = record_for(WorkflowId::new());

        store.save(&record).await.unwrap();

        let path = dir.path().join(format!("{}.json", record.run_id));
        assert!(path.exists());

        let loaded = store.get(&record.run_id).await.unwrap();
        assert_eq!(loaded, Some(record));
    }

    #[tokio::test]
    async fn file_store_get_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).await.unwrap();
        assert_eq!(store.get("run_nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_list_filters_by_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).await.unwrap();
        let target = WorkflowId::new();

        store.save(&record_for(target)).await.unwrap();
        store.save(&record_for(WorkflowId::new())).await.unwrap();

        let matched = store
            .list(RunQuery {
                workflow_id: Some(target),
                limit: None,
            })
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].workflow_id, target.to_string());
    }
}
