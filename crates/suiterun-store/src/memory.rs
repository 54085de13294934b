//! In-memory store used by tests and local runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use suiterun_core::{Run, RunId, TaskRecord, TaskResult};

use crate::store::{ResultStore, RunStore, TaskStore};
use crate::StoreError;

#[derive(Default)]
struct MemoryState {
    runs: HashMap<RunId, Run>,
    results: Vec<TaskResult>,
    records: HashMap<RunId, Vec<TaskRecord>>,
    submissions: Vec<Run>,
    patches: usize,
    fail_submissions: bool,
    fail_results: bool,
}

/// Store backed by process memory.
///
/// Rejects status regressions on submit, mirroring the single-writer rule of
/// the real store, and keeps every submitted run so tests can replay the
/// sequence of transitions.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a run.
    pub async fn insert_run(&self, run: Run) {
        self.state.write().await.runs.insert(run.id, run);
    }

    /// Current version of a run.
    pub async fn run(&self, id: RunId) -> Option<Run> {
        self.state.read().await.runs.get(&id).cloned()
    }

    /// Every run version submitted so far, in order.
    pub async fn submissions(&self) -> Vec<Run> {
        self.state.read().await.submissions.clone()
    }

    /// Every committed result, with patches applied.
    pub async fn results(&self) -> Vec<TaskResult> {
        self.state.read().await.results.clone()
    }

    /// Number of successful `commit_changes` calls.
    pub async fn patch_count(&self) -> usize {
        self.state.read().await.patches
    }

    /// Replace the tracked task records of a run.
    pub async fn set_records(&self, run_id: RunId, records: Vec<TaskRecord>) {
        self.state.write().await.records.insert(run_id, records);
    }

    /// Make every subsequent `submit_change` fail.
    pub async fn fail_submissions(&self, fail: bool) {
        self.state.write().await.fail_submissions = fail;
    }

    /// Make every subsequent result commit fail.
    pub async fn fail_results(&self, fail: bool) {
        self.state.write().await.fail_results = fail;
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn get_run(&self, id: RunId) -> Result<Run, StoreError> {
        self.state
            .read()
            .await
            .runs
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("run {}", id)))
    }

    async fn submit_change(&self, run: &Run) -> Result<Run, StoreError> {
        let mut state = self.state.write().await;
        if state.fail_submissions {
            return Err(StoreError::Unavailable("store is down".to_string()));
        }

        let current = state
            .runs
            .get(&run.id)
            .ok_or_else(|| StoreError::NotFound(format!("run {}", run.id)))?;
        if run.status < current.status {
            return Err(StoreError::Rejected(format!(
                "run {} cannot go from {} back to {}",
                run.id,
                current.status.as_str(),
                run.status.as_str()
            )));
        }

        state.runs.insert(run.id, run.clone());
        state.submissions.push(run.clone());
        Ok(run.clone())
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn commit_new(&self, result: &TaskResult) -> Result<TaskResult, StoreError> {
        let mut state = self.state.write().await;
        if state.fail_results {
            return Err(StoreError::Unavailable("store is down".to_string()));
        }

        let mut stored = result.clone();
        stored.id = Some(state.results.len() as u64 + 1);
        state.results.push(stored.clone());
        Ok(stored)
    }

    async fn commit_changes(&self, result: &TaskResult) -> Result<TaskResult, StoreError> {
        let mut state = self.state.write().await;
        if state.fail_results {
            return Err(StoreError::Unavailable("store is down".to_string()));
        }

        let id = result
            .id
            .ok_or_else(|| StoreError::Rejected("result has no id".to_string()))?;
        let slot = state
            .results
            .iter_mut()
            .find(|r| r.id == Some(id))
            .ok_or_else(|| StoreError::NotFound(format!("task {}", id)))?;
        *slot = result.clone();
        state.patches += 1;
        Ok(result.clone())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn list_tasks(&self, run_id: RunId) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .records
            .get(&run_id)
            .cloned()
            .unwrap_or_default())
    }
}
