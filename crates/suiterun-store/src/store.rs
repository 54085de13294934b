//! Store traits.

use async_trait::async_trait;

use suiterun_core::{Run, RunId, TaskRecord, TaskResult};

use crate::StoreError;

/// Run records. The dispatcher is the only writer of a given run.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Fetch a run.
    async fn get_run(&self, id: RunId) -> Result<Run, StoreError>;

    /// Persist a run and return the stored version.
    async fn submit_change(&self, run: &Run) -> Result<Run, StoreError>;
}

/// Task results. Append-only: results are created once and only patched.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Create a new result record; the returned copy carries its id.
    async fn commit_new(&self, result: &TaskResult) -> Result<TaskResult, StoreError>;

    /// Patch an already committed result.
    async fn commit_changes(&self, result: &TaskResult) -> Result<TaskResult, StoreError>;
}

/// Task records of stores that track checkout state.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All task records of a run.
    async fn list_tasks(&self, run_id: RunId) -> Result<Vec<TaskRecord>, StoreError>;
}
