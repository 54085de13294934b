//! Test index discovery and filtering.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use suiterun_core::{RunSettings, TaskSetting};
use tokio::process::Command;
use tracing::info;

use crate::DispatchError;

/// Produces the full, unfiltered list of tasks of a product.
#[async_trait]
pub trait TestIndex: Send + Sync {
    async fn discover(&self) -> Result<Vec<TaskSetting>, DispatchError>;
}

/// Runs an index executable that prints a JSON array of task settings.
#[derive(Debug, Clone)]
pub struct ScriptIndex {
    script: PathBuf,
}

impl ScriptIndex {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

#[async_trait]
impl TestIndex for ScriptIndex {
    async fn discover(&self) -> Result<Vec<TaskSetting>, DispatchError> {
        info!(script = %self.script.display(), "Querying test index");

        let output = Command::new(&self.script)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                DispatchError::Discovery(format!("{}: {}", self.script.display(), e))
            })?;

        if !output.status.success() {
            return Err(DispatchError::Discovery(format!(
                "{} exited with {}: {}",
                self.script.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| DispatchError::Discovery(format!("invalid test index: {}", e)))
    }
}

/// A fixed index.
#[derive(Debug, Clone, Default)]
pub struct StaticIndex {
    tasks: Vec<TaskSetting>,
}

impl StaticIndex {
    pub fn new(tasks: Vec<TaskSetting>) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl TestIndex for StaticIndex {
    async fn discover(&self) -> Result<Vec<TaskSetting>, DispatchError> {
        Ok(self.tasks.clone())
    }
}

/// Keep the tasks the include and exclude queries select.
pub fn select(settings: &RunSettings, tasks: Vec<TaskSetting>) -> Vec<TaskSetting> {
    let total = tasks.len();
    let selected: Vec<_> = tasks
        .into_iter()
        .filter(|task| settings.selects(task.identifier()))
        .collect();

    info!(total, selected = selected.len(), "Filtered test index");
    selected
}
