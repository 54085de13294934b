//! Optional scripts around task execution.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use suiterun_core::TaskResult;
use tracing::info;

use crate::executor::{run_program, ExecutorError};

/// Called after a result is committed, before the delivery is acked.
#[async_trait]
pub trait AfterTaskHook: Send + Sync {
    async fn after_task(
        &self,
        artifact_root: &Path,
        result: &TaskResult,
    ) -> Result<(), ExecutorError>;
}

/// Hook that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

#[async_trait]
impl AfterTaskHook for NoopHook {
    async fn after_task(&self, _: &Path, _: &TaskResult) -> Result<(), ExecutorError> {
        Ok(())
    }
}

/// Runs an executable with the artifact root and the JSON result as
/// arguments. A missing executable is skipped.
#[derive(Debug, Clone)]
pub struct ScriptHook {
    path: PathBuf,
}

impl ScriptHook {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AfterTaskHook for ScriptHook {
    async fn after_task(
        &self,
        artifact_root: &Path,
        result: &TaskResult,
    ) -> Result<(), ExecutorError> {
        if !exists(&self.path).await {
            return Ok(());
        }

        info!(script = %self.path.display(), "Executing after-task script");
        let encoded = serde_json::to_string(result)?;
        let root = artifact_root.to_string_lossy();
        let output = run_program(&self.path, &[&*root, encoded.as_str()]).await?;

        info!(output = %String::from_utf8_lossy(&output).trim_end(), "After-task script finished");
        Ok(())
    }
}

/// Run the preparation script once. Returns `false` when it does not exist.
pub async fn prepare(script: &Path) -> Result<bool, ExecutorError> {
    if !exists(script).await {
        info!(script = %script.display(), "No preparation script, skipping");
        return Ok(false);
    }

    let output = run_program(script, &[]).await?;
    info!(
        script = %script.display(),
        output = %String::from_utf8_lossy(&output).trim_end(),
        "Prepared worker"
    );
    Ok(true)
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
