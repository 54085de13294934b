//! Task log persistence on the shared artifact mount.

use std::io::Write;
use std::path::{Path, PathBuf};

use suiterun_core::RunId;
use tracing::{debug, info};

/// Location of a task's log, relative to the artifact root.
pub fn task_log_path(run_id: RunId, task_id: u64) -> String {
    format!("{}/task_{}.log", run_id, task_id)
}

/// Location of a task's recording, relative to the artifact root.
pub fn task_record_path(run_id: RunId, task_id: u64) -> String {
    format!("{}/recording_{}.yaml", run_id, task_id)
}

/// Substitute the first `{}` of a path template.
pub fn render_template(template: &str, path: &str) -> String {
    template.replacen("{}", path, 1)
}

/// Artifact directory shared by all workers of a run.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the artifact root is mounted.
    pub async fn is_mounted(&self) -> bool {
        tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Save a task's output and return its relative path.
    ///
    /// Without a mounted root the output goes to stdout and `None` is
    /// returned.
    pub async fn save_task_log(
        &self,
        run_id: RunId,
        task_id: u64,
        output: &[u8],
    ) -> std::io::Result<Option<String>> {
        if !self.is_mounted().await {
            debug!(root = %self.root.display(), "Artifact root not mounted, printing output");
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(output)?;
            stdout.flush()?;
            return Ok(None);
        }

        let relative = task_log_path(run_id, task_id);
        let path = self.root.join(&relative);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&path, output).await?;

        info!(path = %path.display(), bytes = output.len(), "Saved task log");
        Ok(Some(relative))
    }
}
