//! The worker loop: fetch, execute, commit, ack.

use std::sync::Arc;

use chrono::Utc;
use suiterun_broker::{Delivery, TaskBroker};
use suiterun_core::{keys, JobName, TaskResult, TaskSetting, WorkerName};
use suiterun_store::{ResultStore, SecretStore};
use tracing::{error, info, warn};

use crate::artifacts::{render_template, task_record_path, ArtifactStore};
use crate::executor::CommandRunner;
use crate::hooks::{AfterTaskHook, NoopHook};
use crate::WorkerError;

/// Secret key holding the log URL template of a product.
pub const LOG_PATH_TEMPLATE_KEY: &str = "log.path.template";

/// Result detail holding the RFC 3339 time the task finished.
pub const FINISHED_AT_KEY: &str = "finished_at";

/// What a worker did before the queue ran dry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Deliveries handled, including malformed ones.
    pub deliveries: usize,
    /// Deliveries whose payload could not be decoded.
    pub malformed: usize,
    /// Results the store accepted.
    pub committed: usize,
    /// Results the store refused or could not be reached for.
    pub commit_failures: usize,
    /// Deliveries whose ack failed.
    pub ack_failures: usize,
}

/// Drains one run's queue.
pub struct WorkerLoop {
    broker: Arc<TaskBroker>,
    results: Arc<dyn ResultStore>,
    job_name: JobName,
    worker: WorkerName,
    runner: CommandRunner,
    artifacts: ArtifactStore,
    hook: Arc<dyn AfterTaskHook>,
    log_path_template: Option<String>,
}

impl WorkerLoop {
    pub fn new(
        broker: Arc<TaskBroker>,
        results: Arc<dyn ResultStore>,
        job_name: JobName,
        worker: WorkerName,
    ) -> Self {
        Self {
            broker,
            results,
            job_name,
            worker,
            runner: CommandRunner::default(),
            artifacts: ArtifactStore::new(crate::config::DEFAULT_ARTIFACT_ROOT),
            hook: Arc::new(NoopHook),
            log_path_template: None,
        }
    }

    /// Builder method to set the command runner.
    pub fn with_runner(mut self, runner: CommandRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Builder method to set the artifact directory.
    pub fn with_artifacts(mut self, artifacts: ArtifactStore) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Builder method to set the after-task hook.
    pub fn with_hook(mut self, hook: Arc<dyn AfterTaskHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Builder method to set the log path template.
    pub fn with_log_path_template(mut self, template: Option<String>) -> Self {
        self.log_path_template = template.filter(|t| !t.is_empty());
        self
    }

    /// Process deliveries until the queue is empty.
    pub async fn run(&self) -> Result<DrainSummary, WorkerError> {
        let queue = self.job_name.to_string();
        let info = self.broker.queue_declare(&queue).await?;
        info!(
            queue = %queue,
            worker = %self.worker,
            messages = info.messages,
            "Worker started"
        );

        let mut summary = DrainSummary::default();
        while let Some(delivery) = self.broker.fetch(&queue).await? {
            self.handle(delivery, &mut summary).await;
        }

        info!(
            queue = %queue,
            deliveries = summary.deliveries,
            committed = summary.committed,
            "No more tasks in the queue"
        );
        Ok(summary)
    }

    async fn handle(&self, delivery: Delivery, summary: &mut DrainSummary) {
        summary.deliveries += 1;
        let run_id = self.job_name.run_id();

        // A payload that parses but cannot run still names its task.
        let (setting, problem) = match TaskSetting::parse(&delivery.payload) {
            Ok(setting) => {
                let problem = setting.validate().err();
                (setting, problem)
            }
            Err(e) => (TaskSetting::default(), Some(e)),
        };

        let (mut result, output) = match problem {
            None => {
                info!(task = %setting.identifier(), "Running task");
                let command = setting.command().unwrap_or_default();
                let outcome = self.runner.run(command).await;
                info!(
                    task = %setting.identifier(),
                    result = ?outcome.result,
                    duration_secs = outcome.duration_secs(),
                    "Task finished"
                );

                let result = TaskResult::completed(
                    &setting,
                    outcome.result,
                    outcome.duration_secs(),
                    &self.worker,
                    run_id,
                );
                (result, outcome.output)
            }
            Some(e) => {
                let message = format!("failed to decode the delivery: {}", e);
                error!(
                    delivery_tag = delivery.delivery_tag,
                    task = %setting.identifier(),
                    error = %e,
                    "Malformed task"
                );
                summary.malformed += 1;

                let result = TaskResult::errored(&setting, &self.worker, run_id, message);
                (result, Vec::new())
            }
        };

        result.set_detail(FINISHED_AT_KEY, Utc::now().to_rfc3339());

        match self.results.commit_new(&result).await {
            Ok(committed) => {
                summary.committed += 1;
                self.after_commit(committed, &output).await;
            }
            Err(e) => {
                summary.commit_failures += 1;
                error!(error = %e, task = %result.name, "Failed to commit a new task result");
            }
        }

        match self.broker.ack(delivery.delivery_tag).await {
            Ok(()) => info!(delivery_tag = delivery.delivery_tag, "ACK"),
            Err(e) => {
                summary.ack_failures += 1;
                error!(delivery_tag = delivery.delivery_tag, error = %e, "Failed to ack delivery");
            }
        }
    }

    async fn after_commit(&self, mut result: TaskResult, output: &[u8]) {
        let Some(task_id) = result.id else {
            warn!(task = %result.name, "Store returned a result without an id");
            return;
        };

        let log_path = match self
            .artifacts
            .save_task_log(result.run_id, task_id, output)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                error!(task_id, error = %e, "Failed to save task log");
                None
            }
        };

        if let Err(e) = self.hook.after_task(self.artifacts.root(), &result).await {
            error!(task_id, error = %e, "After-task hook failed");
        }

        let Some(template) = &self.log_path_template else {
            return;
        };

        if let Some(log_path) = &log_path {
            result.set_detail(keys::TASK_LOG_PATH, render_template(template, log_path));
        }
        result.set_detail(
            keys::TASK_RECORD_PATH,
            render_template(template, &task_record_path(result.run_id, task_id)),
        );

        if let Err(e) = self.results.commit_changes(&result).await {
            error!(task_id, error = %e, "Failed to patch task result");
        }
    }
}

/// Read the product's log path template. Lookup failures are logged and
/// treated as no template.
pub async fn load_log_path_template(secrets: &dyn SecretStore, product: &str) -> Option<String> {
    match secrets.get_string(product, LOG_PATH_TEMPLATE_KEY).await {
        Ok(template) => template.filter(|t| !t.is_empty()),
        Err(e) => {
            warn!(product = %product, error = %e, "Failed to read log path template");
            None
        }
    }
}
