//! The run lifecycle: Initialized → Published → Running → Completed.

use suiterun_core::{keys, JobName, Run, RunId, RunSettings, RunStatus};
use tracing::{debug, info, warn};

use crate::config::CompletionMode;
use crate::discovery;
use crate::monitor::Monitor;
use crate::pool::PoolRequest;
use crate::report::{self, ReportConfig};
use crate::{Context, DispatchError};

/// Drives one run to completion.
///
/// Every step starts from the status persisted by the previous one, so a
/// dispatcher restarted on the same run only performs the remaining steps.
pub struct RunStateMachine {
    ctx: Context,
    monitor: Monitor,
}

impl RunStateMachine {
    pub fn new(ctx: Context) -> Self {
        let monitor = Monitor::new(ctx.broker.clone(), ctx.pool.clone())
            .with_poll_interval(ctx.poll_interval);
        Self { ctx, monitor }
    }

    /// Run every remaining transition and return the completed run.
    pub async fn drive(&self, run_id: RunId) -> Result<Run, DispatchError> {
        let mut run = self.ctx.runs.get_run(run_id).await?;
        info!(run_id = %run.id, name = %run.name, status = run.status.as_str(), "Found run");
        for (key, value) in &run.details {
            debug!(run_id = %run.id, key = %key, value = %value, "Run detail");
        }

        let settings = run.typed_settings()?;

        loop {
            run = match run.status {
                RunStatus::Initialized => self.publish(run, &settings).await?,
                RunStatus::Published => self.launch(run, &settings).await?,
                RunStatus::Running => self.complete(run, &settings).await?,
                RunStatus::Completed => {
                    info!(run_id = %run.id, "Run is completed");
                    return Ok(run);
                }
            };
        }
    }

    async fn publish(&self, mut run: Run, settings: &RunSettings) -> Result<Run, DispatchError> {
        info!(run_id = %run.id, product = %self.ctx.product, "Updating run product");
        run.details
            .insert(keys::PRODUCT.to_string(), self.ctx.product.clone());
        let mut run = self.ctx.runs.submit_change(&run).await?;

        let job_name = JobName::generate(&self.ctx.product, run.id)?;
        let tasks = discovery::select(settings, self.ctx.index.discover().await?);

        let queue = job_name.to_string();
        let published = self.ctx.broker.publish(&queue, &tasks).await?;
        info!(run_id = %run.id, queue = %queue, published, selected = tasks.len(), "Published tasks");

        run.details.insert(keys::JOB_NAME.to_string(), queue);
        self.commit(run, RunStatus::Published).await
    }

    async fn launch(&self, run: Run, settings: &RunSettings) -> Result<Run, DispatchError> {
        let request = PoolRequest {
            job_name: job_name(&run)?,
            run_id: run.id,
            parallelism: settings.parallelism,
            image: settings.image_name.clone(),
            live: settings.live_mode,
        };

        self.ctx.launcher.launch(&request).await?;
        info!(
            run_id = %run.id,
            job = %request.job_name,
            parallelism = request.parallelism,
            "Worker pool requested"
        );

        self.commit(run, RunStatus::Running).await
    }

    async fn complete(&self, run: Run, settings: &RunSettings) -> Result<Run, DispatchError> {
        let job_name = job_name(&run)?;

        match self.ctx.completion {
            CompletionMode::Queue => self.monitor.wait_for_completion(&job_name).await,
            CompletionMode::Tracked => {
                self.monitor
                    .wait_for_tracked_completion(run.id, &job_name, self.ctx.tasks.as_ref())
                    .await;
            }
        }

        self.report(&run, settings).await;
        self.commit(run, RunStatus::Completed).await
    }

    async fn report(&self, run: &Run, settings: &RunSettings) {
        let product = run.product().unwrap_or(&self.ctx.product);
        let secret = settings.secret_name(product);
        let config = ReportConfig::load(self.ctx.secrets.as_ref(), secret).await;

        let recipients = report::recipients(settings, &config.owners);
        if recipients.is_empty() {
            info!(run_id = %run.id, "No recipients, skip sending report");
            return;
        }

        if let Err(e) = self
            .ctx
            .reporter
            .report(run, &recipients, config.template.as_deref())
            .await
        {
            warn!(run_id = %run.id, error = %e, "Failed to send report");
        }
    }

    async fn commit(&self, mut run: Run, status: RunStatus) -> Result<Run, DispatchError> {
        run.status = run.status.advance_to(status)?;
        let run = self.ctx.runs.submit_change(&run).await?;
        info!(run_id = %run.id, status = run.status.as_str(), "Run status updated");
        Ok(run)
    }
}

fn job_name(run: &Run) -> Result<JobName, DispatchError> {
    run.job_name()
        .ok_or(DispatchError::MissingJobName(run.id))?
        .map_err(DispatchError::from)
}
