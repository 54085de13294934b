//! Worker pool launching and status.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use suiterun_core::{JobName, RunId};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::DispatchError;

/// Request to start the workers of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolRequest {
    /// Queue to drain and label of every member.
    pub job_name: JobName,
    pub run_id: RunId,
    /// Number of workers.
    pub parallelism: u32,
    /// Worker image, when the pool runs containers.
    pub image: Option<String>,
    pub live: bool,
}

/// Lifecycle phase of a pool member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// One worker of a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolMember {
    /// Member name; workers report it as the pod part of their agent.
    pub name: String,
    pub phase: MemberPhase,
}

impl PoolMember {
    pub fn new(name: impl Into<String>, phase: MemberPhase) -> Self {
        Self {
            name: name.into(),
            phase,
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == MemberPhase::Running
    }
}

/// Starts worker pools. Acceptance of the request is all that is awaited.
#[async_trait]
pub trait PoolLauncher: Send + Sync {
    async fn launch(&self, request: &PoolRequest) -> Result<(), DispatchError>;
}

/// Lists the members correlated to a job.
#[async_trait]
pub trait PoolStatus: Send + Sync {
    async fn members(&self, job_name: &JobName) -> Result<Vec<PoolMember>, DispatchError>;
}

/// Pool of worker processes on the local machine.
///
/// Member `i` of job `J` is named `J-i` and receives it as
/// `SUITERUN_POD_NAME`, next to `SUITERUN_JOB_NAME`.
pub struct LocalPool {
    program: PathBuf,
    args: Vec<OsString>,
    members: Mutex<HashMap<JobName, Vec<(String, Child)>>>,
}

impl LocalPool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            members: Mutex::new(HashMap::new()),
        }
    }

    /// Builder method to pass arguments to every worker.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl PoolLauncher for LocalPool {
    async fn launch(&self, request: &PoolRequest) -> Result<(), DispatchError> {
        if request.parallelism == 0 {
            return Err(DispatchError::PoolRejected(
                "parallelism must be at least 1".to_string(),
            ));
        }

        let mut members = self.members.lock().await;
        if members.contains_key(&request.job_name) {
            return Err(DispatchError::PoolRejected(format!(
                "a pool for {} already exists",
                request.job_name
            )));
        }

        let job = request.job_name.to_string();
        let mut spawned = Vec::with_capacity(request.parallelism as usize);
        for index in 0..request.parallelism {
            let name = format!("{}-{}", job, index);

            let mut cmd = Command::new(&self.program);
            cmd.args(&self.args)
                .env("SUITERUN_JOB_NAME", &job)
                .env("SUITERUN_POD_NAME", &name)
                .env("SUITERUN_RUN_ID", request.run_id.to_string())
                .env("SUITERUN_LIVE_MODE", request.live.to_string())
                .stdin(Stdio::null())
                .kill_on_drop(true);
            if let Some(image) = &request.image {
                cmd.env("SUITERUN_IMAGE_NAME", image);
            }

            match cmd.spawn() {
                Ok(child) => spawned.push((name, child)),
                Err(e) => {
                    // Dropping `spawned` kills the members started so far.
                    return Err(DispatchError::PoolRejected(format!(
                        "failed to start {}: {}",
                        self.program.display(),
                        e
                    )));
                }
            }
        }

        info!(job = %job, parallelism = request.parallelism, "Launched local worker pool");
        members.insert(request.job_name.clone(), spawned);
        Ok(())
    }
}

#[async_trait]
impl PoolStatus for LocalPool {
    async fn members(&self, job_name: &JobName) -> Result<Vec<PoolMember>, DispatchError> {
        let mut members = self.members.lock().await;
        let Some(children) = members.get_mut(job_name) else {
            return Ok(Vec::new());
        };

        let mut listed = Vec::with_capacity(children.len());
        for (name, child) in children.iter_mut() {
            let phase = match child.try_wait() {
                Ok(None) => MemberPhase::Running,
                Ok(Some(status)) if status.success() => MemberPhase::Succeeded,
                Ok(Some(_)) => MemberPhase::Failed,
                Err(e) => {
                    warn!(member = %name, error = %e, "Failed to query worker process");
                    MemberPhase::Unknown
                }
            };
            listed.push(PoolMember::new(name.clone(), phase));
        }
        Ok(listed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(parallelism: u32) -> PoolRequest {
        PoolRequest {
            job_name: JobName::parse("demo-7-abcdefghijkl").unwrap(),
            run_id: RunId::new(7),
            parallelism,
            image: Some("demo:latest".to_string()),
            live: false,
        }
    }

    async fn wait_until_done(pool: &LocalPool, job: &JobName) -> Vec<PoolMember> {
        for _ in 0..100 {
            let members = pool.members(job).await.unwrap();
            if members.iter().all(|m| !m.is_running()) {
                return members;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("pool did not finish");
    }

    #[tokio::test]
    async fn test_local_pool_members() {
        let pool = LocalPool::new("/bin/sh").with_args([
            "-c",
            r#"test "$SUITERUN_JOB_NAME" = demo-7-abcdefghijkl && test "$SUITERUN_IMAGE_NAME" = demo:latest"#,
        ]);
        let req = request(3);
        pool.launch(&req).await.unwrap();

        let members = wait_until_done(&pool, &req.job_name).await;
        assert_eq!(members.len(), 3);
        assert_eq!(members[0].name, "demo-7-abcdefghijkl-0");
        assert!(members.iter().all(|m| m.phase == MemberPhase::Succeeded));
    }

    #[tokio::test]
    async fn test_local_pool_failed_member() {
        let pool = LocalPool::new("/bin/sh").with_args(["-c", "exit 1"]);
        let req = request(1);
        pool.launch(&req).await.unwrap();

        let members = wait_until_done(&pool, &req.job_name).await;
        assert_eq!(members[0].phase, MemberPhase::Failed);
    }

    #[tokio::test]
    async fn test_local_pool_running_member() {
        let pool = LocalPool::new("/bin/sh").with_args(["-c", "sleep 5"]);
        let req = request(1);
        pool.launch(&req).await.unwrap();

        let members = pool.members(&req.job_name).await.unwrap();
        assert!(members[0].is_running());
    }

    #[tokio::test]
    async fn test_local_pool_rejections() {
        let pool = LocalPool::new("/nonexistent/worker");
        assert!(matches!(
            pool.launch(&request(2)).await,
            Err(DispatchError::PoolRejected(_))
        ));

        let pool = LocalPool::new("/bin/sh").with_args(["-c", "true"]);
        assert!(matches!(
            pool.launch(&request(0)).await,
            Err(DispatchError::PoolRejected(_))
        ));

        pool.launch(&request(1)).await.unwrap();
        assert!(matches!(
            pool.launch(&request(1)).await,
            Err(DispatchError::PoolRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_job_has_no_members() {
        let pool = LocalPool::new("/bin/sh").with_args(["-c", "true"]);
        let job = JobName::parse("demo-1-x").unwrap();
        assert!(pool.members(&job).await.unwrap().is_empty());
    }
}
