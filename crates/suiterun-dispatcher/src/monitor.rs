//! Completion detection by polling the queue and the worker pool.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use suiterun_broker::TaskBroker;
use suiterun_core::{JobName, RunId, TaskRecord, TrackedStatus};
use suiterun_store::TaskStore;
use tracing::{info, warn};

use crate::pool::{PoolMember, PoolStatus};

/// Default time between two polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Task counts of a store-tracked run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub initialized: usize,
    pub scheduled: usize,
    pub completed: usize,
    pub errored: usize,
    /// Scheduled tasks whose worker stopped running.
    pub lost: Vec<u64>,
    pub finished: bool,
}

/// Classify tracked task records against the pool.
///
/// A scheduled task is lost when the member that checked it out is still
/// listed but no longer running. The run is finished once nothing is
/// waiting and every scheduled task is lost.
pub fn reconcile(records: &[TaskRecord], members: &[PoolMember]) -> Reconciliation {
    let stopped: HashSet<&str> = members
        .iter()
        .filter(|m| !m.is_running())
        .map(|m| m.name.as_str())
        .collect();

    let mut summary = Reconciliation::default();
    for record in records {
        match record.status {
            TrackedStatus::Initialized => summary.initialized += 1,
            TrackedStatus::Completed => summary.completed += 1,
            TrackedStatus::Error => summary.errored += 1,
            TrackedStatus::Scheduled => {
                summary.scheduled += 1;
                if record.agent_pod().is_some_and(|pod| stopped.contains(pod)) {
                    summary.lost.push(record.id);
                }
            }
            TrackedStatus::Unknown => {}
        }
    }

    summary.finished = summary.initialized == 0 && summary.scheduled == summary.lost.len();
    summary
}

/// Watches one run's queue and pool.
pub struct Monitor {
    broker: Arc<TaskBroker>,
    pool: Arc<dyn PoolStatus>,
    poll_interval: Duration,
}

impl Monitor {
    pub fn new(broker: Arc<TaskBroker>, pool: Arc<dyn PoolStatus>) -> Self {
        Self {
            broker,
            pool,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Builder method to set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Block until the queue is empty and no correlated member is running.
    pub async fn wait_for_completion(&self, job_name: &JobName) {
        info!(job = %job_name, "Monitoring task execution");

        loop {
            tokio::time::sleep(self.poll_interval).await;

            if !self.queue_drained(job_name).await {
                continue;
            }

            let members = match self.pool.members(job_name).await {
                Ok(members) => members,
                Err(e) => {
                    warn!(job = %job_name, error = %e, "Failed to list pool members");
                    continue;
                }
            };

            let running = members.iter().filter(|m| m.is_running()).count();
            if running > 0 {
                info!(job = %job_name, running, "Workers are still running");
                continue;
            }

            info!(job = %job_name, "Queue drained and all workers stopped");
            return;
        }
    }

    /// Block until every tracked task of the run is done or lost.
    pub async fn wait_for_tracked_completion(
        &self,
        run_id: RunId,
        job_name: &JobName,
        store: &dyn TaskStore,
    ) -> Reconciliation {
        info!(run_id = %run_id, job = %job_name, "Monitoring tracked tasks");

        loop {
            tokio::time::sleep(self.poll_interval).await;

            if !self.queue_drained(job_name).await {
                continue;
            }

            let records = match store.list_tasks(run_id).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "Failed to list tasks");
                    continue;
                }
            };
            let members = match self.pool.members(job_name).await {
                Ok(members) => members,
                Err(e) => {
                    warn!(job = %job_name, error = %e, "Failed to list pool members");
                    continue;
                }
            };

            let summary = reconcile(&records, &members);
            info!(
                run_id = %run_id,
                statuses = %status_line(&records),
                lost = summary.lost.len(),
                "Task status"
            );

            if summary.finished {
                if summary.lost.is_empty() {
                    info!(run_id = %run_id, "Run is finished");
                } else {
                    warn!(
                        run_id = %run_id,
                        lost = summary.lost.len(),
                        tasks = ?summary.lost,
                        "Run is finished despite lost tasks"
                    );
                }
                return summary;
            }
        }
    }

    async fn queue_drained(&self, job_name: &JobName) -> bool {
        match self.broker.inspect(&job_name.to_string()).await {
            Ok(queue) => {
                info!(queue = %queue.name, messages = queue.messages, "Queue status");
                queue.messages == 0
            }
            Err(e) => {
                warn!(queue = %job_name, error = %e, "Failed to inspect queue");
                false
            }
        }
    }
}

fn status_line(records: &[TaskRecord]) -> String {
    let mut counts: HashMap<TrackedStatus, usize> = HashMap::new();
    for record in records {
        *counts.entry(record.status).or_default() += 1;
    }

    let mut parts: Vec<String> = counts
        .into_iter()
        .map(|(status, count)| format!("{:?}={}", status, count))
        .collect();
    parts.sort();
    parts.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use suiterun_broker::MemoryBroker;
    use suiterun_core::TaskSetting;
    use suiterun_store::MemoryStore;

    use crate::pool::MemberPhase;
    use crate::testing::FakePool;

    const JOB: &str = "demo-42-abcdefghijkl";

    fn job() -> JobName {
        JobName::parse(JOB).unwrap()
    }

    fn record(id: u64, status: TrackedStatus, agent: Option<&str>) -> TaskRecord {
        let mut result_details = std::collections::HashMap::new();
        if let Some(agent) = agent {
            result_details.insert("agent".to_string(), json!(agent));
        }
        TaskRecord {
            id,
            status,
            result_details,
        }
    }

    #[test]
    fn test_reconcile_finished() {
        let records = vec![
            record(1, TrackedStatus::Completed, Some("p0@n")),
            record(2, TrackedStatus::Error, Some("p1@n")),
        ];
        let summary = reconcile(&records, &[]);
        assert!(summary.finished);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.errored, 1);
    }

    #[test]
    fn test_reconcile_lost_tasks() {
        let records = vec![
            record(1, TrackedStatus::Completed, Some("p0@n")),
            record(2, TrackedStatus::Scheduled, Some("p1@n")),
            record(3, TrackedStatus::Scheduled, Some("p2@n")),
        ];
        let members = vec![
            PoolMember::new("p1", MemberPhase::Failed),
            PoolMember::new("p2", MemberPhase::Running),
        ];

        let summary = reconcile(&records, &members);
        assert_eq!(summary.lost, vec![2]);
        assert!(!summary.finished);

        let members = vec![
            PoolMember::new("p1", MemberPhase::Failed),
            PoolMember::new("p2", MemberPhase::Succeeded),
        ];
        let summary = reconcile(&records, &members);
        assert_eq!(summary.lost, vec![2, 3]);
        assert!(summary.finished);
    }

    #[test]
    fn test_reconcile_waits_for_initialized_and_unlisted_agents() {
        let records = vec![record(1, TrackedStatus::Initialized, None)];
        assert!(!reconcile(&records, &[]).finished);

        // The agent's member is not listed at all: not known to be lost.
        let records = vec![record(1, TrackedStatus::Scheduled, Some("gone@n"))];
        let summary = reconcile(&records, &[]);
        assert!(summary.lost.is_empty());
        assert!(!summary.finished);
    }

    async fn setup(messages: usize) -> (Arc<TaskBroker>, FakePool) {
        let broker = Arc::new(TaskBroker::new(Arc::new(MemoryBroker::new())));
        let tasks: Vec<_> = (0..messages)
            .map(|i| TaskSetting::new(format!("t{}", i), "true"))
            .collect();
        broker.queue_declare(JOB).await.unwrap();
        broker.publish(JOB, &tasks).await.unwrap();
        (broker, FakePool::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_does_not_complete_while_messages_remain() {
        let (broker, pool) = setup(1).await;
        let monitor = Monitor::new(broker, Arc::new(pool.clone()));

        let waited =
            tokio::time::timeout(Duration::from_secs(300), monitor.wait_for_completion(&job()))
                .await;
        assert!(waited.is_err());
        assert_eq!(*pool.queries.lock().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_does_not_complete_while_member_runs() {
        let (broker, pool) = setup(0).await;
        pool.push_members(vec![
            PoolMember::new("w0", MemberPhase::Succeeded),
            PoolMember::new("w1", MemberPhase::Running),
        ])
        .await;
        let monitor = Monitor::new(broker, Arc::new(pool.clone()));

        let waited =
            tokio::time::timeout(Duration::from_secs(300), monitor.wait_for_completion(&job()))
                .await;
        assert!(waited.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_after_members_stop() {
        let (broker, pool) = setup(0).await;
        pool.push_error("api timeout").await;
        pool.push_members(vec![PoolMember::new("w0", MemberPhase::Running)])
            .await;
        pool.push_members(vec![PoolMember::new("w0", MemberPhase::Succeeded)])
            .await;
        let monitor = Monitor::new(broker, Arc::new(pool.clone()))
            .with_poll_interval(Duration::from_secs(1));

        monitor.wait_for_completion(&job()).await;
        assert_eq!(*pool.queries.lock().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inspect_failure_keeps_polling() {
        let broker = Arc::new(TaskBroker::new(Arc::new(MemoryBroker::new())));
        let pool = FakePool::default();
        let monitor = Monitor::new(broker, Arc::new(pool.clone()));

        // The queue was never declared: every inspect fails.
        let waited =
            tokio::time::timeout(Duration::from_secs(120), monitor.wait_for_completion(&job()))
                .await;
        assert!(waited.is_err());
        assert_eq!(*pool.queries.lock().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_after_broker_closes_channel() {
        let memory = MemoryBroker::new();
        let broker = Arc::new(TaskBroker::new(Arc::new(memory.clone())));
        broker.queue_declare(JOB).await.unwrap();
        let pool = FakePool::default();
        pool.push_members(vec![PoolMember::new("w0", MemberPhase::Succeeded)])
            .await;

        // The first inspect hits the closed channel, the next one reconnects.
        memory.close_channels().await;
        let monitor = Monitor::new(broker, Arc::new(pool.clone()))
            .with_poll_interval(Duration::from_secs(1));

        tokio::time::timeout(Duration::from_secs(60), monitor.wait_for_completion(&job()))
            .await
            .unwrap();
        assert_eq!(memory.connection_count().await, 2);
        assert_eq!(*pool.queries.lock().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracked_completion_with_lost_task() {
        let (broker, pool) = setup(0).await;
        pool.push_members(vec![
            PoolMember::new("w0", MemberPhase::Succeeded),
            PoolMember::new("w1", MemberPhase::Failed),
        ])
        .await;

        let store = MemoryStore::new();
        store
            .set_records(
                RunId::new(42),
                vec![
                    record(1, TrackedStatus::Completed, Some("w0@n")),
                    record(2, TrackedStatus::Scheduled, Some("w1@n")),
                ],
            )
            .await;

        let monitor = Monitor::new(broker, Arc::new(pool));
        let summary = monitor
            .wait_for_tracked_completion(RunId::new(42), &job(), &store)
            .await;

        assert!(summary.finished);
        assert_eq!(summary.lost, vec![2]);
        assert_eq!(summary.completed, 1);
    }

    #[test]
    fn test_status_line() {
        let records = vec![
            record(1, TrackedStatus::Completed, None),
            record(2, TrackedStatus::Completed, None),
            record(3, TrackedStatus::Scheduled, None),
        ];
        assert_eq!(status_line(&records), "Completed=2|Scheduled=1");
    }
}
