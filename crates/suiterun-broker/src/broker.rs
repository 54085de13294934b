//! The task broker used by the dispatcher, the workers and the monitor.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use suiterun_core::TaskSetting;

use crate::channel::{BrokerChannel, Connector, Delivery, QueueInfo};
use crate::{AmqpConnector, BrokerError};

/// Unacknowledged deliveries a channel may hold. One keeps fast workers from
/// draining the queue ahead of slow ones.
pub const PREFETCH_COUNT: u16 = 1;

/// Handle to the message broker for one process.
///
/// Built once at startup and shared by reference; the channel is opened on
/// first use and reused afterwards. An operation that fails with a
/// channel-level error drops the channel, and the next call opens a new one.
pub struct TaskBroker {
    connector: Arc<dyn Connector>,
    channel: Mutex<Option<Arc<dyn BrokerChannel>>>,
    declared: Mutex<Vec<String>>,
}

impl TaskBroker {
    /// Create a broker handle over any connector.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            channel: Mutex::new(None),
            declared: Mutex::new(Vec::new()),
        }
    }

    /// Create a broker handle for an AMQP URI.
    pub fn amqp(uri: impl Into<String>) -> Self {
        Self::new(Arc::new(AmqpConnector::new(uri)))
    }

    /// Return the channel, connecting first if needed.
    pub async fn get_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let mut slot = self.channel.lock().await;
        if let Some(channel) = slot.as_ref() {
            return Ok(channel.clone());
        }

        let channel = self.connector.connect().await?;
        if let Err(e) = channel.set_prefetch(PREFETCH_COUNT).await {
            let _ = channel.close().await;
            return Err(e);
        }

        *slot = Some(channel.clone());
        Ok(channel)
    }

    /// Forget `channel` if `result` shows it is no longer usable. The
    /// dropped channel is closed so its unacked deliveries are returned.
    async fn check<T>(
        &self,
        channel: &Arc<dyn BrokerChannel>,
        result: Result<T, BrokerError>,
    ) -> Result<T, BrokerError> {
        if let Err(e) = &result {
            if e.closes_channel() {
                let dropped = {
                    let mut slot = self.channel.lock().await;
                    let current = slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, channel));
                    if current {
                        slot.take()
                    } else {
                        None
                    }
                };
                if let Some(dropped) = dropped {
                    warn!(error = %e, "Broker channel failed, reopening on next use");
                    let _ = dropped.close().await;
                }
            }
        }
        result
    }

    /// Declare a durable, auto-delete queue and remember it for cleanup.
    pub async fn queue_declare(&self, name: &str) -> Result<QueueInfo, BrokerError> {
        let channel = self.get_channel().await?;
        let result = channel.declare_queue(name).await;
        let info = self.check(&channel, result).await?;

        let mut declared = self.declared.lock().await;
        if !declared.iter().any(|q| q == &info.name) {
            declared.push(info.name.clone());
        }
        Ok(info)
    }

    /// Publish task settings to a queue, declaring it first.
    ///
    /// A setting that fails to serialize or publish is logged and skipped.
    /// Returns the number of settings actually published.
    pub async fn publish(
        &self,
        queue: &str,
        settings: &[TaskSetting],
    ) -> Result<usize, BrokerError> {
        info!(queue = %queue, count = settings.len(), "To schedule tasks");

        self.queue_declare(queue).await?;
        let channel = self.get_channel().await?;

        info!(queue = %queue, "Declared queue, publishing tasks");
        let mut published = 0;
        for setting in settings {
            let body = match serde_json::to_vec(setting) {
                Ok(body) => body,
                Err(e) => {
                    warn!(
                        task = %setting.identifier(),
                        error = %e,
                        "Failed to serialize task setting, task skipped"
                    );
                    continue;
                }
            };

            let result = channel.publish(queue, &body).await;
            match self.check(&channel, result).await {
                Ok(()) => published += 1,
                Err(e) => {
                    warn!(
                        task = %setting.identifier(),
                        error = %e,
                        "Failed to publish task, task skipped"
                    );
                }
            }
        }

        info!(
            queue = %queue,
            published = published,
            skipped = settings.len() - published,
            "Finished publishing tasks"
        );
        Ok(published)
    }

    /// Pull one message without auto-ack. `None` means no more work.
    pub async fn fetch(&self, queue: &str) -> Result<Option<Delivery>, BrokerError> {
        let channel = self.get_channel().await?;
        let result = channel.get(queue).await;
        self.check(&channel, result).await
    }

    /// Acknowledge a fetched delivery.
    pub async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        let channel = self.get_channel().await?;
        let result = channel.ack(delivery_tag).await;
        self.check(&channel, result).await
    }

    /// Message and consumer counts of a queue.
    pub async fn inspect(&self, queue: &str) -> Result<QueueInfo, BrokerError> {
        let channel = self.get_channel().await?;
        let result = channel.inspect_queue(queue).await;
        self.check(&channel, result).await
    }

    /// Names of the queues declared through this handle.
    pub async fn declared_queues(&self) -> Vec<String> {
        self.declared.lock().await.clone()
    }

    /// Delete every queue declared through this handle, then close the
    /// channel and connection. Failures are logged.
    pub async fn close(&self) {
        let declared = std::mem::take(&mut *self.declared.lock().await);
        let Some(channel) = self.channel.lock().await.take() else {
            return;
        };

        for queue in &declared {
            if let Err(e) = channel.delete_queue(queue).await {
                warn!(queue = %queue, error = %e, "Failed to delete queue");
            }
        }

        if let Err(e) = channel.close().await {
            warn!(error = %e, "Failed to close broker channel");
        }
    }

    /// Close the channel and connection but leave declared queues in place.
    /// Workers share the run's queue with their peers and must not delete it.
    pub async fn disconnect(&self) {
        self.declared.lock().await.clear();
        let Some(channel) = self.channel.lock().await.take() else {
            return;
        };

        if let Err(e) = channel.close().await {
            warn!(error = %e, "Failed to close broker channel");
        }
    }
}
