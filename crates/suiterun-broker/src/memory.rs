//! In-process broker with the delivery semantics of the AMQP transport.
//!
//! Used by tests and single-machine runs. Unacknowledged deliveries go back
//! to the head of their queue when the owning channel closes, the way a
//! broker redelivers after a consumer's connection drops.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::channel::{BrokerChannel, Connector, Delivery, QueueInfo};
use crate::BrokerError;

#[derive(Default)]
struct MemoryState {
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    unacked: HashMap<u64, Unacked>,
    prefetch: HashMap<u64, u16>,
    next_tag: u64,
    next_channel: u64,
    published: u64,
    unreachable: bool,
    rejected_marker: Option<String>,
}

struct Unacked {
    channel: u64,
    queue: String,
    payload: Vec<u8>,
}

impl MemoryState {
    fn info(&self, name: &str) -> Option<QueueInfo> {
        self.queues.get(name).map(|queue| QueueInfo {
            name: name.to_string(),
            messages: queue.len() as u32,
            // Polling fetches never register a consumer.
            consumers: 0,
        })
    }

    fn in_flight(&self, channel: u64) -> usize {
        self.unacked.values().filter(|u| u.channel == channel).count()
    }

    /// Close a channel and return its unacked deliveries to their queues.
    fn close_channel(&mut self, channel: u64) {
        if self.prefetch.remove(&channel).is_none() {
            return;
        }

        let mut returned: Vec<(u64, Unacked)> = Vec::new();
        let tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| u.channel == channel)
            .map(|(tag, _)| *tag)
            .collect();
        for tag in tags {
            if let Some(unacked) = self.unacked.remove(&tag) {
                returned.push((tag, unacked));
            }
        }

        // Newest first so the oldest ends up at the head.
        returned.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, unacked) in returned {
            if let Some(ready) = self.queues.get_mut(&unacked.queue) {
                ready.push_front(unacked.payload);
            }
        }
    }
}

/// Shared in-process broker. Clones see the same queues.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent connection attempts fail.
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().await.unreachable = unreachable;
    }

    /// Refuse publishes whose payload contains `marker`.
    pub async fn reject_payloads_containing(&self, marker: impl Into<String>) {
        self.state.lock().await.rejected_marker = Some(marker.into());
    }

    /// Append a raw payload to an existing queue, bypassing serialization.
    pub async fn inject(&self, queue: &str, payload: impl Into<Vec<u8>>) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let ready = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        ready.push_back(payload.into());
        Ok(())
    }

    /// Depth of a queue, `None` if it does not exist.
    pub async fn queue_info(&self, queue: &str) -> Option<QueueInfo> {
        self.state.lock().await.info(queue)
    }

    /// Whether a queue exists.
    pub async fn has_queue(&self, queue: &str) -> bool {
        self.state.lock().await.queues.contains_key(queue)
    }

    /// Total messages ever accepted by publish.
    pub async fn published_count(&self) -> u64 {
        self.state.lock().await.published
    }

    /// Deliveries fetched but not yet acknowledged, across all channels.
    pub async fn unacked_count(&self) -> usize {
        self.state.lock().await.unacked.len()
    }

    /// Connections opened so far, including closed ones.
    pub async fn connection_count(&self) -> u64 {
        self.state.lock().await.next_channel
    }

    /// Close every open channel from the broker side, as a broker restart
    /// or a channel-level exception would.
    pub async fn close_channels(&self) {
        let mut state = self.state.lock().await;
        let open: Vec<u64> = state.prefetch.keys().copied().collect();
        for id in open {
            state.close_channel(id);
        }
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let mut state = self.state.lock().await;
        if state.unreachable {
            return Err(BrokerError::Connection(
                "memory broker is unreachable".to_string(),
            ));
        }
        state.next_channel += 1;
        let id = state.next_channel;
        state.prefetch.insert(id, 0);

        Ok(Arc::new(MemoryChannel {
            id,
            state: self.state.clone(),
        }))
    }
}

/// A channel on a [`MemoryBroker`].
pub struct MemoryChannel {
    id: u64,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryChannel {
    fn ensure_open(&self, state: &MemoryState) -> Result<(), BrokerError> {
        if state.prefetch.contains_key(&self.id) {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed)
        }
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        self.ensure_open(&state)?;
        state.prefetch.insert(self.id, count);
        Ok(())
    }

    async fn declare_queue(&self, name: &str) -> Result<QueueInfo, BrokerError> {
        let mut state = self.state.lock().await;
        self.ensure_open(&state)?;
        state.queues.entry(name.to_string()).or_default();
        state
            .info(name)
            .ok_or_else(|| BrokerError::QueueNotFound(name.to_string()))
    }

    async fn inspect_queue(&self, name: &str) -> Result<QueueInfo, BrokerError> {
        let mut state = self.state.lock().await;
        self.ensure_open(&state)?;
        match state.info(name) {
            Some(info) => Ok(info),
            None => {
                // A passive declare of a missing queue closes the channel.
                state.close_channel(self.id);
                Err(BrokerError::QueueNotFound(name.to_string()))
            }
        }
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        self.ensure_open(&state)?;

        if let Some(marker) = &state.rejected_marker {
            if String::from_utf8_lossy(payload).contains(marker.as_str()) {
                return Err(BrokerError::PublishRejected(format!(
                    "payload contains '{}'",
                    marker
                )));
            }
        }

        let ready = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        ready.push_back(payload.to_vec());
        state.published += 1;
        Ok(())
    }

    async fn get(&self, queue: &str) -> Result<Option<Delivery>, BrokerError> {
        let mut state = self.state.lock().await;
        self.ensure_open(&state)?;

        let prefetch = state.prefetch.get(&self.id).copied().unwrap_or_default();
        if prefetch > 0 && state.in_flight(self.id) >= usize::from(prefetch) {
            return Err(BrokerError::PrefetchExceeded(prefetch));
        }

        let payload = match state.queues.get_mut(queue) {
            Some(ready) => ready.pop_front(),
            None => {
                state.close_channel(self.id);
                return Err(BrokerError::QueueNotFound(queue.to_string()));
            }
        };
        let Some(payload) = payload else {
            return Ok(None);
        };

        state.next_tag += 1;
        let delivery_tag = state.next_tag;
        state.unacked.insert(
            delivery_tag,
            Unacked {
                channel: self.id,
                queue: queue.to_string(),
                payload: payload.clone(),
            },
        );

        Ok(Some(Delivery {
            delivery_tag,
            payload,
        }))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        self.ensure_open(&state)?;

        match state.unacked.get(&delivery_tag) {
            Some(unacked) if unacked.channel == self.id => {
                state.unacked.remove(&delivery_tag);
                Ok(())
            }
            _ => Err(BrokerError::UnknownDelivery(delivery_tag)),
        }
    }

    async fn delete_queue(&self, name: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        self.ensure_open(&state)?;
        state.queues.remove(name);
        state.unacked.retain(|_, unacked| unacked.queue != name);
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.state.lock().await.close_channel(self.id);
        Ok(())
    }
}
