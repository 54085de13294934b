//! Wire abstraction the [`TaskBroker`](crate::TaskBroker) is built on.

use std::sync::Arc;

use async_trait::async_trait;

use crate::BrokerError;

/// Queue depth as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    /// Queue name.
    pub name: String,
    /// Messages ready for delivery.
    pub messages: u32,
    /// Consumers subscribed to the queue.
    pub consumers: u32,
}

/// A fetched, not yet acknowledged message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Tag to acknowledge the delivery with.
    pub delivery_tag: u64,
    /// Raw message body.
    pub payload: Vec<u8>,
}

/// One open channel to a message broker.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Limit unacknowledged deliveries held by this channel.
    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError>;

    /// Declare a durable, auto-delete queue. Redeclaring is a no-op.
    async fn declare_queue(&self, name: &str) -> Result<QueueInfo, BrokerError>;

    /// Read the depth of an existing queue without declaring it.
    async fn inspect_queue(&self, name: &str) -> Result<QueueInfo, BrokerError>;

    /// Publish a persistent JSON message to `queue` via the default exchange.
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Pull one message without auto-ack; `None` when the queue is empty.
    async fn get(&self, queue: &str) -> Result<Option<Delivery>, BrokerError>;

    /// Acknowledge a delivery fetched on this channel.
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    /// Delete a queue and its messages.
    async fn delete_queue(&self, name: &str) -> Result<(), BrokerError>;

    /// Close the channel and its connection.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Opens channels.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a connection and open one channel on it.
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError>;
}
