//! Broker errors.

use thiserror::Error;

/// Errors raised by the task broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// AMQP protocol or connection error.
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// Could not reach the broker.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Queue does not exist.
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// Delivery tag unknown to this channel.
    #[error("unknown delivery tag: {0}")]
    UnknownDelivery(u64),

    /// Fetching would exceed the channel's prefetch window.
    #[error("prefetch window of {0} unacknowledged deliveries is full")]
    PrefetchExceeded(u16),

    /// The broker refused a publish.
    #[error("publish rejected: {0}")]
    PublishRejected(String),
}

impl BrokerError {
    /// Whether the channel that raised this error is unusable afterwards.
    ///
    /// AMQP closes a channel on any channel-level exception, including a
    /// 404 on a passive declare or a get from a missing queue.
    pub fn closes_channel(&self) -> bool {
        matches!(
            self,
            BrokerError::Amqp(_) | BrokerError::ChannelClosed | BrokerError::QueueNotFound(_)
        )
    }
}
