//! suiterun Task Broker
//!
//! At-least-once delivery of task settings to a pool of competing workers.
//! [`TaskBroker`] holds one lazily opened channel and remembers the queues it
//! declared so it can clean them up on close. The wire is abstracted behind
//! [`BrokerChannel`]; [`AmqpConnector`] talks to a real AMQP 0-9-1 broker and
//! [`MemoryBroker`] keeps the same semantics in process.

pub mod amqp;
pub mod broker;
pub mod channel;
pub mod error;
pub mod memory;

pub use amqp::AmqpConnector;
pub use broker::{TaskBroker, PREFETCH_COUNT};
pub use channel::{BrokerChannel, Connector, Delivery, QueueInfo};
pub use error::BrokerError;
pub use memory::MemoryBroker;
