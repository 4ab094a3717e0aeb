//! Transport seams for the two porter kinds.
//!
//! The pub/sub side is broadcast and at-most-once: every collector process
//! sees every message and filters by ring ownership. The consumer-group side
//! is partitioned and replayable: progress is only recorded through
//! [`PartitionClaim::mark`].

mod memory;
mod mqtt;

pub use memory::{MemoryBus, MemoryClaim, MemoryPartition};
pub use mqtt::{MqttConfig, MqttSubscriber};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("subscription closed")]
    Closed,

    #[error("receiver lagged, {0} messages skipped")]
    Lagged(u64),
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, topics: &[String]) -> Result<Box<dyn Subscription>, TransportError>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next payload on any subscribed topic.
    async fn receive(&mut self) -> Result<String, TransportError>;

    async fn unsubscribe(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self);
}

/// A message read from a claimed partition.
#[derive(Clone, Debug, PartialEq)]
pub struct ClaimedMessage {
    pub offset: i64,
    pub payload: String,
}

/// One partition assigned to this consumer.
#[async_trait]
pub trait PartitionClaim: Send {
    /// Next available message. `None` once the claim has been revoked.
    async fn recv(&mut self) -> Option<ClaimedMessage>;

    /// Records that every message up to and including `offset` is processed.
    async fn mark(&mut self, offset: i64) -> Result<(), TransportError>;
}
