//! Ingestion porters: receive collector messages from a transport and drive
//! them through an [`Analyzer`].

pub mod analyzer;
pub mod config;
pub mod consumer_group;
pub mod debug_service;
pub mod errors;
pub mod manager;
pub mod message;
pub mod metrics_defs;
pub mod pubsub;
pub mod stats;
pub mod transport;

#[cfg(test)]
mod testutils;

pub use analyzer::{AnalyzeError, Analyzer};
pub use consumer_group::ConsumerGroupPorter;
pub use errors::PorterError;
pub use manager::PorterManager;
pub use pubsub::PubSubPorter;
pub use stats::StatsSnapshot;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Decides whether this process is responsible for a sharding key.
pub trait Ownership: Send + Sync {
    fn is_owner(&self, key: &str) -> bool;
}

impl Ownership for membership::Membership {
    fn is_owner(&self, key: &str) -> bool {
        membership::Membership::is_owner(self, key)
    }
}

#[async_trait]
pub trait Porter: Send + Sync {
    fn name(&self) -> &str;

    /// Runs the porter until `shutdown` is cancelled.
    async fn run(&self, shutdown: CancellationToken);

    /// Analyzes `message` directly, bypassing transport and queue. An empty
    /// message is replaced by the analyzer's own mock message.
    async fn mock(&self, message: &str) -> Result<(), PorterError>;

    fn stats(&self) -> StatsSnapshot;
}
