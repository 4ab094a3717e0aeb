use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyzeError {
    #[error("invalid sharding input: {0}")]
    InvalidShardingKey(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("no inventory host matches {0}")]
    HostNotFound(String),

    #[error("inventory host is incomplete: {0}")]
    IncompleteHost(String),

    /// A downstream collaborator failed. The message itself may be fine.
    #[error("collaborator request failed: {0}")]
    Collaborator(String),
}

impl AnalyzeError {
    /// True when re-analyzing the same message later may succeed.
    pub fn needs_retry(&self) -> bool {
        matches!(self, AnalyzeError::Collaborator(_))
    }
}

/// Business logic driven by a porter.
///
/// Implementations must be safe to call concurrently: porters run one
/// `analyze` per worker and the consumer-group path analyzes a whole batch at once.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    /// Sharding key for a message reporting `cloud_id` and `ip`.
    fn hash(&self, cloud_id: &str, ip: &str) -> Result<String, AnalyzeError>;

    async fn analyze(&self, message: &str) -> Result<(), AnalyzeError>;

    /// A representative message for self-tests.
    fn mock(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_collaborator_failures_retry() {
        assert!(AnalyzeError::Collaborator("timeout".into()).needs_retry());
        assert!(!AnalyzeError::MalformedMessage("eof".into()).needs_retry());
        assert!(!AnalyzeError::HostNotFound("0:10.0.0.1".into()).needs_retry());
        assert!(!AnalyzeError::InvalidShardingKey("empty ip".into()).needs_retry());
        assert!(!AnalyzeError::IncompleteHost("no bk_host_id".into()).needs_retry());
    }
}
