use crate::analyzer::AnalyzeError;
use thiserror::Error;

/// Errors surfaced by porters and the manager to their callers.
#[derive(Error, Debug)]
pub enum PorterError {
    #[error("unknown porter: {0}")]
    UnknownPorter(String),

    #[error("timed out adding message to the analyze queue")]
    QueueTimeout,

    #[error("analyze queue is closed")]
    QueueClosed,

    #[error("porter manager is not running")]
    ManagerStopped,

    #[error("analyze failed: {0}")]
    Analyze(#[from] AnalyzeError),
}
