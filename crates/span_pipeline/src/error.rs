use crate::config::ConfigError;
use spanring::QueueError;
use thiserror::Error;

/// Errors surfaced by the pipeline facade.
///
/// Export failures are not in here: they are logged and counted by the
/// controller, never returned to producers or flush callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("failed to build span queue: {0}")]
    Queue(#[from] QueueError),
    /// `build()` was called outside of a tokio runtime
    #[error("no tokio runtime available to run the batch controller")]
    NoRuntime,
    #[error("at least one exporter is required")]
    NoExporters,
    /// The pipeline is shutting down or the flush was abandoned by cancellation
    #[error("pipeline is shut down")]
    ShutDown,
}
