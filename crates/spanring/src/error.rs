//! Error types for queue construction.

use thiserror::Error;

/// Errors returned when a queue cannot be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// A queue must be able to hold at least one item.
    #[error("queue capacity must be non-zero")]
    ZeroCapacity,

    /// The requested capacity exceeds what the slot array supports.
    #[error("queue capacity {requested} exceeds maximum {max}")]
    CapacityTooLarge { requested: usize, max: usize },
}
