//! Error types for the expiring queue.

use thiserror::Error;

/// Errors raised while constructing a queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// No runtime handle was configured and none is current
    #[error(
        "lapse_core::ExpiringQueue requires a Tokio runtime: construct it inside \
         a runtime or pass a handle with QueueConfig::with_runtime"
    )]
    NoRuntime,
}

/// Structural defects found by the list consistency check.
#[cfg(test)]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConsistencyError {
    #[error("front and back disagree on emptiness")]
    EmptinessMismatch,

    #[error("single entry list is not self-contained")]
    BrokenSingleton,

    #[error("backward traversal is not the reverse of forward traversal")]
    TraversalMismatch,

    #[error("list holds {linked} entries but the arena holds {stored}")]
    CountMismatch { linked: usize, stored: usize },

    #[error("key index holds {indexed} entries but the list holds {linked}")]
    IndexMismatch { indexed: usize, linked: usize },
}
