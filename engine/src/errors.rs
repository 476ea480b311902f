use mc6_storage::{LogPosition, StorageError};
use thiserror::Error;

/// Errors produced by the apply engine. `GapDetected` is the one variant
/// that poisons the instance; every other variant is delivered to a
/// caller or client promise and the engine continues.
#[derive(Clone, Debug, Error)]
pub enum EngineError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error(
        "gapped apply: expected index {expected}, got {got} (last applied {last_applied})"
    )]
    GapDetected {
        expected: u64,
        got: u64,
        last_applied: LogPosition,
    },

    #[error("execute {module}.{function} failed: {cause}")]
    ExecuteFailed {
        module: String,
        function: String,
        cause: String,
    },

    #[error("no leader: pending request dropped on cancellation")]
    NotLeader,

    #[error("no host function registered for {module}.{function}")]
    UnknownFunction { module: String, function: String },

    #[error("snapshot not found for position {0}")]
    SnapshotNotFound(LogPosition),

    #[error("{0}")]
    Unknown(String),
}

impl From<StorageError> for EngineError {
    fn from(value: StorageError) -> Self {
        EngineError::Backend(value.to_string())
    }
}
