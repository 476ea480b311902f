use thiserror::Error;

/// Errors surfaced by a `BackendContract` implementation and by the
/// snapshot directory manager.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("sled transaction error: {0}")]
    SledTransaction(#[from] sled::transaction::TransactionError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] Box<bincode::ErrorKind>),

    #[error("config error: {0}")]
    Config(#[from] figment::Error),

    #[error("invalid snapshot directory name: {0}")]
    InvalidSnapshotName(String),

    #[error("snapshot not found at position {0}")]
    SnapshotNotFound(crate::position::LogPosition),

    #[error("utf8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("{0}")]
    Other(String),
}
