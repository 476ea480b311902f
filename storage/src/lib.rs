pub mod config;
pub mod contract;
pub mod errors;
pub mod position;
pub mod sled_backend;
pub mod snapshot_dir;

pub use config::EngineConfig;
pub use contract::{BackendContract, MetadataEntry, MetadataKey, Opaque, Reply, CONFIG_METADATA_KEY};
pub use errors::StorageError;
pub use position::LogPosition;
pub use sled_backend::SledBackend;
pub use snapshot_dir::SnapshotDirManager;
