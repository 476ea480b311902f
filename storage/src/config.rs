use std::path::PathBuf;

use figment::{
    providers::{Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::errors::StorageError;

/// Engine-wide configuration, loaded from layered defaults merged with an
/// optional YAML file. Mirrors the `AppConfig::load` pattern: defaults are
/// always present, the file only overrides what it names.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EngineConfig {
    pub identity: IdentityConfig,
    pub snapshot: SnapshotConfig,
    pub timeouts: TimeoutConfig,
    pub sled: SledConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            snapshot: SnapshotConfig::default(),
            timeouts: TimeoutConfig::default(),
            sled: SledConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load defaults merged with an optional YAML config file. A missing
    /// file is not an error; it simply leaves the defaults untouched.
    pub fn load(file: Option<PathBuf>) -> Result<Self, StorageError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            figment = figment.merge(Yaml::file(file));
        }
        Ok(figment.extract()?)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct IdentityConfig {
    pub name: String,
    pub table: String,
    pub partition: u32,
    pub root_dir: PathBuf,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: "engine".to_string(),
            table: "default".to_string(),
            partition: 0,
            root_dir: PathBuf::from("data/"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SnapshotConfig {
    /// Fixed, non-empty prefix used in `<prefix>.<index>.<term>` snapshot
    /// directory names.
    pub prefix: String,
    /// Number of snapshots retained on disk after a successful create.
    pub max_retained: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            prefix: "snapshot".to_string(),
            max_retained: 1,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TimeoutConfig {
    pub open_ms: u64,
    pub status_ms: u64,
    pub snapshot_create_ms: u64,
    pub snapshot_open_ms: u64,
    pub read_metadata_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            open_ms: 5_000,
            status_ms: 5_000,
            snapshot_create_ms: 60_000,
            snapshot_open_ms: 60_000,
            read_metadata_ms: 5_000,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SledConfig {
    pub cache_capacity: u64,
    pub flush_every_ms: Option<u64>,
    pub use_compression: bool,
    pub compression_factor: i32,
}

impl Default for SledConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 64 * 1024 * 1024,
            flush_every_ms: Some(500),
            use_compression: false,
            compression_factor: 5,
        }
    }
}

impl SledConfig {
    pub fn apply(&self, config: sled::Config) -> sled::Config {
        config
            .cache_capacity(self.cache_capacity)
            .flush_every_ms(self.flush_every_ms)
            .use_compression(self.use_compression)
            .compression_factor(self.compression_factor)
    }
}
