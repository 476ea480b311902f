use std::path::Path;

use crate::{
    config::SledConfig,
    contract::{BackendContract, MetadataEntry, MetadataKey, Opaque, Reply, StatusEntry},
    errors::StorageError,
    position::LogPosition,
};

const POSITION_KEY: &[u8] = b"__position__";
const METADATA_TREE: &str = "mc6_meta";
const COMMAND_LOG_TREE: &str = "mc6_commands";

/// A `sled`-backed reference implementation of [`BackendContract`]. Used by
/// the engine's own test suite and as a template for real backends.
///
/// Layout:
/// - `METADATA_TREE` holds the applied position marker (`POSITION_KEY`) and
///   every versioned metadata entry, keyed by its `MetadataKey`.
/// - `COMMAND_LOG_TREE` holds the opaque bytes passed to `apply`, keyed by
///   the big-endian encoded index they were applied at, purely so a test or
///   operator can inspect what was applied.
#[derive(Clone)]
pub struct SledBackend {
    db: sled::Db,
    meta: sled::Tree,
    commands: sled::Tree,
}

impl SledBackend {
    fn open_at(path: &Path, sled_config: &SledConfig) -> Result<Self, StorageError> {
        let config = sled_config.apply(sled::Config::new().path(path));
        let db = config.open()?;
        let meta = db.open_tree(METADATA_TREE)?;
        let commands = db.open_tree(COMMAND_LOG_TREE)?;
        Ok(Self { db, meta, commands })
    }

    fn encode_position(position: LogPosition) -> Result<Vec<u8>, StorageError> {
        Ok(bincode::serialize(&position)?)
    }

    fn decode_position(bytes: &[u8]) -> Result<LogPosition, StorageError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl BackendContract for SledBackend {
    fn open(_name: &str, _table: &str, _partition: u32, root_dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(root_dir)?;
        Self::open_at(&root_dir.join("db"), &SledConfig::default())
    }

    fn position(&self) -> LogPosition {
        match self.meta.get(POSITION_KEY) {
            Ok(Some(bytes)) => Self::decode_position(&bytes).unwrap_or(LogPosition::ZERO),
            _ => LogPosition::ZERO,
        }
    }

    fn close(self) {
        let _ = self.db.flush();
    }

    fn apply(&mut self, command: &Opaque, position: LogPosition) -> Result<Reply, StorageError> {
        self.commands
            .insert(position.index.to_be_bytes(), command.as_slice())?;
        self.meta
            .insert(POSITION_KEY, Self::encode_position(position)?)?;
        self.db.flush()?;
        Ok(command.clone())
    }

    fn create_snapshot(&self, path: &Path) -> Result<(), StorageError> {
        if path.exists() {
            return Ok(());
        }
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let staging = parent.join(format!(
            ".{}.staging",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("snapshot")
        ));
        if staging.exists() {
            std::fs::remove_dir_all(&staging)?;
        }

        let exported = self.db.export();
        {
            let staging_db = sled::Config::new().path(&staging).open()?;
            staging_db.import(exported);
            staging_db.flush()?;
        }
        std::fs::rename(&staging, path)?;
        Ok(())
    }

    fn open_snapshot(path: &Path, position: LogPosition) -> Result<Self, StorageError> {
        if !path.exists() {
            return Err(StorageError::SnapshotNotFound(position));
        }
        let backend = Self::open_at(path, &SledConfig::default())?;
        let found = backend.position();
        if found != position {
            return Err(StorageError::Other(format!(
                "snapshot at {} reports position {found}, expected {position}",
                path.display()
            )));
        }
        Ok(backend)
    }

    fn status(&self) -> Vec<StatusEntry> {
        let position = self.position();
        vec![
            ("position.index".to_string(), position.index.to_string()),
            ("position.term".to_string(), position.term.to_string()),
            (
                "size_on_disk".to_string(),
                self.db.size_on_disk().unwrap_or(0).to_string(),
            ),
            ("commands_applied".to_string(), self.commands.len().to_string()),
            ("recovered".to_string(), self.db.was_recovered().to_string()),
        ]
    }

    fn write_metadata(
        &mut self,
        key: &MetadataKey,
        version: LogPosition,
        value: &Opaque,
    ) -> Result<(), StorageError> {
        let entry = MetadataRecord {
            version,
            value: value.clone(),
        };
        self.meta.insert(key.as_bytes(), bincode::serialize(&entry)?)?;
        // A metadata write at `version` means the backend has now observed
        // the log through `version`, even though no entry landed in
        // `COMMAND_LOG_TREE`. Keep the position marker advancing so that
        // `position()` stays truthful for callers who only ever apply
        // `Config` commands.
        if version > self.position() {
            self.meta
                .insert(POSITION_KEY, Self::encode_position(version)?)?;
        }
        self.db.flush()?;
        Ok(())
    }

    fn read_metadata(&self, key: &MetadataKey) -> Result<Option<MetadataEntry>, StorageError> {
        match self.meta.get(key.as_bytes())? {
            Some(bytes) => {
                let record: MetadataRecord = bincode::deserialize(&bytes)?;
                Ok(Some(MetadataEntry {
                    version: record.version,
                    value: record.value,
                }))
            }
            None => Ok(None),
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct MetadataRecord {
    version: LogPosition,
    value: Vec<u8>,
}
