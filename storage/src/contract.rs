use std::path::Path;

use crate::{errors::StorageError, position::LogPosition};

/// Opaque, engine-defined command payload. The contract never interprets
/// these bytes; the apply engine's dispatcher is the only caller that
/// knows how to encode/decode them for a given command variant.
pub type Opaque = Vec<u8>;

/// Opaque reply payload produced by a backend apply or host function call.
pub type Reply = Vec<u8>;

/// Symbolic identifier for a metadata entry. `config` is reserved by the
/// apply engine; all other keys are opaque to the contract.
pub type MetadataKey = String;

/// A versioned metadata entry: the position at which it was written, and
/// its opaque value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataEntry {
    pub version: LogPosition,
    pub value: Opaque,
}

/// A single `key => value` pair returned by `status()`, used purely for
/// reporting/introspection.
pub type StatusEntry = (String, String);

/// The capability set a storage backend must provide. All methods are
/// invoked synchronously from the apply engine's serialized command loop;
/// a backend is free to block internally on I/O. Exactly one command is
/// ever in flight against a given backend instance at a time, so no
/// internal synchronization is required to satisfy this contract (though
/// an implementation may still need it to satisfy `Send`/`Clone`, as
/// `SledBackend` does to share its underlying `sled::Db` handle).
///
/// Determinism requirement: for any prefix of the committed command
/// stream, two backends started from `(0, 0)` and fed the same prefix
/// must agree on all subsequent replies and on exported metadata.
pub trait BackendContract: Sized {
    /// Open (and, if necessary, create) the backend's on-disk state under
    /// `root_dir`. Must recover whatever position/metadata it previously
    /// persisted. Failure here is fatal to the owning engine instance.
    fn open(name: &str, table: &str, partition: u32, root_dir: &Path) -> Result<Self, StorageError>;

    /// The position last durably applied, or `LogPosition::ZERO` if the
    /// backend has never applied anything.
    fn position(&self) -> LogPosition;

    /// Release any resources held by the backend. Called exactly once, at
    /// engine shutdown.
    fn close(self);

    /// Apply an opaque command at `position`, returning its reply. Must be
    /// deterministic for identical `(command, position)` inputs across
    /// backend instances. On success the backend's internally-tracked
    /// position must equal `position`.
    fn apply(&mut self, command: &Opaque, position: LogPosition) -> Result<Reply, StorageError>;

    /// Produce a self-contained snapshot directory at `path`. Must be
    /// atomic from the caller's point of view (e.g. write to a temporary
    /// location and rename into place).
    fn create_snapshot(&self, path: &Path) -> Result<(), StorageError>;

    /// Replace this backend's live state with the snapshot found at
    /// `path`, which is expected to represent `position`. Returns the
    /// replacement backend value; the caller discards the old one.
    fn open_snapshot(path: &Path, position: LogPosition) -> Result<Self, StorageError>;

    /// Reporting-only key/value status.
    fn status(&self) -> Vec<StatusEntry>;

    /// Store a versioned opaque blob under `key`.
    fn write_metadata(
        &mut self,
        key: &MetadataKey,
        version: LogPosition,
        value: &Opaque,
    ) -> Result<(), StorageError>;

    /// Read the versioned opaque blob stored under `key`, if any.
    fn read_metadata(&self, key: &MetadataKey) -> Result<Option<MetadataEntry>, StorageError>;
}

/// Metadata key under which cluster configuration commands persist their
/// value. Reserved; the engine writes to it on every `Config` apply.
pub const CONFIG_METADATA_KEY: &str = "config";
