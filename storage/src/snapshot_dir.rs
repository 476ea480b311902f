use std::path::{Path, PathBuf};

use crate::position::LogPosition;

/// Enumerates, names, retains, and deletes snapshot directories under a
/// single root directory. Directory entries are named
/// `<prefix>.<index>.<term>`, where `index` and `term` are non-negative
/// decimal integers with no leading `+`.
#[derive(Clone, Debug)]
pub struct SnapshotDirManager {
    root_dir: PathBuf,
    prefix: String,
    max_retained: usize,
}

impl SnapshotDirManager {
    pub fn new(root_dir: impl Into<PathBuf>, prefix: impl Into<String>, max_retained: usize) -> Self {
        Self {
            root_dir: root_dir.into(),
            prefix: prefix.into(),
            max_retained,
        }
    }

    pub fn name_for(&self, position: LogPosition) -> String {
        format!("{}.{}.{}", self.prefix, position.index, position.term)
    }

    pub fn path_for(&self, position: LogPosition) -> PathBuf {
        self.root_dir.join(self.name_for(position))
    }

    /// Parse `<prefix>.<index>.<term>` out of a directory's file name. Only
    /// succeeds if the prefix matches exactly and both numeric parts parse
    /// as plain non-negative decimal (no leading `+`, no extra characters).
    fn parse(&self, file_name: &str) -> Option<LogPosition> {
        let rest = file_name.strip_prefix(&self.prefix)?.strip_prefix('.')?;
        let (index_str, term_str) = rest.split_once('.')?;
        if index_str.is_empty() || term_str.is_empty() {
            return None;
        }
        if !index_str.bytes().all(|b| b.is_ascii_digit())
            || !term_str.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        let index = index_str.parse().ok()?;
        let term = term_str.parse().ok()?;
        Some(LogPosition::new(index, term))
    }

    /// List every valid snapshot directory under `root_dir`, sorted
    /// ascending by `(index, term)`. Entries whose name does not match the
    /// expected pattern are logged and ignored.
    pub fn list(&self) -> Vec<(LogPosition, PathBuf)> {
        let entries = match std::fs::read_dir(&self.root_dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!(root = %self.root_dir.display(), err = e.to_string(); "snapshot root dir unreadable");
                return Vec::new();
            }
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!(err = e.to_string(); "error reading snapshot root dir entry");
                    continue;
                }
            };
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(name) => name,
                None => {
                    log::warn!("snapshot directory name is not valid utf-8, ignoring");
                    continue;
                }
            };
            match self.parse(name) {
                Some(position) => found.push((position, entry.path())),
                None => log::debug!(name = name; "ignoring non-snapshot directory entry"),
            }
        }
        found.sort_by_key(|(position, _)| (position.index, position.term));
        found
    }

    /// Run retention: if more than `max_retained` snapshots exist, delete
    /// the lowest-sorted excess. Intended to run *before* a new snapshot
    /// is created, so a create under tight disk budget can still succeed.
    pub fn enforce_retention(&self) {
        let existing = self.list();
        if existing.len() <= self.max_retained {
            return;
        }
        let excess = existing.len() - self.max_retained;
        for (position, path) in existing.into_iter().take(excess) {
            log::info!(position = position.to_string(), path = %path.display(); "retention deleting snapshot");
            self.delete_path(&path);
        }
    }

    /// Best-effort recursive removal of a snapshot directory by name.
    /// Errors are logged, never propagated.
    pub fn delete(&self, name: &str) {
        self.delete_path(&self.root_dir.join(name));
    }

    fn delete_path(&self, path: &Path) {
        if let Err(e) = std::fs::remove_dir_all(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::error!(path = %path.display(), err = e.to_string(); "failed to delete snapshot directory");
            }
        }
    }
}
