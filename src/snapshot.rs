//! Snapshots: immutable, numbered table states.
//!
//! Snapshot `N` lives in `<table>/snapshot/snapshot-N` as a JSON document.
//! Committing snapshot `N` means creating that file; the file system's
//! create-if-absent primitive decides which of several racing committers
//! wins. A `LATEST` file next to the snapshots is only a hint to avoid
//! listing the directory and may lag behind.

use crate::error::{Error, Result};
use crate::fs::FileIO;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const SNAPSHOT_PREFIX: &str = "snapshot-";
const LATEST_HINT: &str = "LATEST";

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// What kind of change produced a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitKind {
    /// New files from writers
    Append,
    /// Files rewritten by compaction
    Compact,
    /// A partition replaced as a whole
    Overwrite,
}

/// An immutable table state.
///
/// The live files are the entries of the base manifest list merged with the
/// entries of the delta manifest list, which holds this snapshot's changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Format version
    pub version: u32,
    /// Snapshot id, strictly increasing
    pub id: u64,
    /// Manifest list of every file live before this snapshot
    pub base_manifest_list: String,
    /// Manifest list of the changes made by this snapshot
    pub delta_manifest_list: String,
    /// Writer that committed the snapshot
    pub commit_user: String,
    /// Identifier the writer attached to the commit
    pub commit_identifier: u64,
    /// Kind of change
    pub commit_kind: CommitKind,
    /// Commit time in milliseconds since the epoch
    pub time_millis: u64,
}

impl Snapshot {
    /// Encode as JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(Error::corruption(format!(
                "Unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }
}

/// Locates, reads and commits the snapshots of one table.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    file_io: Arc<dyn FileIO>,
    dir: PathBuf,
}

impl SnapshotManager {
    /// Create a manager for the table at `table_path`
    pub fn new(file_io: Arc<dyn FileIO>, table_path: &Path) -> Self {
        Self { file_io, dir: table_path.join("snapshot") }
    }

    /// Path of snapshot `id`
    pub fn snapshot_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{}{}", SNAPSHOT_PREFIX, id))
    }

    /// Read snapshot `id`
    pub fn snapshot(&self, id: u64) -> Result<Snapshot> {
        let bytes = self.file_io.read_to_vec(&self.snapshot_path(id))?;
        let json = String::from_utf8(bytes)
            .map_err(|_| Error::corruption(format!("Snapshot {} is not valid UTF-8", id)))?;
        Snapshot::from_json(&json)
    }

    /// Returns true if snapshot `id` exists
    pub fn snapshot_exists(&self, id: u64) -> Result<bool> {
        self.file_io.exists(&self.snapshot_path(id))
    }

    /// Ids of every existing snapshot, ascending
    pub fn snapshot_ids(&self) -> Result<Vec<u64>> {
        let mut ids: Vec<u64> = self
            .file_io
            .list(&self.dir)?
            .iter()
            .filter_map(|p| p.file_name()?.to_str()?.strip_prefix(SNAPSHOT_PREFIX)?.parse().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Id of the newest snapshot, if any
    pub fn latest_snapshot_id(&self) -> Result<Option<u64>> {
        if let Some(mut id) = self.read_hint()? {
            if self.snapshot_exists(id)? {
                // the hint may lag behind concurrent commits
                while self.snapshot_exists(id + 1)? {
                    id += 1;
                }
                return Ok(Some(id));
            }
        }
        Ok(self.snapshot_ids()?.last().copied())
    }

    /// Id of the oldest snapshot still present, if any
    pub fn earliest_snapshot_id(&self) -> Result<Option<u64>> {
        Ok(self.snapshot_ids()?.first().copied())
    }

    /// The newest snapshot, if any
    pub fn latest_snapshot(&self) -> Result<Option<Snapshot>> {
        match self.latest_snapshot_id()? {
            Some(id) => self.snapshot(id).map(Some),
            None => Ok(None),
        }
    }

    /// The newest snapshot committed by `user`, if any survives.
    pub fn latest_snapshot_of_user(&self, user: &str) -> Result<Option<Snapshot>> {
        let latest = match self.latest_snapshot_id()? {
            Some(id) => id,
            None => return Ok(None),
        };
        let earliest = self.earliest_snapshot_id()?.unwrap_or(latest);

        for id in (earliest..=latest).rev() {
            match self.snapshot(id) {
                Ok(snapshot) if snapshot.commit_user == user => return Ok(Some(snapshot)),
                Ok(_) => {}
                // expired while we were walking back
                Err(Error::NotFound(_)) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Try to publish `snapshot`. Returns false if a snapshot with the same
    /// id already exists.
    pub fn try_commit(&self, snapshot: &Snapshot) -> Result<bool> {
        let path = self.snapshot_path(snapshot.id);
        if !self.file_io.try_write_atomic(&path, snapshot.to_json()?.as_bytes())? {
            return Ok(false);
        }

        let hint = self.dir.join(LATEST_HINT);
        if let Err(e) = self.file_io.overwrite_atomic(&hint, snapshot.id.to_string().as_bytes()) {
            log::warn!("Failed to update latest snapshot hint: {}", e);
        }
        Ok(true)
    }

    /// Delete snapshot `id`
    pub fn delete_snapshot(&self, id: u64) -> Result<()> {
        self.file_io.delete(&self.snapshot_path(id))?;
        Ok(())
    }

    fn read_hint(&self) -> Result<Option<u64>> {
        let path = self.dir.join(LATEST_HINT);
        match self.file_io.read_to_vec(&path) {
            Ok(bytes) => Ok(std::str::from_utf8(&bytes).ok().and_then(|s| s.trim().parse().ok())),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Milliseconds since the epoch, as stored in snapshots
pub(crate) fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFileIO;
    use tempfile::TempDir;

    fn snapshot(id: u64, user: &str) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            id,
            base_manifest_list: format!("manifest-list-base-{}", id),
            delta_manifest_list: format!("manifest-list-delta-{}", id),
            commit_user: user.to_string(),
            commit_identifier: id * 10,
            commit_kind: CommitKind::Append,
            time_millis: 1_700_000_000_000 + id,
        }
    }

    fn manager(dir: &TempDir) -> SnapshotManager {
        SnapshotManager::new(Arc::new(LocalFileIO::new()), dir.path())
    }

    #[test]
    fn test_json_round_trip() {
        let s = snapshot(3, "writer-a");
        let json = s.to_json().unwrap();
        assert!(json.contains("\"commitKind\": \"APPEND\""));
        assert_eq!(Snapshot::from_json(&json).unwrap(), s);
    }

    #[test]
    fn test_empty_table() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        assert_eq!(manager.latest_snapshot_id().unwrap(), None);
        assert_eq!(manager.latest_snapshot().unwrap(), None);
        assert!(matches!(manager.snapshot(1), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_commit_is_create_if_absent() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        assert!(manager.try_commit(&snapshot(1, "a")).unwrap());
        assert!(!manager.try_commit(&snapshot(1, "b")).unwrap());
        assert_eq!(manager.snapshot(1).unwrap().commit_user, "a");
    }

    #[test]
    fn test_latest_survives_stale_hint() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        for id in 1..=3 {
            assert!(manager.try_commit(&snapshot(id, "a")).unwrap());
        }

        std::fs::write(dir.path().join("snapshot").join(LATEST_HINT), "1").unwrap();
        assert_eq!(manager.latest_snapshot_id().unwrap(), Some(3));

        std::fs::remove_file(dir.path().join("snapshot").join(LATEST_HINT)).unwrap();
        assert_eq!(manager.latest_snapshot_id().unwrap(), Some(3));
        assert_eq!(manager.earliest_snapshot_id().unwrap(), Some(1));
    }

    #[test]
    fn test_latest_snapshot_of_user() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.try_commit(&snapshot(1, "a")).unwrap();
        manager.try_commit(&snapshot(2, "b")).unwrap();
        manager.try_commit(&snapshot(3, "b")).unwrap();

        assert_eq!(manager.latest_snapshot_of_user("a").unwrap().map(|s| s.id), Some(1));
        assert_eq!(manager.latest_snapshot_of_user("b").unwrap().map(|s| s.id), Some(3));
        assert_eq!(manager.latest_snapshot_of_user("c").unwrap(), None);

        manager.delete_snapshot(1).unwrap();
        assert_eq!(manager.latest_snapshot_of_user("a").unwrap(), None);
    }
}
