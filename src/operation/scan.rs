//! Planning which files a reader has to look at.

use crate::data::DataFileMeta;
use crate::error::{Error, Result};
use crate::manifest::{FileKind, ManifestEntry, ManifestFile, ManifestList};
use crate::snapshot::{Snapshot, SnapshotManager};
use std::collections::BTreeMap;

/// Live files of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Snapshot the plan was made from, `None` for an empty table
    pub snapshot_id: Option<u64>,
    /// ADD entries of the live files that passed the filters
    pub files: Vec<ManifestEntry>,
}

impl Plan {
    /// Files grouped by (partition, bucket)
    pub fn grouped(&self) -> BTreeMap<(String, u32), Vec<DataFileMeta>> {
        let mut groups: BTreeMap<(String, u32), Vec<DataFileMeta>> = BTreeMap::new();
        for entry in &self.files {
            let bucket = (entry.partition.clone(), entry.bucket);
            groups.entry(bucket).or_default().push(entry.file.clone());
        }
        groups
    }
}

/// Lists the live files of a snapshot, optionally filtered by partition,
/// bucket and key range.
#[derive(Debug, Clone)]
pub struct FileStoreScan {
    snapshot_manager: SnapshotManager,
    manifest_file: ManifestFile,
    manifest_list: ManifestList,
    snapshot_id: Option<u64>,
    partition: Option<String>,
    bucket: Option<u32>,
    key_range: Option<(Vec<u8>, Vec<u8>)>,
}

impl FileStoreScan {
    /// Create a scan of the latest snapshot without filters
    pub fn new(
        snapshot_manager: SnapshotManager,
        manifest_file: ManifestFile,
        manifest_list: ManifestList,
    ) -> Self {
        Self {
            snapshot_manager,
            manifest_file,
            manifest_list,
            snapshot_id: None,
            partition: None,
            bucket: None,
            key_range: None,
        }
    }

    /// Scan snapshot `id` instead of the latest one
    pub fn with_snapshot(mut self, id: u64) -> Self {
        self.snapshot_id = Some(id);
        self
    }

    /// Only files of `partition`
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    /// Only files of `bucket`
    pub fn with_bucket(mut self, bucket: u32) -> Self {
        self.bucket = Some(bucket);
        self
    }

    /// Only files that may hold keys in `[min, max]`
    pub fn with_key_range(mut self, min: impl Into<Vec<u8>>, max: impl Into<Vec<u8>>) -> Self {
        self.key_range = Some((min.into(), max.into()));
        self
    }

    /// Compute the plan
    pub fn plan(&self) -> Result<Plan> {
        let snapshot = match self.snapshot_id {
            Some(id) => Some(self.snapshot_manager.snapshot(id)?),
            None => self.snapshot_manager.latest_snapshot()?,
        };
        let snapshot = match snapshot {
            Some(snapshot) => snapshot,
            None => return Ok(Plan::default()),
        };

        let files = self
            .read_live_entries(&snapshot)?
            .into_iter()
            .filter(|e| self.partition.as_ref().map_or(true, |p| &e.partition == p))
            .filter(|e| self.bucket.map_or(true, |b| e.bucket == b))
            .filter(|e| {
                self.key_range.as_ref().map_or(true, |(min, max)| e.file.overlaps_range(min, max))
            })
            .collect();

        Ok(Plan { snapshot_id: Some(snapshot.id), files })
    }

    /// Every live file of `snapshot`, unfiltered
    pub fn read_live_entries(&self, snapshot: &Snapshot) -> Result<Vec<ManifestEntry>> {
        let mut entries = Vec::new();
        for list in [&snapshot.base_manifest_list, &snapshot.delta_manifest_list] {
            for meta in self.manifest_list.read(list)? {
                entries.extend(self.manifest_file.read(&meta.file_name)?);
            }
        }

        let live = ManifestEntry::merge_entries(entries)?;
        if let Some(orphan) = live.iter().find(|e| e.kind == FileKind::Delete) {
            return Err(Error::corruption(format!(
                "Snapshot {} deletes {} which was never added",
                snapshot.id, orphan.file.file_name
            )));
        }
        Ok(live)
    }

    /// Entries changed by `snapshot` itself
    pub fn read_delta_entries(&self, snapshot: &Snapshot) -> Result<Vec<ManifestEntry>> {
        let mut entries = Vec::new();
        for meta in self.manifest_list.read(&snapshot.delta_manifest_list)? {
            entries.extend(self.manifest_file.read(&meta.file_name)?);
        }
        Ok(entries)
    }
}
