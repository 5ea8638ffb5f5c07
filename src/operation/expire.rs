//! Snapshot expiration.

use crate::config::Options;
use crate::data::bucket_dir;
use crate::error::Result;
use crate::fs::FileIO;
use crate::manifest::{FileKind, ManifestFile, ManifestList};
use crate::operation::scan::FileStoreScan;
use crate::snapshot::{now_millis, SnapshotManager};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Removes old snapshots together with the files only they reference.
#[derive(Debug, Clone)]
pub struct FileStoreExpire {
    file_io: Arc<dyn FileIO>,
    table_path: PathBuf,
    snapshot_manager: SnapshotManager,
    manifest_file: ManifestFile,
    manifest_list: ManifestList,
    scan: FileStoreScan,
    num_retained_min: usize,
    num_retained_max: usize,
    time_retained: Duration,
}

impl FileStoreExpire {
    /// Create an expiration for the table at `table_path`
    pub fn new(
        file_io: Arc<dyn FileIO>,
        table_path: PathBuf,
        snapshot_manager: SnapshotManager,
        manifest_file: ManifestFile,
        manifest_list: ManifestList,
        options: &Options,
    ) -> Self {
        let scan = FileStoreScan::new(
            snapshot_manager.clone(),
            manifest_file.clone(),
            manifest_list.clone(),
        );
        Self {
            file_io,
            table_path,
            snapshot_manager,
            manifest_file,
            manifest_list,
            scan,
            num_retained_min: options.snapshot_num_retained_min.max(1),
            num_retained_max: options.snapshot_num_retained_max,
            time_retained: options.snapshot_time_retained,
        }
    }

    /// Expire snapshots and return how many were removed.
    ///
    /// At least `snapshot_num_retained_min` snapshots survive. Beyond the
    /// newest `snapshot_num_retained_max`, snapshots go regardless of age;
    /// in between, a snapshot goes only if it is older than
    /// `snapshot_time_retained`, and everything before the first one that
    /// is young enough goes with it.
    pub fn expire(&self) -> Result<usize> {
        let (earliest, latest) = match (
            self.snapshot_manager.earliest_snapshot_id()?,
            self.snapshot_manager.latest_snapshot_id()?,
        ) {
            (Some(earliest), Some(latest)) => (earliest, latest),
            _ => return Ok(0),
        };

        let retained_min = self.num_retained_min as u64;
        if latest + 1 < earliest + retained_min {
            return Ok(0);
        }
        // first id that must survive because of the minimum count
        let min_end = latest + 1 - retained_min;
        let max_start =
            (latest + 1).saturating_sub(u64::try_from(self.num_retained_max).unwrap_or(u64::MAX));

        let now = now_millis();
        let time_retained = self.time_retained.as_millis() as u64;
        let mut end = min_end;
        for id in max_start.max(earliest)..min_end {
            if !self.snapshot_manager.snapshot_exists(id)? {
                continue;
            }
            let snapshot = self.snapshot_manager.snapshot(id)?;
            if now.saturating_sub(snapshot.time_millis) <= time_retained {
                end = id;
                break;
            }
        }

        self.expire_until(earliest, end)
    }

    /// Expire every snapshot in `[earliest, end)`.
    fn expire_until(&self, earliest: u64, end: u64) -> Result<usize> {
        if end <= earliest {
            return Ok(0);
        }
        log::info!("Expiring snapshots {} to {}", earliest, end - 1);

        // files removed by the snapshots up to `end` were only visible to
        // the snapshots being expired
        for id in earliest + 1..=end {
            if !self.snapshot_manager.snapshot_exists(id)? {
                continue;
            }
            let delta = self.scan.read_delta_entries(&self.snapshot_manager.snapshot(id)?)?;
            // a file moved between levels is deleted and added under one name
            let re_added: HashSet<_> = delta
                .iter()
                .filter(|e| e.kind == FileKind::Add)
                .map(|e| (e.partition.as_str(), e.bucket, e.file.file_name.as_str()))
                .collect();
            for entry in delta.iter().filter(|e| e.kind == FileKind::Delete) {
                let id = (entry.partition.as_str(), entry.bucket, entry.file.file_name.as_str());
                if re_added.contains(&id) {
                    continue;
                }
                let dir = bucket_dir(&self.table_path, &entry.partition, entry.bucket);
                self.file_io.delete_or_warn(&dir.join(&entry.file.file_name));
            }
        }

        // manifests still reachable from a retained snapshot stay
        let mut in_use = HashSet::new();
        for id in self.snapshot_manager.snapshot_ids()?.into_iter().filter(|&id| id >= end) {
            let snapshot = self.snapshot_manager.snapshot(id)?;
            for list in [snapshot.base_manifest_list, snapshot.delta_manifest_list] {
                for meta in self.manifest_list.read(&list)? {
                    in_use.insert(meta.file_name);
                }
                in_use.insert(list);
            }
        }

        let mut expired = 0;
        for id in earliest..end {
            if !self.snapshot_manager.snapshot_exists(id)? {
                continue;
            }
            let snapshot = self.snapshot_manager.snapshot(id)?;
            for list in [&snapshot.base_manifest_list, &snapshot.delta_manifest_list] {
                if in_use.contains(list.as_str()) {
                    continue;
                }
                for meta in self.manifest_list.read(list)? {
                    if in_use.insert(meta.file_name.clone()) {
                        self.manifest_file.delete(&meta.file_name);
                    }
                }
                self.manifest_list.delete(list);
                in_use.insert(list.clone());
            }
            self.snapshot_manager.delete_snapshot(id)?;
            expired += 1;
        }

        log::info!("Expired {} snapshots, earliest is now {}", expired, end);
        Ok(expired)
    }
}
