//! Publishing file changes as new snapshots.
//!
//! A commit writes the manifests of the new table state first and then tries
//! to create the next snapshot file. Losing that race to another committer
//! is not an error: the commit re-reads the new latest snapshot, checks that
//! the two changes are compatible and tries again on top of it.

use crate::config::Options;
use crate::error::{Error, Result};
use crate::manifest::{FileKind, ManifestEntry, ManifestFile, ManifestFileMeta, ManifestList};
use crate::operation::committable::ManifestCommittable;
use crate::operation::scan::FileStoreScan;
use crate::snapshot::{now_millis, CommitKind, Snapshot, SnapshotManager, SNAPSHOT_VERSION};
use std::collections::{BTreeMap, HashSet};

/// Commits [`ManifestCommittable`]s of one user to a table.
#[derive(Debug, Clone)]
pub struct FileStoreCommit {
    commit_user: String,
    snapshot_manager: SnapshotManager,
    manifest_file: ManifestFile,
    manifest_list: ManifestList,
    scan: FileStoreScan,
    max_retries: usize,
    manifest_merge_min_count: usize,
}

/// Manifest files and lists written by one commit attempt
#[derive(Default)]
struct Written {
    manifests: Vec<String>,
    lists: Vec<String>,
}

impl FileStoreCommit {
    /// Create a committer acting as `commit_user`
    pub fn new(
        commit_user: impl Into<String>,
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
            commit_user: commit_user.into(),
            snapshot_manager,
            manifest_file,
            manifest_list,
            scan,
            max_retries: options.commit_max_retries,
            manifest_merge_min_count: options.manifest_merge_min_count,
        }
    }

    /// The user this committer commits as
    pub fn commit_user(&self) -> &str {
        &self.commit_user
    }

    /// Drop committables that already made it into a snapshot.
    ///
    /// Used when recovering from a crash between commit and acknowledgement:
    /// anything at or below the last identifier this user committed is done.
    pub fn filter_committed(
        &self,
        mut committables: Vec<ManifestCommittable>,
    ) -> Result<Vec<ManifestCommittable>> {
        committables.sort_by_key(|c| c.identifier);
        let last = match self.snapshot_manager.latest_snapshot_of_user(&self.commit_user)? {
            Some(snapshot) => snapshot.commit_identifier,
            None => return Ok(committables),
        };

        let before = committables.len();
        committables.retain(|c| c.identifier > last);
        if committables.len() < before {
            log::info!(
                "Skipping {} committables of {} already committed up to identifier {}",
                before - committables.len(),
                self.commit_user,
                last
            );
        }
        Ok(committables)
    }

    /// Commit new files and compaction changes.
    ///
    /// New files go into an append snapshot, compaction changes into a
    /// compact snapshot after it. Returns the ids of the created snapshots.
    ///
    /// If the append snapshot is published and the compact one is not, the
    /// error is [`Error::PartiallyCommitted`] carrying the published id. The
    /// new files are then live; the compaction changes are not.
    pub fn commit(&self, committable: &ManifestCommittable) -> Result<Vec<u64>> {
        let mut append = Vec::new();
        let mut compact = Vec::new();
        for ((partition, bucket), increment) in &committable.increments {
            let entry = |kind, file: &crate::data::DataFileMeta| {
                ManifestEntry::new(kind, partition.clone(), *bucket, file.clone())
            };
            append.extend(increment.new_files.iter().map(|f| entry(FileKind::Add, f)));
            compact.extend(increment.compact_before.iter().map(|f| entry(FileKind::Delete, f)));
            compact.extend(increment.compact_after.iter().map(|f| entry(FileKind::Add, f)));
        }

        let mut ids = Vec::new();
        if !append.is_empty() {
            ids.push(self.try_commit(CommitKind::Append, committable.identifier, |_| {
                Ok(append.clone())
            })?);
        }
        if !compact.is_empty() {
            let result = self.try_commit(CommitKind::Compact, committable.identifier, |_| {
                Ok(compact.clone())
            });
            match result {
                Ok(id) => ids.push(id),
                Err(e) if ids.is_empty() => return Err(e),
                Err(e) => {
                    log::warn!(
                        "Compaction changes of {} not committed, snapshots {:?} stay: {}",
                        self.commit_user,
                        ids,
                        e
                    );
                    return Err(Error::PartiallyCommitted { committed: ids, source: Box::new(e) });
                }
            }
        }
        Ok(ids)
    }

    /// Replace every live file of `partition` with the new files of
    /// `committable`.
    ///
    /// Compaction changes in the committable are ignored: they were made
    /// against the data being replaced. The partition's old files are
    /// re-read on every attempt, so an overwrite never conflicts.
    pub fn overwrite(&self, partition: &str, committable: &ManifestCommittable) -> Result<u64> {
        let mut added = Vec::new();
        for ((p, bucket), increment) in &committable.increments {
            if p != partition {
                return Err(Error::invalid_argument(format!(
                    "Overwriting partition '{}' with files of partition '{}'",
                    partition, p
                )));
            }
            added.extend(
                increment
                    .new_files
                    .iter()
                    .map(|f| ManifestEntry::new(FileKind::Add, p.clone(), *bucket, f.clone())),
            );
        }

        self.try_commit(CommitKind::Overwrite, committable.identifier, |latest| {
            let mut changes: Vec<ManifestEntry> = match latest {
                Some(snapshot) => self
                    .scan
                    .read_live_entries(snapshot)?
                    .into_iter()
                    .filter(|e| e.partition == partition)
                    .map(|e| ManifestEntry { kind: FileKind::Delete, ..e })
                    .collect(),
                None => Vec::new(),
            };
            changes.extend(added.iter().cloned());
            Ok(changes)
        })
    }

    fn try_commit<F>(&self, kind: CommitKind, identifier: u64, changes: F) -> Result<u64>
    where
        F: Fn(Option<&Snapshot>) -> Result<Vec<ManifestEntry>>,
    {
        let mut attempts = 0;
        loop {
            let latest = self.snapshot_manager.latest_snapshot()?;
            let delta = changes(latest.as_ref())?;
            attempts += 1;

            if let Some(id) = self.try_commit_once(latest.as_ref(), &delta, kind, identifier)? {
                return Ok(id);
            }
            if attempts > self.max_retries {
                log::error!(
                    "Giving up {:?} commit of {} after {} attempts",
                    kind,
                    self.commit_user,
                    attempts
                );
                return Err(Error::CommitFailed { attempts });
            }
            log::info!(
                "Snapshot {} was taken by another committer, retrying {:?} commit of {}",
                latest.map_or(1, |s| s.id + 1),
                kind,
                self.commit_user
            );
        }
    }

    /// One attempt at publishing snapshot `latest + 1`. Returns `None` if
    /// another committer got there first.
    fn try_commit_once(
        &self,
        latest: Option<&Snapshot>,
        delta: &[ManifestEntry],
        kind: CommitKind,
        identifier: u64,
    ) -> Result<Option<u64>> {
        let new_id = latest.map_or(1, |s| s.id + 1);
        if let Some(latest) = latest {
            self.check_conflicts(latest, delta)?;
        }

        let mut written = Written::default();
        let result = self.write_snapshot(latest, delta, kind, identifier, new_id, &mut written);
        match result {
            Ok(true) => {
                log::info!(
                    "Committed snapshot {} ({:?}, {} entries) for {}",
                    new_id,
                    kind,
                    delta.len(),
                    self.commit_user
                );
                Ok(Some(new_id))
            }
            Ok(false) => {
                self.clean_up(&written);
                Ok(None)
            }
            Err(e) => {
                log::warn!("Commit of snapshot {} failed: {}", new_id, e);
                self.clean_up(&written);
                Err(e)
            }
        }
    }

    fn write_snapshot(
        &self,
        latest: Option<&Snapshot>,
        delta: &[ManifestEntry],
        kind: CommitKind,
        identifier: u64,
        new_id: u64,
        written: &mut Written,
    ) -> Result<bool> {
        let mut previous: Vec<ManifestFileMeta> = Vec::new();
        if let Some(latest) = latest {
            previous.extend(self.manifest_list.read(&latest.base_manifest_list)?);
            previous.extend(self.manifest_list.read(&latest.delta_manifest_list)?);
        }
        let previous_names: HashSet<String> =
            previous.iter().map(|m| m.file_name.clone()).collect();

        let base = self.manifest_file.merge(previous, self.manifest_merge_min_count)?;
        written.manifests.extend(
            base.iter()
                .filter(|m| !previous_names.contains(&m.file_name))
                .map(|m| m.file_name.clone()),
        );

        let delta_files = self.manifest_file.write(delta)?;
        written.manifests.extend(delta_files.iter().map(|m| m.file_name.clone()));

        let base_manifest_list = self.manifest_list.write(&base)?;
        written.lists.push(base_manifest_list.clone());
        let delta_manifest_list = self.manifest_list.write(&delta_files)?;
        written.lists.push(delta_manifest_list.clone());

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            id: new_id,
            base_manifest_list,
            delta_manifest_list,
            commit_user: self.commit_user.clone(),
            commit_identifier: identifier,
            commit_kind: kind,
            time_millis: now_millis(),
        };
        self.snapshot_manager.try_commit(&snapshot)
    }

    /// Fails with a conflict if `delta` cannot be applied on top of `latest`:
    /// it removes a file that is no longer live, or it leaves two files of
    /// the same sorted run with overlapping key ranges.
    fn check_conflicts(&self, latest: &Snapshot, delta: &[ManifestEntry]) -> Result<()> {
        // new level-0 files can always be added
        let restructures =
            delta.iter().any(|e| e.kind == FileKind::Delete || e.file.level > 0);
        if !restructures {
            return Ok(());
        }

        let live = self.scan.read_live_entries(latest)?;
        let merged = ManifestEntry::merge_entries(live.into_iter().chain(delta.iter().cloned()))
            .map_err(|e| Error::conflict(format!("Conflicting file additions: {}", e)))?;

        if let Some(entry) = merged.iter().find(|e| e.kind == FileKind::Delete) {
            log::warn!(
                "Commit of {} conflicts with snapshot {}: {} is no longer live",
                self.commit_user,
                latest.id,
                entry.file.file_name
            );
            return Err(Error::conflict(format!(
                "File {} of bucket {} was removed by a concurrent commit",
                entry.file.file_name, entry.bucket
            )));
        }

        let mut runs: BTreeMap<(&str, u32, u32), Vec<&ManifestEntry>> = BTreeMap::new();
        for entry in merged.iter().filter(|e| e.file.level > 0) {
            let run = (entry.partition.as_str(), entry.bucket, entry.file.level);
            runs.entry(run).or_default().push(entry);
        }
        for ((partition, bucket, level), mut files) in runs {
            files.sort_by(|a, b| a.file.min_key.cmp(&b.file.min_key));
            for pair in files.windows(2) {
                if pair[0].file.max_key >= pair[1].file.min_key {
                    return Err(Error::conflict(format!(
                        "Files {} and {} overlap at level {} of bucket {} in partition '{}'",
                        pair[0].file.file_name, pair[1].file.file_name, level, bucket, partition
                    )));
                }
            }
        }
        Ok(())
    }

    fn clean_up(&self, written: &Written) {
        for list in &written.lists {
            self.manifest_list.delete(list);
        }
        for manifest in &written.manifests {
            self.manifest_file.delete(manifest);
        }
    }
}
