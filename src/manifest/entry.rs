//! Manifest entries: one file added to or removed from the table.

use crate::data::DataFileMeta;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Whether an entry adds or removes a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    /// The file becomes live
    Add,
    /// The file stops being live
    Delete,
}

/// One file change of a table, located by partition and bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Add or delete
    pub kind: FileKind,
    /// Partition of the file, empty for unpartitioned tables
    pub partition: String,
    /// Bucket of the file
    pub bucket: u32,
    /// The data file
    pub file: DataFileMeta,
}

/// Identity of a live file. A file moved to another level is a different
/// live file, even though it is the same file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileIdentifier {
    /// Partition of the file
    pub partition: String,
    /// Bucket of the file
    pub bucket: u32,
    /// Level of the file
    pub level: u32,
    /// File name
    pub file_name: String,
}

impl ManifestEntry {
    /// Create an entry
    pub fn new(
        kind: FileKind,
        partition: impl Into<String>,
        bucket: u32,
        file: DataFileMeta,
    ) -> Self {
        Self { kind, partition: partition.into(), bucket, file }
    }

    /// Identity of the file this entry refers to
    pub fn identifier(&self) -> FileIdentifier {
        FileIdentifier {
            partition: self.partition.clone(),
            bucket: self.bucket,
            level: self.file.level,
            file_name: self.file.file_name.clone(),
        }
    }

    /// Fold a sequence of entries, oldest first, into its net effect.
    ///
    /// A DELETE cancels an earlier ADD of the same file; a DELETE without a
    /// matching ADD is kept, since the ADD may live in a manifest outside of
    /// `entries`. Adding a file twice is corruption. Entry order is preserved.
    pub fn merge_entries<I>(entries: I) -> Result<Vec<ManifestEntry>>
    where
        I: IntoIterator<Item = ManifestEntry>,
    {
        let mut slots: Vec<Option<ManifestEntry>> = Vec::new();
        let mut index: HashMap<FileIdentifier, usize> = HashMap::new();

        for entry in entries {
            let id = entry.identifier();
            let live_add = index
                .get(&id)
                .copied()
                .filter(|&pos| matches!(&slots[pos], Some(e) if e.kind == FileKind::Add));
            match (entry.kind, live_add) {
                (FileKind::Add, Some(_)) => {
                    return Err(Error::corruption(format!(
                        "File {} at level {} of bucket {} is added twice",
                        id.file_name, id.level, id.bucket
                    )));
                }
                (FileKind::Delete, Some(pos)) => {
                    slots[pos] = None;
                    index.remove(&id);
                }
                _ => {
                    index.insert(id, slots.len());
                    slots.push(Some(entry));
                }
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}
