//! Manifest files.

use crate::config::CompressionType;
use crate::error::Result;
use crate::fs::FileIO;
use crate::manifest::entry::{FileKind, ManifestEntry};
use crate::manifest::{read_sealed, write_sealed};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Metadata of one manifest file, as stored in a manifest list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFileMeta {
    /// File name inside the manifest directory
    pub file_name: String,
    /// Size of the file in bytes
    pub file_size: u64,
    /// Number of ADD entries
    pub num_added_files: u64,
    /// Number of DELETE entries
    pub num_deleted_files: u64,
}

/// Reads and writes manifest files of one table.
#[derive(Debug, Clone)]
pub struct ManifestFile {
    file_io: Arc<dyn FileIO>,
    dir: PathBuf,
    target_file_size: u64,
    compression: CompressionType,
}

impl ManifestFile {
    /// Create a manifest file handler for `dir`.
    ///
    /// Written files roll over once their entries exceed `target_file_size`.
    pub fn new(
        file_io: Arc<dyn FileIO>,
        dir: PathBuf,
        target_file_size: u64,
        compression: CompressionType,
    ) -> Self {
        Self { file_io, dir, target_file_size, compression }
    }

    /// Write entries into as many new manifest files as the target size asks for.
    ///
    /// On failure, files written by this call are removed again.
    pub fn write(&self, entries: &[ManifestEntry]) -> Result<Vec<ManifestFileMeta>> {
        let mut written = Vec::new();
        let mut start = 0;
        let mut chunk_size = 0;

        for (i, entry) in entries.iter().enumerate() {
            chunk_size += bincode::serialized_size(entry)?;
            if chunk_size >= self.target_file_size || i + 1 == entries.len() {
                match self.write_one(&entries[start..=i]) {
                    Ok(meta) => written.push(meta),
                    Err(e) => {
                        self.delete_all(&written);
                        return Err(e);
                    }
                }
                start = i + 1;
                chunk_size = 0;
            }
        }
        Ok(written)
    }

    /// Read every entry of a manifest file
    pub fn read(&self, file_name: &str) -> Result<Vec<ManifestEntry>> {
        read_sealed(self.file_io.as_ref(), &self.path(file_name))
    }

    /// Delete a manifest file, logging failures
    pub fn delete(&self, file_name: &str) {
        self.file_io.delete_or_warn(&self.path(file_name));
    }

    /// Fold runs of small manifest files into bigger ones.
    ///
    /// Consecutive files are merged once their combined size reaches the
    /// target size; the trailing run is merged only if it holds at least
    /// `min_count` files. Order is preserved, so DELETE entries still follow
    /// the ADD they cancel.
    pub fn merge(
        &self,
        metas: Vec<ManifestFileMeta>,
        min_count: usize,
    ) -> Result<Vec<ManifestFileMeta>> {
        let mut result = Vec::with_capacity(metas.len());
        let mut created = Vec::new();
        let mut candidates = Vec::new();
        let mut total_size = 0;

        let merged = (|| -> Result<()> {
            for meta in metas {
                total_size += meta.file_size;
                candidates.push(meta);
                if total_size >= self.target_file_size {
                    self.merge_candidates(&mut candidates, &mut result, &mut created)?;
                    total_size = 0;
                }
            }
            if candidates.len() >= min_count.max(2) {
                self.merge_candidates(&mut candidates, &mut result, &mut created)?;
            }
            result.append(&mut candidates);
            Ok(())
        })();

        if let Err(e) = merged {
            self.delete_all(&created);
            return Err(e);
        }
        Ok(result)
    }

    fn merge_candidates(
        &self,
        candidates: &mut Vec<ManifestFileMeta>,
        result: &mut Vec<ManifestFileMeta>,
        created: &mut Vec<ManifestFileMeta>,
    ) -> Result<()> {
        if candidates.len() == 1 {
            result.append(candidates);
            return Ok(());
        }

        let mut entries = Vec::new();
        for meta in candidates.iter() {
            entries.extend(self.read(&meta.file_name)?);
        }
        let merged = ManifestEntry::merge_entries(entries)?;
        let files = self.write(&merged)?;
        log::debug!("Merged {} manifest files into {}", candidates.len(), files.len());

        created.extend(files.iter().cloned());
        result.extend(files);
        candidates.clear();
        Ok(())
    }

    fn write_one(&self, entries: &[ManifestEntry]) -> Result<ManifestFileMeta> {
        let file_name = format!("manifest-{}", uuid::Uuid::new_v4());
        let file_size =
            write_sealed(self.file_io.as_ref(), &self.path(&file_name), entries, self.compression)?;
        let num_added_files = entries.iter().filter(|e| e.kind == FileKind::Add).count() as u64;

        Ok(ManifestFileMeta {
            file_name,
            file_size,
            num_added_files,
            num_deleted_files: entries.len() as u64 - num_added_files,
        })
    }

    fn delete_all(&self, metas: &[ManifestFileMeta]) {
        for meta in metas {
            self.delete(&meta.file_name);
        }
    }

    fn path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// The manifest directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
