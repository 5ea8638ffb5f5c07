//! Manifest lists: the set of manifest files a snapshot points at.

use crate::config::CompressionType;
use crate::error::Result;
use crate::fs::FileIO;
use crate::manifest::file::ManifestFileMeta;
use crate::manifest::{read_sealed, write_sealed};
use std::path::PathBuf;
use std::sync::Arc;

/// Reads and writes manifest lists of one table.
#[derive(Debug, Clone)]
pub struct ManifestList {
    file_io: Arc<dyn FileIO>,
    dir: PathBuf,
    compression: CompressionType,
}

impl ManifestList {
    /// Create a manifest list handler for `dir`
    pub fn new(file_io: Arc<dyn FileIO>, dir: PathBuf, compression: CompressionType) -> Self {
        Self { file_io, dir, compression }
    }

    /// Write a new manifest list and return its name
    pub fn write(&self, metas: &[ManifestFileMeta]) -> Result<String> {
        let name = format!("manifest-list-{}", uuid::Uuid::new_v4());
        write_sealed(self.file_io.as_ref(), &self.dir.join(&name), metas, self.compression)?;
        Ok(name)
    }

    /// Read a manifest list
    pub fn read(&self, name: &str) -> Result<Vec<ManifestFileMeta>> {
        read_sealed(self.file_io.as_ref(), &self.dir.join(name))
    }

    /// Delete a manifest list, logging failures
    pub fn delete(&self, name: &str) {
        self.file_io.delete_or_warn(&self.dir.join(name));
    }
}
