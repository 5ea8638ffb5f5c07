//! Manifests: the durable description of which data files make up a table.
//!
//! ```text
//! snapshot-N (JSON)
//!   ├── base manifest list  -> manifest files holding every live file before N
//!   └── delta manifest list -> manifest files holding the ADD/DELETE entries of N
//! ```
//!
//! Manifest files and lists are written once under fresh names and never
//! modified, so a snapshot only ever points at complete files. Both are
//! bincode payloads sealed like data blocks: compression tag plus CRC32.

pub mod entry;
pub mod file;
pub mod list;

pub use entry::{FileIdentifier, FileKind, ManifestEntry};
pub use file::{ManifestFile, ManifestFileMeta};
pub use list::ManifestList;

use crate::config::CompressionType;
use crate::data::block::{open_block, seal_block};
use crate::error::{Error, Result};
use crate::fs::FileIO;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Directory holding manifest files and lists
pub fn manifest_dir(table_path: &Path) -> PathBuf {
    table_path.join("manifest")
}

/// Write `value` to a new file. Fails if the file already exists.
fn write_sealed<T: Serialize + ?Sized>(
    file_io: &dyn FileIO,
    path: &Path,
    value: &T,
    compression: CompressionType,
) -> Result<u64> {
    let sealed = seal_block(&bincode::serialize(value)?, compression)?;
    if !file_io.try_write_atomic(path, &sealed)? {
        return Err(Error::AlreadyExists(format!("{:?}", path)));
    }
    Ok(sealed.len() as u64)
}

fn read_sealed<T: DeserializeOwned>(file_io: &dyn FileIO, path: &Path) -> Result<T> {
    let sealed = file_io.read_to_vec(path)?;
    let raw = open_block(&sealed)?;
    Ok(bincode::deserialize(&raw)?)
}
