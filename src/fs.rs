//! File system abstraction.
//!
//! The shared file system is the only coordination point between writers,
//! so besides plain create/read/delete it must offer an atomic
//! create-if-absent primitive ([`FileIO::try_write_atomic`]) that the commit
//! protocol uses to advance the current snapshot.

use crate::error::{Error, Result};
use std::fmt::Debug;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

/// A sink produced by [`FileIO::create`].
pub trait OutputStream: Write + Send {
    /// Flushes buffered bytes and makes them durable.
    fn sync(&mut self) -> Result<()>;
}

/// A seekable source produced by [`FileIO::open`].
pub trait InputStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> InputStream for T {}

/// File system operations used by the store.
pub trait FileIO: Send + Sync + Debug {
    /// Creates a new file. Fails with `AlreadyExists` if the path is taken.
    fn create(&self, path: &Path) -> Result<Box<dyn OutputStream>>;

    /// Opens an existing file for reading.
    fn open(&self, path: &Path) -> Result<Box<dyn InputStream>>;

    /// Returns true if the path exists.
    fn exists(&self, path: &Path) -> Result<bool>;

    /// Size of a file in bytes.
    fn file_size(&self, path: &Path) -> Result<u64>;

    /// Deletes a file. Returns false if it did not exist.
    fn delete(&self, path: &Path) -> Result<bool>;

    /// Lists the entries of a directory. A missing directory is empty.
    fn list(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// Creates a directory and its parents.
    fn mkdirs(&self, dir: &Path) -> Result<()>;

    /// Writes `content` to `path` only if `path` does not exist yet.
    ///
    /// Readers either see the complete content or no file at all. Returns
    /// false when another writer created the path first.
    fn try_write_atomic(&self, path: &Path, content: &[u8]) -> Result<bool>;

    /// Replaces the content of `path` atomically.
    fn overwrite_atomic(&self, path: &Path, content: &[u8]) -> Result<()>;

    /// Removes a directory and everything below it. Returns false if it did
    /// not exist.
    fn delete_dir(&self, dir: &Path) -> Result<bool>;

    /// Reads a whole file into memory.
    fn read_to_vec(&self, path: &Path) -> Result<Vec<u8>> {
        let mut input = self.open(path)?;
        let mut buf = Vec::new();
        input.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Deletes a file, logging instead of failing. Used on abort paths where
    /// an orphaned file is harmless.
    fn delete_or_warn(&self, path: &Path) {
        if let Err(e) = self.delete(path) {
            log::warn!("Failed to delete {:?}: {}", path, e);
        }
    }
}

/// [`FileIO`] over the local file system.
#[derive(Debug, Default, Clone)]
pub struct LocalFileIO;

impl LocalFileIO {
    /// Creates a new local file IO.
    pub fn new() -> Self {
        Self
    }

    fn temp_path(path: &Path) -> PathBuf {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
        let tmp = format!(".{}.{}.tmp", name, uuid::Uuid::new_v4());
        match path.parent() {
            Some(parent) => parent.join(tmp),
            None => PathBuf::from(tmp),
        }
    }

    fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    fn write_temp(path: &Path, content: &[u8]) -> Result<PathBuf> {
        Self::ensure_parent(path)?;
        let tmp = Self::temp_path(path);
        let mut file = File::create(&tmp)?;
        file.write_all(content)?;
        // fsync so the content is durable before it becomes visible
        file.sync_all()?;
        Ok(tmp)
    }

    #[cfg(unix)]
    fn sync_parent(path: &Path) {
        if let Some(parent) = path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
    }

    #[cfg(not(unix))]
    fn sync_parent(_path: &Path) {}
}

struct LocalOutputStream {
    writer: BufWriter<File>,
}

impl Write for LocalOutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl OutputStream for LocalOutputStream {
    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

impl FileIO for LocalFileIO {
    fn create(&self, path: &Path) -> Result<Box<dyn OutputStream>> {
        Self::ensure_parent(path)?;
        let file = OpenOptions::new().write(true).create_new(true).open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                Error::AlreadyExists(format!("{:?}", path))
            } else {
                Error::Io(e)
            }
        })?;
        Ok(Box::new(LocalOutputStream { writer: BufWriter::new(file) }))
    }

    fn open(&self, path: &Path) -> Result<Box<dyn InputStream>> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::not_found(format!("{:?}", path))
            } else {
                Error::Io(e)
            }
        })?;
        Ok(Box::new(io::BufReader::new(file)))
    }

    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(path.try_exists()?)
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn delete(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path());
        }
        paths.sort();
        Ok(paths)
    }

    fn mkdirs(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        Ok(())
    }

    fn delete_dir(&self, dir: &Path) -> Result<bool> {
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn try_write_atomic(&self, path: &Path, content: &[u8]) -> Result<bool> {
        let tmp = Self::write_temp(path, content)?;

        // hard_link refuses to replace an existing target, which gives us
        // create-if-absent with fully written content
        let result = match fs::hard_link(&tmp, path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(Error::Io(e)),
        };

        if let Err(e) = fs::remove_file(&tmp) {
            log::warn!("Failed to remove temporary file {:?}: {}", tmp, e);
        }
        if matches!(result, Ok(true)) {
            Self::sync_parent(path);
        }
        result
    }

    fn overwrite_atomic(&self, path: &Path, content: &[u8]) -> Result<()> {
        let tmp = Self::write_temp(path, content)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Self::sync_parent(path);
        Ok(())
    }
}
