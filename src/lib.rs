//! # TableStore - A Primary-Key Table Store on an Append-Only File System
//!
//! TableStore keeps the rows of a table in immutable sorted data files and
//! publishes every change as a new, numbered snapshot. All coordination
//! between writers goes through the file system: committing a snapshot is
//! creating a file, and the first committer to create it wins.
//!
//! ## Architecture
//!
//! - **MemTable**: In-memory write buffer of one bucket
//! - **Data files**: Immutable columnar files sorted by key
//! - **Merge tree**: Levels of data files per bucket, kept in shape by
//!   compaction, with a merge function resolving versions of a key
//! - **Manifests**: Immutable listings of file additions and deletions
//! - **Snapshots**: Numbered JSON documents pointing at manifests
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use tablestore::{FileStore, Options};
//! use tablestore::operation::ManifestCommittable;
//! use tablestore::types::{Row, RowKind, Value};
//!
//! # fn main() -> Result<(), tablestore::Error> {
//! let store = FileStore::open("./warehouse/db.db/orders", Options::default())?;
//!
//! // Write into bucket 0 of an unpartitioned table
//! let mut writer = store.new_writer("", 0)?;
//! writer.write(RowKind::Insert, b"order-1", Row::new(vec![Value::Int(42)]))?;
//!
//! // Publish the written files as a new snapshot
//! let mut committable = ManifestCommittable::new(1);
//! committable.add_increment("", 0, writer.prepare_commit(true)?);
//! store.new_commit("job-1").commit(&committable)?;
//!
//! // Read the bucket back
//! let plan = store.new_scan().with_bucket(0).plan()?;
//! let files: Vec<_> = plan.files.iter().map(|e| e.file.clone()).collect();
//! let rows = store.new_read().read("", 0, &files)?;
//! assert_eq!(rows.len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod catalog;
pub mod compaction;
pub mod config;
pub mod data;
pub mod error;
pub mod fs;
pub mod manifest;
pub mod memtable;
pub mod mergetree;
pub mod operation;
pub mod snapshot;
pub mod types;

// Re-exports
pub use config::{MergeEngine, Options};
pub use error::{Error, Result};

use compaction::{CompactExecutor, CompactManager, CompactRewriter, CompactionPicker};
use data::{DataFilePathFactory, DataFileWriterFactory};
use fs::{FileIO, LocalFileIO};
use manifest::{manifest_dir, ManifestFile, ManifestList};
use mergetree::{MergeFunction, MergeTreeWriter};
use operation::{FileStoreCommit, FileStoreExpire, FileStoreRead, FileStoreScan};
use parking_lot::Mutex;
use snapshot::{Snapshot, SnapshotManager};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The main table handle.
///
/// Hands out writers, committers, scans, reads and expirations that all
/// share the table's options and file system. The handle keeps no table
/// state in memory: every operation reads the snapshots it needs, so any
/// number of handles in any number of processes can work on one table.
///
/// # Thread Safety
///
/// `FileStore` is `Send + Sync` and can be shared across threads using
/// `Arc<FileStore>`. Writers are not: each bucket has one writer at a time.
pub struct FileStore {
    /// Table directory path
    path: PathBuf,

    /// Configuration options
    options: Options,

    /// File system access
    file_io: Arc<dyn FileIO>,

    /// Snapshot access
    snapshot_manager: SnapshotManager,

    /// Background compaction threads, started by the first async writer
    executor: Mutex<Option<Arc<CompactExecutor>>>,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish()
    }
}

impl FileStore {
    /// Opens the table at `path` on the local file system, creating the
    /// directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the options are invalid or the directory cannot
    /// be created.
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        Self::open_with_file_io(path, options, Arc::new(LocalFileIO::new()))
    }

    /// Opens the table at `path` through the given file system.
    pub fn open_with_file_io<P: AsRef<Path>>(
        path: P,
        options: Options,
        file_io: Arc<dyn FileIO>,
    ) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        file_io.mkdirs(&path)?;

        log::info!("Opening table at {:?}", path);
        Ok(Self {
            snapshot_manager: SnapshotManager::new(file_io.clone(), &path),
            path,
            options,
            file_io,
            executor: Mutex::new(None),
        })
    }

    /// Table directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Table options
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Snapshot access
    pub fn snapshot_manager(&self) -> &SnapshotManager {
        &self.snapshot_manager
    }

    /// The newest snapshot, `None` for an empty table
    pub fn latest_snapshot(&self) -> Result<Option<Snapshot>> {
        self.snapshot_manager.latest_snapshot()
    }

    /// Create the writer of one bucket, restored from the latest snapshot.
    pub fn new_writer(&self, partition: &str, bucket: u32) -> Result<MergeTreeWriter> {
        let plan = self.new_scan().with_partition(partition).with_bucket(bucket).plan()?;
        let restored = plan.files.into_iter().map(|e| e.file).collect();

        let merge_function = MergeFunction::from_engine(&self.options.merge_engine);
        let writer_factory = DataFileWriterFactory::new(
            self.file_io.clone(),
            Arc::new(DataFilePathFactory::new(&self.path, partition, bucket)),
            &self.options,
        );
        let compact_manager = CompactManager::new(
            CompactionPicker::new(&self.options),
            CompactRewriter::new(writer_factory.clone(), merge_function.clone()),
            self.executor()?,
        );

        MergeTreeWriter::new(
            restored,
            self.options.num_levels,
            self.options.write_buffer_size,
            merge_function,
            writer_factory,
            compact_manager,
        )
    }

    /// Create a committer acting as `commit_user`
    pub fn new_commit(&self, commit_user: impl Into<String>) -> FileStoreCommit {
        FileStoreCommit::new(
            commit_user,
            self.snapshot_manager.clone(),
            self.manifest_file(),
            self.manifest_list(),
            &self.options,
        )
    }

    /// Create a scan of the latest snapshot
    pub fn new_scan(&self) -> FileStoreScan {
        FileStoreScan::new(
            self.snapshot_manager.clone(),
            self.manifest_file(),
            self.manifest_list(),
        )
    }

    /// Create a bucket reader
    pub fn new_read(&self) -> FileStoreRead {
        FileStoreRead::new(
            self.file_io.clone(),
            self.path.clone(),
            MergeFunction::from_engine(&self.options.merge_engine),
        )
    }

    /// Create a snapshot expiration
    pub fn new_expire(&self) -> FileStoreExpire {
        FileStoreExpire::new(
            self.file_io.clone(),
            self.path.clone(),
            self.snapshot_manager.clone(),
            self.manifest_file(),
            self.manifest_list(),
            &self.options,
        )
    }

    fn manifest_file(&self) -> ManifestFile {
        ManifestFile::new(
            self.file_io.clone(),
            manifest_dir(&self.path),
            self.options.manifest_target_file_size,
            self.options.compression,
        )
    }

    fn manifest_list(&self) -> ManifestList {
        ManifestList::new(self.file_io.clone(), manifest_dir(&self.path), self.options.compression)
    }

    fn executor(&self) -> Result<Option<Arc<CompactExecutor>>> {
        if !self.options.compaction_async {
            return Ok(None);
        }
        let mut executor = self.executor.lock();
        if executor.is_none() {
            *executor = Some(Arc::new(CompactExecutor::new(self.options.compaction_threads)?));
        }
        Ok(executor.clone())
    }
}
