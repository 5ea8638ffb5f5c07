//! Reading the merged rows of a bucket.

use crate::compaction::{open_file, RecordIter, SortMergeReader};
use crate::data::{bucket_dir, DataFileMeta};
use crate::error::Result;
use crate::fs::FileIO;
use crate::mergetree::MergeFunction;
use crate::types::KeyValue;
use std::path::PathBuf;
use std::sync::Arc;

/// Reads buckets as the merge function sees them: one record per key,
/// deleted keys dropped.
#[derive(Debug, Clone)]
pub struct FileStoreRead {
    file_io: Arc<dyn FileIO>,
    table_path: PathBuf,
    merge_function: MergeFunction,
}

impl FileStoreRead {
    /// Create a reader for the table at `table_path`
    pub fn new(
        file_io: Arc<dyn FileIO>,
        table_path: PathBuf,
        merge_function: MergeFunction,
    ) -> Self {
        Self { file_io, table_path, merge_function }
    }

    /// Merge the given live files of one bucket into a record stream
    pub fn create_reader(
        &self,
        partition: &str,
        bucket: u32,
        files: &[DataFileMeta],
    ) -> Result<SortMergeReader> {
        let dir = bucket_dir(&self.table_path, partition, bucket);
        let sources = files
            .iter()
            .map(|f| open_file(self.file_io.as_ref(), &dir.join(&f.file_name)))
            .collect::<Result<Vec<RecordIter>>>()?;
        SortMergeReader::new(sources, self.merge_function.clone(), true)
    }

    /// Collect every record of one bucket
    pub fn read(
        &self,
        partition: &str,
        bucket: u32,
        files: &[DataFileMeta],
    ) -> Result<Vec<KeyValue>> {
        self.create_reader(partition, bucket, files)?.collect()
    }
}
