//! Locations of data files.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Data file extension
pub const DATA_FILE_SUFFIX: &str = ".dat";

/// Produces unique data file names inside one bucket directory.
///
/// Every factory draws a random prefix, so writers in different processes
/// never collide on a name; the counter keeps names unique within one.
#[derive(Debug)]
pub struct DataFilePathFactory {
    bucket_dir: PathBuf,
    uuid: String,
    counter: AtomicU64,
}

impl DataFilePathFactory {
    /// Creates a factory for `<table>/<partition>/bucket-<n>`.
    /// An empty partition places the bucket directly under the table.
    pub fn new(table_path: &Path, partition: &str, bucket: u32) -> Self {
        Self {
            bucket_dir: bucket_dir(table_path, partition, bucket),
            uuid: uuid::Uuid::new_v4().to_string(),
            counter: AtomicU64::new(0),
        }
    }

    /// A fresh file name that has never been handed out.
    pub fn new_file_name(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("data-{}-{}{}", self.uuid, n, DATA_FILE_SUFFIX)
    }

    /// Absolute path of a file in this bucket.
    pub fn to_path(&self, file_name: &str) -> PathBuf {
        self.bucket_dir.join(file_name)
    }

    /// The bucket directory.
    pub fn bucket_dir(&self) -> &Path {
        &self.bucket_dir
    }
}

/// Directory holding the data files of one bucket.
pub fn bucket_dir(table_path: &Path, partition: &str, bucket: u32) -> PathBuf {
    let mut dir = table_path.to_path_buf();
    if !partition.is_empty() {
        dir.push(partition);
    }
    dir.push(format!("bucket-{}", bucket));
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_names() {
        let factory = DataFilePathFactory::new(Path::new("/t"), "dt=1", 3);
        let a = factory.new_file_name();
        let b = factory.new_file_name();
        assert_ne!(a, b);
        assert!(a.ends_with(DATA_FILE_SUFFIX));
        assert_eq!(factory.to_path(&a), PathBuf::from("/t/dt=1/bucket-3").join(&a));

        let other = DataFilePathFactory::new(Path::new("/t"), "dt=1", 3);
        assert_ne!(other.new_file_name(), a);
    }

    #[test]
    fn test_unpartitioned_bucket_dir() {
        assert_eq!(bucket_dir(Path::new("/t"), "", 0), PathBuf::from("/t/bucket-0"));
    }
}
