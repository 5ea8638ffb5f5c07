//! Configuration options for the table store.
//!
//! All tunables are plain typed fields handed to the store at construction
//! time. Compaction trigger thresholds in particular are host-configurable,
//! the defaults below are only a starting point.

use crate::mergetree::AggregateFunction;
use std::time::Duration;

/// How versions of the same primary key are reduced to one row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MergeEngine {
    /// Keep the latest version of a row.
    #[default]
    Deduplicate,

    /// Merge non-null fields of newer versions over older ones.
    PartialUpdate,

    /// Aggregate each value column with the given function. Columns beyond
    /// the end of the list use [`AggregateFunction::LastNonNullValue`].
    Aggregation(Vec<AggregateFunction>),
}

/// Configuration options for a table.
#[derive(Debug, Clone)]
pub struct Options {
    /// Merge engine used by flush, compaction and reads.
    /// Default: Deduplicate
    pub merge_engine: MergeEngine,

    /// Size threshold for flushing the write buffer to a level-0 file (in bytes).
    /// Default: 4MB
    pub write_buffer_size: usize,

    /// Number of levels in the merge tree.
    /// Default: 7 (Level 0 through Level 6)
    pub num_levels: usize,

    /// Compaction is triggered when level 0 holds more files than this.
    /// Default: 4
    pub level0_compaction_trigger: usize,

    /// Size multiplier between levels.
    /// Default: 10 (Level N+1 is 10x larger than Level N)
    pub size_ratio: u64,

    /// Target size of level 1 (in bytes).
    /// Default: 10MB
    pub level1_target_size: u64,

    /// Data files are rolled over once they reach this size (in bytes).
    /// Default: 8MB
    pub target_file_size: u64,

    /// Block size for data files (in bytes).
    /// Default: 64KB
    pub block_size: usize,

    /// Compression algorithm for data blocks.
    /// Default: CompressionType::Snappy
    pub compression: CompressionType,

    /// Run compactions on background threads instead of inline.
    /// Default: false
    pub compaction_async: bool,

    /// Number of background compaction threads when `compaction_async` is set.
    /// Default: 1
    pub compaction_threads: usize,

    /// Maximum number of retries for a commit that lost the snapshot race.
    /// Default: 10
    pub commit_max_retries: usize,

    /// Manifest files are rolled over once they reach this size (in bytes).
    /// Default: 8MB
    pub manifest_target_file_size: u64,

    /// Minimum number of manifest files before they are merged.
    /// Default: 30
    pub manifest_merge_min_count: usize,

    /// Minimum number of snapshots to retain.
    /// Default: 10
    pub snapshot_num_retained_min: usize,

    /// Maximum number of snapshots to retain.
    /// Default: usize::MAX
    pub snapshot_num_retained_max: usize,

    /// Snapshots younger than this are never expired.
    /// Default: 1 hour
    pub snapshot_time_retained: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            merge_engine: MergeEngine::Deduplicate,
            write_buffer_size: 4 * 1024 * 1024, // 4MB
            num_levels: 7,
            level0_compaction_trigger: 4,
            size_ratio: 10,
            level1_target_size: 10 * 1024 * 1024, // 10MB
            target_file_size: 8 * 1024 * 1024,    // 8MB
            block_size: 64 * 1024,                // 64KB
            compression: CompressionType::default(),
            compaction_async: false,
            compaction_threads: 1,
            commit_max_retries: 10,
            manifest_target_file_size: 8 * 1024 * 1024,
            manifest_merge_min_count: 30,
            snapshot_num_retained_min: 10,
            snapshot_num_retained_max: usize::MAX,
            snapshot_time_retained: Duration::from_secs(60 * 60),
        }
    }
}

/// Compression algorithms supported for data blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    /// No compression.
    None = 0,

    /// Snappy compression (fast, moderate compression ratio).
    #[cfg(feature = "snappy")]
    Snappy = 1,

    /// LZ4 compression (very fast, lower compression ratio).
    #[cfg(feature = "lz4-compression")]
    Lz4 = 2,
}

impl CompressionType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionType::None),
            #[cfg(feature = "snappy")]
            1 => Some(CompressionType::Snappy),
            #[cfg(feature = "lz4-compression")]
            2 => Some(CompressionType::Lz4),
            _ => None,
        }
    }
}

impl Default for CompressionType {
    fn default() -> Self {
        #[cfg(feature = "snappy")]
        return CompressionType::Snappy;

        #[cfg(not(feature = "snappy"))]
        CompressionType::None
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the merge engine.
    pub fn merge_engine(mut self, engine: MergeEngine) -> Self {
        self.merge_engine = engine;
        self
    }

    /// Sets the write buffer size.
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Sets the number of levels.
    pub fn num_levels(mut self, levels: usize) -> Self {
        self.num_levels = levels;
        self
    }

    /// Sets the level 0 file count that triggers compaction.
    pub fn level0_compaction_trigger(mut self, count: usize) -> Self {
        self.level0_compaction_trigger = count;
        self
    }

    /// Sets the size ratio between adjacent levels.
    pub fn size_ratio(mut self, ratio: u64) -> Self {
        self.size_ratio = ratio;
        self
    }

    /// Sets the target size of level 1.
    pub fn level1_target_size(mut self, size: u64) -> Self {
        self.level1_target_size = size;
        self
    }

    /// Sets the target data file size.
    pub fn target_file_size(mut self, size: u64) -> Self {
        self.target_file_size = size;
        self
    }

    /// Sets the block size for data files.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the compression algorithm.
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Runs compactions on background threads.
    pub fn compaction_async(mut self, value: bool) -> Self {
        self.compaction_async = value;
        self
    }

    /// Sets the number of background compaction threads.
    pub fn compaction_threads(mut self, threads: usize) -> Self {
        self.compaction_threads = threads;
        self
    }

    /// Sets the commit retry budget.
    pub fn commit_max_retries(mut self, retries: usize) -> Self {
        self.commit_max_retries = retries;
        self
    }

    /// Sets the size at which manifest files roll over.
    pub fn manifest_target_file_size(mut self, size: u64) -> Self {
        self.manifest_target_file_size = size;
        self
    }

    /// Sets the manifest merge threshold.
    pub fn manifest_merge_min_count(mut self, count: usize) -> Self {
        self.manifest_merge_min_count = count;
        self
    }

    /// Sets the snapshot retention bounds.
    pub fn snapshot_retention(mut self, min: usize, max: usize, time: Duration) -> Self {
        self.snapshot_num_retained_min = min;
        self.snapshot_num_retained_max = max;
        self.snapshot_time_retained = time;
        self
    }

    /// Target size of a level in bytes. Level 0 is governed by file count.
    pub fn target_size_for_level(&self, level: usize) -> u64 {
        if level == 0 {
            return u64::MAX;
        }
        let mut size = self.level1_target_size;
        for _ in 1..level {
            size = size.saturating_mul(self.size_ratio);
        }
        size
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.write_buffer_size == 0 {
            return Err(crate::Error::invalid_argument("write_buffer_size must be > 0"));
        }
        if self.block_size == 0 {
            return Err(crate::Error::invalid_argument("block_size must be > 0"));
        }
        if self.num_levels < 2 {
            return Err(crate::Error::invalid_argument("num_levels must be >= 2"));
        }
        if self.size_ratio < 2 {
            return Err(crate::Error::invalid_argument("size_ratio must be >= 2"));
        }
        if self.target_file_size == 0 || self.manifest_target_file_size == 0 {
            return Err(crate::Error::invalid_argument("target file sizes must be > 0"));
        }
        if self.compaction_async && self.compaction_threads == 0 {
            return Err(crate::Error::invalid_argument(
                "compaction_threads must be > 0 for async compaction",
            ));
        }
        if self.snapshot_num_retained_min == 0 {
            return Err(crate::Error::invalid_argument("snapshot_num_retained_min must be > 0"));
        }
        if self.snapshot_num_retained_max < self.snapshot_num_retained_min {
            return Err(crate::Error::invalid_argument(
                "snapshot_num_retained_max must be >= snapshot_num_retained_min",
            ));
        }
        Ok(())
    }
}
