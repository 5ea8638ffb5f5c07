//! Compaction of the data files of a bucket.
//!
//! Compaction merges files within and across levels, resolving every key
//! through the table's merge function, and replaces its inputs with fewer,
//! larger, non-overlapping files.
//!
//! ## Compaction Strategy
//!
//! We use Leveled Compaction inspired by RocksDB:
//! - Level 0: New files from flush (may overlap)
//! - Level 1+: One sorted run of non-overlapping files
//! - Each level has a size threshold
//!
//! ## Process
//!
//! 1. Pick files for compaction (picker.rs)
//! 2. Merge using multi-way merge iterator (merge.rs)
//! 3. Write rolling files into the output level (rewriter.rs)
//! 4. Hand the before/after file sets back to the writer (manager.rs)
//!
//! Compaction is advisory: a failed attempt deletes its own output, leaves
//! its inputs live, and is reported to the caller.

pub mod executor;
pub mod manager;
pub mod merge;
pub mod picker;
pub mod rewriter;

pub use executor::CompactExecutor;
pub use manager::{CompactManager, CompactResult};
pub use merge::{open_file, MergeIterator, RecordIter, SortMergeReader};
pub use picker::{CompactionPicker, CompactionTask};
pub use rewriter::CompactRewriter;
