//! File delta of one write/compaction cycle.

use crate::data::DataFileMeta;
use serde::{Deserialize, Serialize};

/// Files added and removed by one bucket since its last commit.
///
/// `new_files` were flushed by the writer and are committed as an append;
/// `compact_before`/`compact_after` are the inputs and outputs of the
/// compactions that finished in the meantime and are committed separately.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Increment {
    /// Level-0 files produced by flushes
    pub new_files: Vec<DataFileMeta>,
    /// Files replaced by compaction
    pub compact_before: Vec<DataFileMeta>,
    /// Files produced by compaction
    pub compact_after: Vec<DataFileMeta>,
}

impl Increment {
    /// Create an increment from its three file sets
    pub fn new(
        new_files: Vec<DataFileMeta>,
        compact_before: Vec<DataFileMeta>,
        compact_after: Vec<DataFileMeta>,
    ) -> Self {
        Self { new_files, compact_before, compact_after }
    }

    /// Returns true if the increment changes nothing
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty()
            && self.compact_before.is_empty()
            && self.compact_after.is_empty()
    }
}
