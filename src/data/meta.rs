//! Metadata of a sealed data file.

use serde::{Deserialize, Serialize};

/// Immutable descriptor of one sealed data file.
///
/// Created once when a writer closes and never mutated afterwards. Moving a
/// file to another level produces a new descriptor via [`DataFileMeta::upgrade`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataFileMeta {
    /// File name, relative to the bucket directory
    pub file_name: String,
    /// Size of the file in bytes
    pub file_size: u64,
    /// Number of records in the file
    pub row_count: u64,
    /// Smallest key in the file
    pub min_key: Vec<u8>,
    /// Largest key in the file
    pub max_key: Vec<u8>,
    /// Smallest sequence number in the file
    pub min_sequence: u64,
    /// Largest sequence number in the file
    pub max_sequence: u64,
    /// Level the file belongs to
    pub level: u32,
}

impl DataFileMeta {
    /// Returns a copy of this descriptor placed at `level`.
    pub fn upgrade(&self, level: u32) -> Self {
        Self { level, ..self.clone() }
    }

    /// Returns true if this file's key range intersects `[min, max]`.
    pub fn overlaps_range(&self, min: &[u8], max: &[u8]) -> bool {
        self.min_key.as_slice() <= max && min <= self.max_key.as_slice()
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::DataFileMeta;

    /// Builds a descriptor for picker and level tests.
    pub fn meta(name: &str, level: u32, min: &[u8], max: &[u8], size: u64) -> DataFileMeta {
        DataFileMeta {
            file_name: name.to_string(),
            file_size: size,
            row_count: 1,
            min_key: min.to_vec(),
            max_key: max.to_vec(),
            min_sequence: 0,
            max_sequence: 0,
            level,
        }
    }
}
