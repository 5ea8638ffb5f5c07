//! Unit of work handed from writers to the committer.

use crate::error::{Error, Result};
use crate::mergetree::Increment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The increments of every bucket a writer touched, tagged with an
/// identifier that grows with each commit of the same user.
///
/// Committables can cross a process boundary (a checkpoint, a coordinator),
/// so they have a versioned binary form, see [`ManifestCommittableSerializer`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestCommittable {
    /// Monotonic identifier of the commit within its user
    pub identifier: u64,
    /// Increment per (partition, bucket)
    pub increments: BTreeMap<(String, u32), Increment>,
}

impl ManifestCommittable {
    /// An empty committable
    pub fn new(identifier: u64) -> Self {
        Self { identifier, increments: BTreeMap::new() }
    }

    /// Add the increment of one bucket. Increments of the same bucket are
    /// concatenated.
    pub fn add_increment(
        &mut self,
        partition: impl Into<String>,
        bucket: u32,
        increment: Increment,
    ) {
        let slot = self.increments.entry((partition.into(), bucket)).or_default();
        slot.new_files.extend(increment.new_files);
        slot.compact_before.extend(increment.compact_before);
        slot.compact_after.extend(increment.compact_after);
    }

    /// Returns true if no bucket has any change
    pub fn is_empty(&self) -> bool {
        self.increments.values().all(Increment::is_empty)
    }
}

/// Binary form of [`ManifestCommittable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestCommittableSerializer;

impl ManifestCommittableSerializer {
    /// Version written by [`serialize`](Self::serialize)
    pub const VERSION: u32 = 1;

    /// Current version
    pub fn version(&self) -> u32 {
        Self::VERSION
    }

    /// Encode a committable
    pub fn serialize(&self, committable: &ManifestCommittable) -> Result<Vec<u8>> {
        Ok(bincode::serialize(committable)?)
    }

    /// Decode a committable written with `version`
    pub fn deserialize(&self, version: u32, bytes: &[u8]) -> Result<ManifestCommittable> {
        if version != Self::VERSION {
            return Err(Error::invalid_argument(format!(
                "Expecting committable version {}, got {}",
                Self::VERSION,
                version
            )));
        }
        Ok(bincode::deserialize(bytes)?)
    }
}
