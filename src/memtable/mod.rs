//! # MemTable - In-Memory Write Buffer
//!
//! The MemTable buffers the writes of one bucket until they are flushed to a
//! level-0 data file. It uses a SkipList so that concurrent readers never
//! block the writer.
//!
//! ## Design
//!
//! - Based on crossbeam-skiplist for lock-free concurrent access
//! - Every write is kept as its own version, keyed by (key, sequence)
//! - Tracks size to determine when to flush to disk
//! - Iterates versions in (key ascending, sequence descending) order

mod internal_key;

pub use internal_key::InternalKey;

use crate::types::{KeyValue, Row, RowKind};
use crossbeam_skiplist::SkipMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Per-entry bookkeeping overhead counted towards the buffer size
const ENTRY_OVERHEAD: usize = 16;

/// MemTable stores recent writes in memory using a SkipList.
///
/// # Example
///
/// ```rust
/// use tablestore::memtable::MemTable;
/// use tablestore::types::{Row, RowKind, Value};
///
/// let memtable = MemTable::new();
/// memtable.put(b"key1", 1, RowKind::Insert, Row::new(vec![Value::Int(1)]));
/// assert_eq!(memtable.get(b"key1").unwrap().sequence, 1);
/// ```
pub struct MemTable {
    data: SkipMap<InternalKey, (RowKind, Row)>,

    /// Approximate size in bytes (keys + values)
    size: AtomicUsize,
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MemTable {
    /// Creates a new empty MemTable.
    pub fn new() -> Self {
        Self { data: SkipMap::new(), size: AtomicUsize::new(0) }
    }

    /// Inserts one version of a key.
    pub fn put(&self, key: &[u8], sequence: u64, kind: RowKind, row: Row) {
        let entry_size = key.len() + row.approximate_size() + ENTRY_OVERHEAD;
        self.data.insert(InternalKey::new(key.to_vec(), sequence), (kind, row));
        self.size.fetch_add(entry_size, Ordering::Relaxed);
    }

    /// Returns the newest version of a key, tombstones included.
    pub fn get(&self, key: &[u8]) -> Option<KeyValue> {
        let lower_bound = InternalKey::new(key.to_vec(), u64::MAX);
        let entry = self.data.lower_bound(std::ops::Bound::Included(&lower_bound))?;
        if entry.key().user_key() != key {
            return None;
        }
        let (kind, row) = entry.value();
        Some(KeyValue::new(key.to_vec(), entry.key().sequence(), *kind, row.clone()))
    }

    /// Returns the approximate size of the MemTable in bytes.
    pub fn approximate_size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Returns the number of versions in the MemTable.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the MemTable contains no entries.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterates every version in (key ascending, sequence descending) order.
    pub fn iter(&self) -> impl Iterator<Item = KeyValue> + '_ {
        self.data.iter().map(|entry| {
            let (kind, row) = entry.value();
            let key = entry.key();
            KeyValue::new(key.user_key().to_vec(), key.sequence(), *kind, row.clone())
        })
    }
}
