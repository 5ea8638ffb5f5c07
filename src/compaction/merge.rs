//! Multi-way merge of sorted record streams.
//!
//! [`MergeIterator`] merges any number of key-ordered streams into one stream
//! ordered by key ascending and, for equal keys, sequence number descending.
//! [`SortMergeReader`] sits on top of it and resolves every key through a
//! [`MergeFunction`].

use crate::data::DataFileReader;
use crate::error::{Error, Result};
use crate::fs::FileIO;
use crate::mergetree::MergeFunction;
use crate::types::{KeyValue, RowKind};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::iter::Peekable;
use std::path::Path;

/// A sorted stream of records.
pub type RecordIter = Box<dyn Iterator<Item = Result<KeyValue>> + Send>;

/// Open a data file as a record stream.
pub fn open_file(file_io: &dyn FileIO, path: &Path) -> Result<RecordIter> {
    Ok(Box::new(DataFileReader::open(file_io, path)?.records()))
}

/// Entry in the merge heap
struct MergeEntry {
    kv: KeyValue,
    source: usize,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: the smallest key and, for equal keys,
        // the highest sequence must compare greatest
        other
            .kv
            .key
            .cmp(&self.kv.key)
            .then_with(|| self.kv.sequence.cmp(&other.kv.sequence))
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Multi-way merge iterator over sorted record streams.
///
/// An error from any source is yielded once and ends the stream; records
/// are never silently dropped.
pub struct MergeIterator {
    heap: BinaryHeap<MergeEntry>,
    sources: Vec<RecordIter>,
    pending_error: Option<Error>,
    failed: bool,
}

impl MergeIterator {
    /// Create a merge iterator, pulling the first record of every source.
    pub fn new(mut sources: Vec<RecordIter>) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (source, iter) in sources.iter_mut().enumerate() {
            if let Some(kv) = iter.next() {
                heap.push(MergeEntry { kv: kv?, source });
            }
        }
        Ok(Self { heap, sources, pending_error: None, failed: false })
    }

    fn advance(&mut self, source: usize) {
        match self.sources[source].next() {
            Some(Ok(kv)) => self.heap.push(MergeEntry { kv, source }),
            Some(Err(e)) => self.pending_error = Some(e),
            None => {}
        }
    }
}

impl Iterator for MergeIterator {
    type Item = Result<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(e) = self.pending_error.take() {
            self.failed = true;
            return Some(Err(e));
        }

        let entry = self.heap.pop()?;
        self.advance(entry.source);
        Some(Ok(entry.kv))
    }
}

/// Resolves each key of a merged stream through a merge function.
///
/// All versions of a key are fed, oldest first, into a fresh copy of the
/// merge function. A key whose result is absent is dropped when
/// `drop_delete` is set; otherwise its newest tombstone is kept so that it
/// still shadows older versions in lower levels.
pub struct SortMergeReader {
    records: Peekable<MergeIterator>,
    merge_function: MergeFunction,
    drop_delete: bool,
    failed: bool,
}

impl SortMergeReader {
    /// Create a reader over `sources`.
    pub fn new(
        sources: Vec<RecordIter>,
        merge_function: MergeFunction,
        drop_delete: bool,
    ) -> Result<Self> {
        Ok(Self {
            records: MergeIterator::new(sources)?.peekable(),
            merge_function,
            drop_delete,
            failed: false,
        })
    }

    /// Collect the versions of the next key, newest first.
    fn next_group(&mut self) -> Option<Result<Vec<KeyValue>>> {
        let first = match self.records.next()? {
            Ok(kv) => kv,
            Err(e) => return Some(Err(e)),
        };

        let mut versions = vec![first];
        loop {
            let same_key = match self.records.peek() {
                Some(Ok(kv)) => kv.key == versions[0].key,
                // an error must surface before the group is resolved
                Some(Err(_)) => true,
                None => false,
            };
            if !same_key {
                break;
            }
            match self.records.next() {
                Some(Ok(kv)) => versions.push(kv),
                Some(Err(e)) => return Some(Err(e)),
                None => break,
            }
        }
        Some(Ok(versions))
    }

    fn merge(&self, mut versions: Vec<KeyValue>) -> Result<Option<KeyValue>> {
        versions.reverse();

        let mut function = self.merge_function.copy();
        for version in &versions {
            function.add(version)?;
        }
        if let Some(kv) = function.value() {
            return Ok(Some(kv));
        }

        Ok(match versions.pop() {
            Some(latest) if !self.drop_delete && latest.kind == RowKind::Delete => Some(latest),
            _ => None,
        })
    }
}

impl Iterator for SortMergeReader {
    type Item = Result<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.failed {
            let merged = self.next_group()?.and_then(|versions| self.merge(versions));
            match merged {
                Ok(Some(kv)) => return Some(Ok(kv)),
                Ok(None) => continue,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
