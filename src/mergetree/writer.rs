//! Writer of one bucket.

use crate::compaction::{CompactManager, CompactResult, RecordIter, SortMergeReader};
use crate::data::{DataFileMeta, DataFileWriterFactory, FileWriter};
use crate::error::{Error, Result};
use crate::memtable::MemTable;
use crate::mergetree::{Increment, Levels, MergeFunction};
use crate::types::{KeyValue, Row, RowKind};
use std::collections::HashSet;

/// Buffers the writes of one bucket, flushes them into level-0 files and
/// keeps the bucket compacted.
///
/// One writer per bucket: sequence numbers are assigned here, so two writers
/// on the same bucket would break last-write-wins ordering.
///
/// Files produced since the last [`prepare_commit`](Self::prepare_commit)
/// are not referenced by any snapshot yet. [`close`](Self::close) deletes
/// them; committed files are never touched.
///
/// A compaction started by a flush never fails that flush: the flushed file
/// is already live, so the failure is held back and reported by the next
/// [`prepare_commit`](Self::prepare_commit). Its inputs stay live.
pub struct MergeTreeWriter {
    memtable: MemTable,
    merge_function: MergeFunction,
    writer_factory: DataFileWriterFactory,
    levels: Levels,
    compact_manager: CompactManager,
    write_buffer_size: usize,
    next_sequence: u64,
    new_files: Vec<DataFileMeta>,
    compact_before: Vec<DataFileMeta>,
    compact_after: Vec<DataFileMeta>,
    compaction_error: Option<Error>,
    closed: bool,
}

impl MergeTreeWriter {
    /// Create a writer on top of the live files of the bucket.
    ///
    /// Sequence numbers continue after the highest one found in `restored`.
    pub fn new(
        restored: Vec<DataFileMeta>,
        num_levels: usize,
        write_buffer_size: usize,
        merge_function: MergeFunction,
        writer_factory: DataFileWriterFactory,
        compact_manager: CompactManager,
    ) -> Result<Self> {
        let next_sequence = restored.iter().map(|f| f.max_sequence + 1).max().unwrap_or(0);
        if !restored.is_empty() {
            log::info!(
                "Restoring writer from {} files, next sequence {}",
                restored.len(),
                next_sequence
            );
        }

        Ok(Self {
            memtable: MemTable::new(),
            merge_function,
            writer_factory,
            levels: Levels::new(restored, num_levels)?,
            compact_manager,
            write_buffer_size,
            next_sequence,
            new_files: Vec::new(),
            compact_before: Vec::new(),
            compact_after: Vec::new(),
            compaction_error: None,
            closed: false,
        })
    }

    /// Buffer one record and return the sequence number assigned to it.
    ///
    /// If the flush this triggers fails, the record stays buffered and goes
    /// out with the next flush. It must not be written again.
    pub fn write(&mut self, kind: RowKind, key: &[u8], row: Row) -> Result<u64> {
        if self.closed {
            return Err(Error::invalid_state("Writer is closed"));
        }
        if kind == RowKind::Delete && !self.merge_function.supports_delete() {
            return Err(Error::invalid_argument(
                "The table's merge engine does not accept delete records",
            ));
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.memtable.put(key, sequence, kind, row);

        if self.memtable.approximate_size() >= self.write_buffer_size {
            self.flush()?;
        }
        Ok(sequence)
    }

    /// Flush the write buffer into level 0 and start a compaction if one is due.
    pub fn flush(&mut self) -> Result<()> {
        if self.memtable.is_empty() {
            return Ok(());
        }

        // the buffer is only dropped once its file is sealed
        let records: Vec<KeyValue> = self.memtable.iter().collect();
        let source: RecordIter = Box::new(records.into_iter().map(Ok));
        let reader = SortMergeReader::new(vec![source], self.merge_function.clone(), false)?;

        let mut writer = self.writer_factory.create_rolling_writer(0);
        let written = reader
            .into_iter()
            .try_for_each(|kv| writer.write(&kv?))
            .and_then(|_| writer.close())
            .and_then(|_| writer.result());
        let files = match written {
            Ok(files) => files,
            Err(e) => {
                writer.abort();
                return Err(e);
            }
        };

        log::debug!(
            "Flushed {} buffered versions into {} level-0 files",
            self.memtable.len(),
            files.len()
        );
        self.memtable = MemTable::new();
        for file in files {
            self.levels.add_level0_file(file.clone());
            self.new_files.push(file);
        }

        if let Err(e) = self.trigger_compaction() {
            log::warn!("Compaction after flush failed, keeping its inputs: {}", e);
            self.compaction_error = Some(e);
        }
        Ok(())
    }

    /// Flush and run a compaction now, waiting for it. `full` merges every
    /// file into the last level.
    ///
    /// A held back failure of an earlier compaction is superseded by this one.
    pub fn compact(&mut self, full: bool) -> Result<()> {
        self.flush()?;
        self.compaction_error = None;
        self.collect_compaction(true)?;
        if self.compact_manager.submit_compaction(&self.levels, full)? {
            self.collect_compaction(true)?;
        }
        Ok(())
    }

    /// Flush and hand over every file change since the last call.
    ///
    /// With `wait_compaction` a running compaction is waited for, so its
    /// result is part of this increment.
    ///
    /// A failed compaction is reported here and leaves the pending changes in
    /// place, so calling again hands them over.
    pub fn prepare_commit(&mut self, wait_compaction: bool) -> Result<Increment> {
        if self.closed {
            return Err(Error::invalid_state("Writer is closed"));
        }
        self.flush()?;
        self.collect_compaction(wait_compaction)?;
        if let Some(e) = self.compaction_error.take() {
            return Err(e);
        }

        Ok(Increment::new(
            std::mem::take(&mut self.new_files),
            std::mem::take(&mut self.compact_before),
            std::mem::take(&mut self.compact_after),
        ))
    }

    /// Stop the writer, deleting every file not handed over by
    /// [`prepare_commit`](Self::prepare_commit).
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Err(e) = self.collect_compaction(true) {
            log::warn!("Discarding failed compaction on close: {}", e);
        }

        let uncommitted: Vec<_> =
            self.new_files.drain(..).chain(self.compact_after.drain(..)).collect();
        for file in &uncommitted {
            self.writer_factory.delete(file);
        }
        self.compact_before.clear();
        self.compaction_error = None;
        if !uncommitted.is_empty() {
            log::info!("Deleted {} uncommitted files on close", uncommitted.len());
        }
        Ok(())
    }

    /// Current level structure
    pub fn levels(&self) -> &Levels {
        &self.levels
    }

    /// Sequence number the next write will get
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Returns true while a compaction is running or waiting to be collected
    pub fn is_compacting(&self) -> bool {
        self.compact_manager.is_compacting()
    }

    fn trigger_compaction(&mut self) -> Result<()> {
        self.collect_compaction(false)?;
        if self.compact_manager.submit_compaction(&self.levels, false)? {
            self.collect_compaction(false)?;
        }
        Ok(())
    }

    fn collect_compaction(&mut self, blocking: bool) -> Result<()> {
        if let Some(result) = self.compact_manager.get_compaction_result(blocking)? {
            self.apply_compact_result(result)?;
        }
        Ok(())
    }

    fn apply_compact_result(&mut self, result: CompactResult) -> Result<()> {
        if let Err(e) = self.levels.update(&result.before, &result.after) {
            // outputs never reached the level structure, nothing references them
            let inputs: HashSet<_> = result.before.iter().map(|f| f.file_name.as_str()).collect();
            for file in result.after.iter().filter(|f| !inputs.contains(f.file_name.as_str())) {
                self.writer_factory.delete(file);
            }
            return Err(e);
        }

        let outputs: HashSet<_> = result.after.iter().map(|f| f.file_name.as_str()).collect();
        for file in &result.before {
            let pending = self
                .compact_after
                .iter()
                .position(|f| f.file_name == file.file_name && f.level == file.level);
            match pending {
                // produced by an earlier, still uncommitted compaction: no
                // snapshot knows it, so it can go right away unless it was
                // only moved to another level
                Some(pos) => {
                    self.compact_after.remove(pos);
                    if !outputs.contains(file.file_name.as_str()) {
                        self.writer_factory.delete(file);
                    }
                }
                None => self.compact_before.push(file.clone()),
            }
        }
        self.compact_after.extend(result.after);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compaction::{CompactRewriter, CompactionPicker};
    use crate::config::{MergeEngine, Options};
    use crate::data::{DataFilePathFactory, DataFileReader};
    use crate::fs::{FileIO, LocalFileIO};
    use crate::types::Value;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn writer(dir: &TempDir, options: &Options, restored: Vec<DataFileMeta>) -> MergeTreeWriter {
        let factory = DataFileWriterFactory::new(
            Arc::new(LocalFileIO::new()),
            Arc::new(DataFilePathFactory::new(dir.path(), "", 0)),
            options,
        );
        let function = MergeFunction::from_engine(&options.merge_engine);
        let manager = CompactManager::new(
            CompactionPicker::new(options),
            CompactRewriter::new(factory.clone(), function.clone()),
            None,
        );
        MergeTreeWriter::new(
            restored,
            options.num_levels,
            options.write_buffer_size,
            function,
            factory,
            manager,
        )
        .unwrap()
    }

    fn row(v: i64) -> Row {
        Row::new(vec![Value::Int(v)])
    }

    fn read(dir: &TempDir, file: &DataFileMeta) -> Vec<KeyValue> {
        let path = dir.path().join("bucket-0").join(&file.file_name);
        DataFileReader::open(&LocalFileIO::new(), &path)
            .unwrap()
            .read_all()
            .unwrap()
    }

    #[test]
    fn test_flush_folds_versions() {
        let dir = TempDir::new().unwrap();
        let mut writer = writer(&dir, &Options::default(), vec![]);

        assert_eq!(writer.write(RowKind::Insert, b"a", row(1)).unwrap(), 0);
        writer.write(RowKind::Insert, b"a", row(2)).unwrap();
        writer.write(RowKind::Insert, b"b", row(3)).unwrap();
        writer.write(RowKind::Delete, b"b", Row::default()).unwrap();

        let increment = writer.prepare_commit(true).unwrap();
        assert_eq!(increment.new_files.len(), 1);
        assert!(increment.compact_before.is_empty());

        let records = read(&dir, &increment.new_files[0]);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, row(2));
        assert_eq!(records[0].sequence, 1);
        // the tombstone is kept for older files of other writers' commits
        assert_eq!(records[1].kind, RowKind::Delete);

        // nothing new since the last call
        assert!(writer.prepare_commit(true).unwrap().is_empty());
    }

    #[test]
    fn test_compaction_after_flushes() {
        let dir = TempDir::new().unwrap();
        let options = Options::default().level0_compaction_trigger(2);
        let mut writer = writer(&dir, &options, vec![]);

        for round in 0..3 {
            writer.write(RowKind::Insert, b"k", row(round)).unwrap();
            writer.flush().unwrap();
        }

        let increment = writer.prepare_commit(true).unwrap();
        assert_eq!(increment.new_files.len(), 3);
        assert_eq!(increment.compact_before.len(), 3);
        assert_eq!(increment.compact_after.len(), 1);
        assert!(writer.levels().level0().is_empty());

        let records = read(&dir, &increment.compact_after[0]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, row(2));
    }

    #[test]
    fn test_recompacted_uncommitted_file_is_deleted() {
        let dir = TempDir::new().unwrap();
        let options = Options::default().level0_compaction_trigger(1).num_levels(3);
        let mut writer = writer(&dir, &options, vec![]);

        writer.write(RowKind::Insert, b"a", row(1)).unwrap();
        writer.flush().unwrap();
        writer.write(RowKind::Insert, b"a", row(2)).unwrap();
        writer.flush().unwrap();
        let intermediate = writer.levels().run_of_level(1).files()[0].clone();

        writer.write(RowKind::Insert, b"a", row(3)).unwrap();
        writer.compact(true).unwrap();
        let increment = writer.prepare_commit(true).unwrap();

        // no snapshot ever saw the intermediate output
        let path = dir.path().join("bucket-0").join(&intermediate.file_name);
        assert!(!path.exists());
        assert!(!increment.compact_after.iter().any(|f| f.file_name == intermediate.file_name));
        assert!(increment.compact_before.iter().all(|f| f.level == 0));
        assert_eq!(increment.compact_before.len(), 3);
        assert_eq!(increment.compact_after.len(), 1);
        assert_eq!(increment.compact_after[0].level, 2);
        assert_eq!(read(&dir, &increment.compact_after[0])[0].value, row(3));
    }

    #[test]
    fn test_close_deletes_uncommitted() {
        let dir = TempDir::new().unwrap();
        let mut writer = writer(&dir, &Options::default(), vec![]);

        writer.write(RowKind::Insert, b"a", row(1)).unwrap();
        let committed = writer.prepare_commit(true).unwrap();
        writer.write(RowKind::Insert, b"b", row(2)).unwrap();
        writer.flush().unwrap();
        writer.close().unwrap();

        let files = LocalFileIO::new().list(&dir.path().join("bucket-0")).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with(&committed.new_files[0].file_name));
        assert!(writer.write(RowKind::Insert, b"c", row(3)).is_err());
    }

    #[test]
    fn test_restore_continues_sequence() {
        let dir = TempDir::new().unwrap();
        let mut first = writer(&dir, &Options::default(), vec![]);
        for i in 0..5 {
            first.write(RowKind::Insert, format!("k{}", i).as_bytes(), row(i)).unwrap();
        }
        let increment = first.prepare_commit(true).unwrap();

        let second = writer(&dir, &Options::default(), increment.new_files.clone());
        assert_eq!(second.next_sequence(), 5);
        assert_eq!(second.levels().level0().len(), 1);
    }

    #[test]
    fn test_partial_update_rejects_delete() {
        let dir = TempDir::new().unwrap();
        let options = Options::default().merge_engine(MergeEngine::PartialUpdate);
        let mut writer = writer(&dir, &options, vec![]);
        assert!(matches!(
            writer.write(RowKind::Delete, b"a", Row::default()),
            Err(Error::InvalidArgument(_))
        ));
    }
}
