//! Data file writers.
//!
//! A writer streams records into one immutable file and produces its
//! [`DataFileMeta`] once closed. Lifecycle:
//!
//! ```text
//! Open --close()--> Closed
//!   \                  |
//!    \--abort()--> Aborted <--abort()--/
//! ```
//!
//! `close()` is the durability barrier and is idempotent; `result()` is only
//! valid after it. Statistics are accumulated while writing, so producing the
//! metadata never re-reads the file.

use crate::config::{CompressionType, Options};
use crate::data::block::{encode_index, BlockBuilder, IndexEntry};
use crate::data::footer::{BlockHandle, Footer};
use crate::data::meta::DataFileMeta;
use crate::data::path::DataFilePathFactory;
use crate::error::{Error, Result};
use crate::fs::{FileIO, OutputStream};
use crate::types::KeyValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Writes records of type `T` into one or more files.
pub trait FileWriter<T> {
    /// What the writer produces once closed.
    type Output;

    /// Append one record. Valid only while open.
    fn write(&mut self, record: &T) -> Result<()>;

    /// Append every record of an iterator.
    fn write_all<'a, I>(&mut self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        for record in records {
            self.write(record)?;
        }
        Ok(())
    }

    /// Number of records written so far.
    fn record_count(&self) -> u64;

    /// Bytes handed to the sink so far.
    fn length(&self) -> u64;

    /// Push buffered records to the sink without closing.
    fn flush(&mut self) -> Result<()>;

    /// Finalize the output. Safe to call more than once.
    fn close(&mut self) -> Result<()>;

    /// The output. Fails unless the writer is closed.
    fn result(&self) -> Result<Self::Output>;

    /// Discard the output and delete any written file. Never fails; delete
    /// failures are logged.
    fn abort(&mut self);
}

/// State of a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Accepting records.
    Open,
    /// Finalized; metadata available.
    Closed,
    /// Discarded; the file is gone.
    Aborted,
}

/// Writes sorted records into one columnar data file.
pub struct DataFileWriter {
    file_io: Arc<dyn FileIO>,
    path: PathBuf,
    file_name: String,
    level: u32,
    out: Option<Box<dyn OutputStream>>,
    block: BlockBuilder,
    index: Vec<IndexEntry>,
    block_size: usize,
    compression: CompressionType,
    position: u64,
    row_count: u64,
    min_key: Option<Vec<u8>>,
    last_key: Option<Vec<u8>>,
    min_sequence: u64,
    max_sequence: u64,
    state: WriterState,
}

impl DataFileWriter {
    /// Create a new file at `path`. Fails if the path already exists.
    pub fn create(
        file_io: Arc<dyn FileIO>,
        path: PathBuf,
        level: u32,
        block_size: usize,
        compression: CompressionType,
    ) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::invalid_argument(format!("Invalid data file path {:?}", path)))?
            .to_string();
        let out = file_io.create(&path)?;

        Ok(Self {
            file_io,
            path,
            file_name,
            level,
            out: Some(out),
            block: BlockBuilder::new(),
            index: Vec::new(),
            block_size,
            compression,
            position: 0,
            row_count: 0,
            min_key: None,
            last_key: None,
            min_sequence: u64::MAX,
            max_sequence: 0,
            state: WriterState::Open,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Path of the file being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            WriterState::Open => Ok(()),
            state => Err(Error::invalid_state(format!(
                "Writer for {} is {:?}, cannot write",
                self.file_name, state
            ))),
        }
    }

    fn sink(&mut self) -> Result<&mut Box<dyn OutputStream>> {
        self.out.as_mut().ok_or_else(|| Error::invalid_state("Data file sink already released"))
    }

    /// Seal the pending block and hand it to the sink
    fn seal_block(&mut self) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }
        self.sink()?;

        let sealed = self.block.finish(self.compression)?;
        self.sink()?.write_all(&sealed)?;

        let handle = BlockHandle::new(self.position, sealed.len() as u64);
        self.position += sealed.len() as u64;
        self.index.push(IndexEntry { last_key: self.last_key.clone().unwrap_or_default(), handle });
        Ok(())
    }
}

impl FileWriter<KeyValue> for DataFileWriter {
    type Output = DataFileMeta;

    fn write(&mut self, kv: &KeyValue) -> Result<()> {
        self.check_open()?;

        if let Some(last) = &self.last_key {
            if kv.key.as_slice() <= last.as_slice() {
                return Err(Error::invalid_argument("Keys must be added in sorted order"));
            }
        }

        self.block.add(kv);
        if self.min_key.is_none() {
            self.min_key = Some(kv.key.clone());
        }
        self.last_key = Some(kv.key.clone());
        self.min_sequence = self.min_sequence.min(kv.sequence);
        self.max_sequence = self.max_sequence.max(kv.sequence);
        self.row_count += 1;

        if self.block.current_size() >= self.block_size {
            self.seal_block()?;
        }
        Ok(())
    }

    fn record_count(&self) -> u64 {
        self.row_count
    }

    fn length(&self) -> u64 {
        self.position
    }

    fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        self.seal_block()?;
        self.sink()?.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        match self.state {
            WriterState::Closed => return Ok(()),
            WriterState::Aborted => {
                let message = format!("Writer for {} was aborted", self.file_name);
                return Err(Error::invalid_state(message));
            }
            WriterState::Open => {}
        }

        self.seal_block()?;

        let index = encode_index(&self.index)?;
        let index_handle = BlockHandle::new(self.position, index.len() as u64);
        let footer = Footer::new(index_handle, self.row_count);

        let out = self.sink()?;
        out.write_all(&index)?;
        footer.write_to(out)?;
        out.sync()?;

        self.position = index_handle.end_offset() + crate::data::FOOTER_SIZE as u64;
        self.out = None;
        self.state = WriterState::Closed;

        log::debug!(
            "Sealed data file {} at level {}: {} records, {} bytes",
            self.file_name,
            self.level,
            self.row_count,
            self.position
        );
        Ok(())
    }

    fn result(&self) -> Result<DataFileMeta> {
        if self.state != WriterState::Closed {
            return Err(Error::invalid_state(
                "Cannot access the file meta unless the writer is closed",
            ));
        }

        Ok(DataFileMeta {
            file_name: self.file_name.clone(),
            file_size: self.position,
            row_count: self.row_count,
            min_key: self.min_key.clone().unwrap_or_default(),
            max_key: self.last_key.clone().unwrap_or_default(),
            min_sequence: if self.row_count == 0 { 0 } else { self.min_sequence },
            max_sequence: self.max_sequence,
            level: self.level,
        })
    }

    fn abort(&mut self) {
        self.out = None;
        self.file_io.delete_or_warn(&self.path);
        if self.state != WriterState::Aborted {
            log::info!("Aborted data file {:?}", self.path);
        }
        self.state = WriterState::Aborted;
    }
}

/// Creates writers for one bucket.
#[derive(Debug, Clone)]
pub struct DataFileWriterFactory {
    file_io: Arc<dyn FileIO>,
    path_factory: Arc<DataFilePathFactory>,
    block_size: usize,
    compression: CompressionType,
    target_file_size: u64,
}

impl DataFileWriterFactory {
    /// Create a factory writing into the bucket of `path_factory`
    pub fn new(
        file_io: Arc<dyn FileIO>,
        path_factory: Arc<DataFilePathFactory>,
        options: &Options,
    ) -> Self {
        Self {
            file_io,
            path_factory,
            block_size: options.block_size,
            compression: options.compression,
            target_file_size: options.target_file_size,
        }
    }

    /// A writer for a single new file at `level`
    pub fn create_writer(&self, level: u32) -> Result<DataFileWriter> {
        let path = self.path_factory.to_path(&self.path_factory.new_file_name());
        DataFileWriter::create(self.file_io.clone(), path, level, self.block_size, self.compression)
    }

    /// A writer that rolls over to new files at the target file size
    pub fn create_rolling_writer(&self, level: u32) -> RollingFileWriter {
        RollingFileWriter {
            factory: self.clone(),
            level,
            current: None,
            results: Vec::new(),
            record_count: 0,
            closed_length: 0,
            state: WriterState::Open,
        }
    }

    /// Path of a file in this bucket
    pub fn to_path(&self, file: &DataFileMeta) -> PathBuf {
        self.path_factory.to_path(&file.file_name)
    }

    /// Delete a data file, logging failures
    pub fn delete(&self, file: &DataFileMeta) {
        self.file_io.delete_or_warn(&self.to_path(file));
    }

    /// The file system
    pub fn file_io(&self) -> &Arc<dyn FileIO> {
        &self.file_io
    }
}

/// Writes sorted records into as many files as the target file size requires.
pub struct RollingFileWriter {
    factory: DataFileWriterFactory,
    level: u32,
    current: Option<DataFileWriter>,
    results: Vec<DataFileMeta>,
    record_count: u64,
    closed_length: u64,
    state: WriterState,
}

impl RollingFileWriter {
    fn roll(&mut self) -> Result<()> {
        if let Some(mut writer) = self.current.take() {
            if let Err(e) = writer.close() {
                self.current = Some(writer);
                return Err(e);
            }
            if writer.record_count() == 0 {
                writer.abort();
            } else {
                self.closed_length += writer.length();
                self.results.push(writer.result()?);
            }
        }
        Ok(())
    }
}

impl FileWriter<KeyValue> for RollingFileWriter {
    type Output = Vec<DataFileMeta>;

    fn write(&mut self, kv: &KeyValue) -> Result<()> {
        if self.state != WriterState::Open {
            return Err(Error::invalid_state(format!("Rolling writer is {:?}", self.state)));
        }

        if self.current.is_none() {
            self.current = Some(self.factory.create_writer(self.level)?);
        }
        if let Some(writer) = self.current.as_mut() {
            writer.write(kv)?;
            self.record_count += 1;
            if writer.length() >= self.factory.target_file_size {
                self.roll()?;
            }
        }
        Ok(())
    }

    fn record_count(&self) -> u64 {
        self.record_count
    }

    fn length(&self) -> u64 {
        self.closed_length + self.current.as_ref().map_or(0, |w| w.length())
    }

    fn flush(&mut self) -> Result<()> {
        match self.current.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self.state {
            WriterState::Closed => Ok(()),
            WriterState::Aborted => Err(Error::invalid_state("Rolling writer was aborted")),
            WriterState::Open => {
                self.roll()?;
                self.state = WriterState::Closed;
                Ok(())
            }
        }
    }

    fn result(&self) -> Result<Vec<DataFileMeta>> {
        if self.state != WriterState::Closed {
            return Err(Error::invalid_state(
                "Cannot access the file metas unless the writer is closed",
            ));
        }
        Ok(self.results.clone())
    }

    fn abort(&mut self) {
        if let Some(mut writer) = self.current.take() {
            writer.abort();
        }
        for file in self.results.drain(..) {
            self.factory.delete(&file);
        }
        self.state = WriterState::Aborted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::reader::DataFileReader;
    use crate::fs::LocalFileIO;
    use crate::types::{Row, RowKind, Value};
    use tempfile::TempDir;

    fn kv(i: u64) -> KeyValue {
        KeyValue::new(
            format!("key{:06}", i).into_bytes(),
            i + 1,
            RowKind::Insert,
            Row::new(vec![Value::Int(i as i64), Value::String(format!("value{:06}", i))]),
        )
    }

    fn factory(dir: &TempDir, options: &Options) -> DataFileWriterFactory {
        let path_factory = Arc::new(DataFilePathFactory::new(dir.path(), "", 0));
        DataFileWriterFactory::new(Arc::new(LocalFileIO::new()), path_factory, options)
    }

    #[test]
    fn test_write_close_result() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir, &Options::default());
        let mut writer = factory.create_writer(0).unwrap();

        for i in 0..100 {
            writer.write(&kv(i)).unwrap();
        }
        assert_eq!(writer.record_count(), 100);
        writer.close().unwrap();

        let meta = writer.result().unwrap();
        assert_eq!(meta.row_count, 100);
        assert_eq!(meta.min_key, b"key000000".to_vec());
        assert_eq!(meta.max_key, b"key000099".to_vec());
        assert_eq!(meta.min_sequence, 1);
        assert_eq!(meta.max_sequence, 100);
        assert_eq!(meta.level, 0);
        assert_eq!(meta.file_size, std::fs::metadata(writer.path()).unwrap().len());
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir, &Options::default());
        let mut writer = factory.create_writer(1).unwrap();
        writer.write(&kv(1)).unwrap();

        writer.close().unwrap();
        let first = writer.result().unwrap();
        writer.close().unwrap();
        assert_eq!(writer.result().unwrap(), first);
    }

    #[test]
    fn test_result_before_close_fails() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir, &Options::default());
        let mut writer = factory.create_writer(0).unwrap();
        writer.write(&kv(1)).unwrap();

        assert!(matches!(writer.result(), Err(Error::InvalidState(_))));
        writer.abort();
    }

    #[test]
    fn test_abort_after_close_deletes_file() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir, &Options::default());
        let mut writer = factory.create_writer(0).unwrap();
        writer.write(&kv(1)).unwrap();
        writer.close().unwrap();
        assert!(writer.path().exists());

        writer.abort();
        assert!(!writer.path().exists());
        assert_eq!(writer.state(), WriterState::Aborted);
        assert!(writer.write(&kv(2)).is_err());

        // aborting twice is harmless
        writer.abort();
    }

    #[test]
    fn test_unsorted_keys_rejected() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir, &Options::default());
        let mut writer = factory.create_writer(0).unwrap();
        writer.write(&kv(5)).unwrap();

        assert!(matches!(writer.write(&kv(3)), Err(Error::InvalidArgument(_))));
        assert!(writer.write(&kv(5)).is_err());
        writer.abort();
    }

    #[test]
    fn test_flush_advances_length() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir, &Options::default());
        let mut writer = factory.create_writer(0).unwrap();
        writer.write(&kv(1)).unwrap();
        assert_eq!(writer.length(), 0);

        writer.flush().unwrap();
        assert!(writer.length() > 0);
        writer.close().unwrap();
    }

    #[test]
    fn test_rolling_writer_splits_files() {
        let dir = TempDir::new().unwrap();
        let options = Options::default().block_size(256).target_file_size(1024);
        let factory = factory(&dir, &options);
        let mut writer = factory.create_rolling_writer(2);

        let records: Vec<_> = (0..500).map(kv).collect();
        writer.write_all(&records).unwrap();
        writer.close().unwrap();

        let files = writer.result().unwrap();
        assert!(files.len() > 1, "expected several files, got {}", files.len());
        assert_eq!(files.iter().map(|f| f.row_count).sum::<u64>(), 500);
        for pair in files.windows(2) {
            assert!(pair[0].max_key < pair[1].min_key);
        }

        // every file reads back
        let mut total = 0;
        for file in &files {
            assert_eq!(file.level, 2);
            let reader = DataFileReader::open(factory.file_io().as_ref(), &factory.to_path(file))
                .unwrap();
            total += reader.records().count();
        }
        assert_eq!(total, 500);
    }

    #[test]
    fn test_rolling_writer_abort_removes_everything() {
        let dir = TempDir::new().unwrap();
        let options = Options::default().block_size(256).target_file_size(1024);
        let factory = factory(&dir, &options);
        let mut writer = factory.create_rolling_writer(0);

        let records: Vec<_> = (0..300).map(kv).collect();
        writer.write_all(&records).unwrap();
        writer.abort();

        let bucket = dir.path().join("bucket-0");
        let left = std::fs::read_dir(&bucket).map(|d| d.count()).unwrap_or(0);
        assert_eq!(left, 0);
    }

    #[test]
    fn test_rolling_writer_empty() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir, &Options::default());
        let mut writer = factory.create_rolling_writer(0);
        writer.close().unwrap();
        assert!(writer.result().unwrap().is_empty());
    }
}
