//! Data file reader.
//!
//! Opens a sealed data file, validates its footer and index, and streams the
//! records back in key order one block at a time.

use crate::data::block::{decode_block, decode_index, IndexEntry};
use crate::data::footer::{BlockHandle, Footer};
use crate::data::{BLOCK_TRAILER_SIZE, FOOTER_SIZE};
use crate::error::{Error, Result};
use crate::fs::{FileIO, InputStream};
use crate::types::KeyValue;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Read access to one data file.
pub struct DataFileReader {
    input: Box<dyn InputStream>,
    path: PathBuf,
    index: Vec<IndexEntry>,
    footer: Footer,
    file_size: u64,
}

impl std::fmt::Debug for DataFileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFileReader")
            .field("path", &self.path)
            .field("blocks", &self.index.len())
            .field("footer", &self.footer)
            .field("file_size", &self.file_size)
            .finish()
    }
}

impl DataFileReader {
    /// Open a data file for reading
    pub fn open(file_io: &dyn FileIO, path: &Path) -> Result<Self> {
        let mut input = file_io.open(path)?;

        let file_size = input.seek(SeekFrom::End(0))?;
        if file_size < FOOTER_SIZE as u64 {
            return Err(Error::corruption(format!(
                "File too small to be a valid data file: {:?}",
                path
            )));
        }

        input.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let footer = Footer::read_from(&mut input)?;

        let index_handle = footer.index_handle;
        if index_handle.end_offset() + FOOTER_SIZE as u64 != file_size {
            return Err(Error::corruption(format!(
                "Index block of {:?} does not end at the footer",
                path
            )));
        }

        let index_data = read_block_data(input.as_mut(), &index_handle)?;
        let index = decode_index(&index_data)?;
        if index.iter().any(|e| e.handle.end_offset() > index_handle.offset) {
            return Err(Error::corruption(format!("Data block of {:?} overlaps the index", path)));
        }

        Ok(Self { input, path: path.to_path_buf(), index, footer, file_size })
    }

    /// Number of records recorded in the footer
    pub fn row_count(&self) -> u64 {
        self.footer.row_count
    }

    /// Number of data blocks
    pub fn num_blocks(&self) -> usize {
        self.index.len()
    }

    /// Size of the file in bytes
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Stream every record in key order
    pub fn records(self) -> RecordReader {
        RecordReader {
            input: self.input,
            index: self.index.into_iter(),
            current: Vec::new().into_iter(),
            failed: false,
        }
    }

    /// Read every record into memory
    pub fn read_all(self) -> Result<Vec<KeyValue>> {
        self.records().collect()
    }
}

fn read_block_data(input: &mut dyn InputStream, handle: &BlockHandle) -> Result<Vec<u8>> {
    if (handle.size as usize) < BLOCK_TRAILER_SIZE {
        return Err(Error::corruption("Block size too small"));
    }
    input.seek(SeekFrom::Start(handle.offset))?;
    let mut buffer = vec![0u8; handle.size as usize];
    input.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// Lazily decodes the blocks of a data file.
///
/// Yields `Err` once on the first corrupt or unreadable block and then stops.
pub struct RecordReader {
    input: Box<dyn InputStream>,
    index: std::vec::IntoIter<IndexEntry>,
    current: std::vec::IntoIter<KeyValue>,
    failed: bool,
}

impl Iterator for RecordReader {
    type Item = Result<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(kv) = self.current.next() {
                return Some(Ok(kv));
            }

            let entry = self.index.next()?;
            let block = read_block_data(self.input.as_mut(), &entry.handle)
                .and_then(|data| decode_block(&data));
            match block {
                Ok(records) => self.current = records.into_iter(),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
