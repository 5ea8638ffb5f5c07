//! Columnar data blocks.
//!
//! A block holds a batch of records laid out column by column: all keys,
//! then all sequence numbers, then all row kinds, then one column per value
//! field. The batch is bincode encoded, optionally compressed, and sealed
//! with a trailer:
//!
//! ```text
//! [payload...][compression_type: 1 byte][crc32 of payload: 4 bytes]
//! ```

use crate::config::CompressionType;
use crate::data::footer::BlockHandle;
use crate::data::BLOCK_TRAILER_SIZE;
use crate::error::{Error, Result};
use crate::types::{KeyValue, Row, RowKind, Value};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ColumnBatch {
    keys: Vec<Vec<u8>>,
    sequences: Vec<u64>,
    kinds: Vec<u8>,
    arities: Vec<u32>,
    columns: Vec<Vec<Value>>,
}

/// Accumulates records into a columnar block.
#[derive(Debug, Default)]
pub struct BlockBuilder {
    batch: ColumnBatch,
    size: usize,
}

impl BlockBuilder {
    /// Create an empty block builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record to the block
    pub fn add(&mut self, kv: &KeyValue) {
        let rows = self.batch.keys.len();
        let arity = kv.value.arity();

        self.batch.keys.push(kv.key.clone());
        self.batch.sequences.push(kv.sequence);
        self.batch.kinds.push(kv.kind.as_u8());
        self.batch.arities.push(arity as u32);

        // a wider row than seen so far opens new columns padded with NULLs
        while self.batch.columns.len() < arity {
            self.batch.columns.push(vec![Value::Null; rows]);
        }
        for (pos, column) in self.batch.columns.iter_mut().enumerate() {
            column.push(kv.value.get(pos).clone());
        }

        self.size += kv.approximate_size();
    }

    /// Number of records in the block
    pub fn len(&self) -> usize {
        self.batch.keys.len()
    }

    /// Returns true if no record was added
    pub fn is_empty(&self) -> bool {
        self.batch.keys.is_empty()
    }

    /// Approximate encoded size of the block
    pub fn current_size(&self) -> usize {
        self.size
    }

    /// Encode and seal the block, leaving the builder empty
    pub fn finish(&mut self, compression: CompressionType) -> Result<Bytes> {
        let batch = std::mem::take(&mut self.batch);
        self.size = 0;
        let raw = bincode::serialize(&batch)?;
        seal_block(&raw, compression)
    }
}

/// Decode the records of a sealed block.
pub fn decode_block(sealed: &[u8]) -> Result<Vec<KeyValue>> {
    let raw = open_block(sealed)?;
    let batch: ColumnBatch = bincode::deserialize(&raw)?;

    let rows = batch.keys.len();
    if batch.sequences.len() != rows
        || batch.kinds.len() != rows
        || batch.arities.len() != rows
        || batch.columns.iter().any(|c| c.len() != rows)
    {
        return Err(Error::corruption("Block columns have mismatched lengths"));
    }

    let num_columns = batch.columns.len();
    let mut columns: Vec<_> = batch.columns.into_iter().map(|c| c.into_iter()).collect();
    let mut records = Vec::with_capacity(rows);

    for (row, key) in batch.keys.into_iter().enumerate() {
        let arity = batch.arities[row] as usize;
        if arity > num_columns {
            return Err(Error::corruption("Row arity exceeds block columns"));
        }
        let kind = RowKind::from_u8(batch.kinds[row])
            .ok_or_else(|| Error::corruption(format!("Invalid row kind {}", batch.kinds[row])))?;

        let mut fields = Vec::with_capacity(arity);
        for (pos, column) in columns.iter_mut().enumerate() {
            let value = column.next().unwrap_or_default();
            if pos < arity {
                fields.push(value);
            }
        }

        records.push(KeyValue { key, sequence: batch.sequences[row], kind, value: Row(fields) });
    }

    Ok(records)
}

/// Entry of the index block: the last key of a data block and its location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Largest key in the block
    pub last_key: Vec<u8>,
    /// Location of the block
    pub handle: BlockHandle,
}

/// Encode and seal the index block.
pub fn encode_index(entries: &[IndexEntry]) -> Result<Bytes> {
    let raw = bincode::serialize(entries)?;
    seal_block(&raw, CompressionType::None)
}

/// Decode a sealed index block.
pub fn decode_index(sealed: &[u8]) -> Result<Vec<IndexEntry>> {
    let raw = open_block(sealed)?;
    Ok(bincode::deserialize(&raw)?)
}

/// Compress `raw` and append the compression tag and checksum.
pub fn seal_block(raw: &[u8], compression: CompressionType) -> Result<Bytes> {
    let payload = compress(raw, compression)?;

    let mut buf = BytesMut::with_capacity(payload.len() + BLOCK_TRAILER_SIZE);
    buf.put_slice(&payload);
    buf.put_u8(compression as u8);
    // checksum is computed on the compressed payload
    buf.put_u32_le(crc32fast::hash(&payload));
    Ok(buf.freeze())
}

/// Verify the trailer of a sealed block and return the decompressed payload.
pub fn open_block(sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < BLOCK_TRAILER_SIZE {
        return Err(Error::corruption("Block size too small"));
    }

    let payload_len = sealed.len() - BLOCK_TRAILER_SIZE;
    let payload = &sealed[..payload_len];
    let compression_type = sealed[payload_len];
    let mut checksum = [0u8; 4];
    checksum.copy_from_slice(&sealed[payload_len + 1..]);
    let stored = u32::from_le_bytes(checksum);

    let computed = crc32fast::hash(payload);
    if computed != stored {
        return Err(Error::ChecksumMismatch { expected: stored, actual: computed });
    }

    let compression = CompressionType::from_u8(compression_type)
        .ok_or_else(|| Error::corruption("Invalid compression type"))?;
    decompress(payload, compression)
}

fn compress(data: &[u8], compression: CompressionType) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(data.to_vec()),
        #[cfg(feature = "snappy")]
        CompressionType::Snappy => snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| Error::internal(format!("Compression failed: {}", e))),
        #[cfg(feature = "lz4-compression")]
        CompressionType::Lz4 => Ok(lz4::block::compress(data, None, true)?),
    }
}

fn decompress(data: &[u8], compression: CompressionType) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(data.to_vec()),
        #[cfg(feature = "snappy")]
        CompressionType::Snappy => snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| Error::corruption(format!("Decompression failed: {}", e))),
        #[cfg(feature = "lz4-compression")]
        CompressionType::Lz4 => Ok(lz4::block::decompress(data, None)?),
    }
}
