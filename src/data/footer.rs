//! Data file footer.
//!
//! The footer is a fixed-size (40 bytes) structure at the end of a data file
//! that points to the index block and carries the record count.

use crate::data::{FOOTER_SIZE, FORMAT_VERSION, MAGIC_NUMBER};
use crate::error::{Error, Result};
use std::io::{Read, Write};

/// BlockHandle represents a pointer to a block in the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockHandle {
    /// Offset of the block in the file
    pub offset: u64,
    /// Size of the block in bytes, trailer included
    pub size: u64,
}

impl BlockHandle {
    /// Create a new BlockHandle
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Encode the BlockHandle to bytes (16 bytes: 8 for offset + 8 for size)
    pub fn encode(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Decode a BlockHandle from bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 16 {
            return Err(Error::corruption("BlockHandle too short"));
        }
        Ok(Self { offset: read_u64(&data[0..8]), size: read_u64(&data[8..16]) })
    }

    /// Get the end offset of this block
    pub fn end_offset(&self) -> u64 {
        self.offset + self.size
    }
}

fn read_u64(data: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[..8]);
    u64::from_le_bytes(buf)
}

/// Footer is the last 40 bytes of a data file.
///
/// Format:
/// ```text
/// [index_handle: 16 bytes]
/// [row_count: 8 bytes]
/// [format_version: 4 bytes]
/// [padding: 4 bytes]
/// [magic: 8 bytes]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    /// Handle to the index block
    pub index_handle: BlockHandle,
    /// Number of records in the file
    pub row_count: u64,
}

impl Footer {
    /// Create a new Footer
    pub fn new(index_handle: BlockHandle, row_count: u64) -> Self {
        Self { index_handle, row_count }
    }

    /// Encode the footer to bytes
    pub fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = [0u8; FOOTER_SIZE];
        buf[0..16].copy_from_slice(&self.index_handle.encode());
        buf[16..24].copy_from_slice(&self.row_count.to_le_bytes());
        buf[24..28].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        // bytes 28..32 reserved
        buf[32..40].copy_from_slice(&MAGIC_NUMBER.to_le_bytes());
        buf
    }

    /// Decode a footer from bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != FOOTER_SIZE {
            return Err(Error::corruption(format!(
                "Footer size mismatch: expected {}, got {}",
                FOOTER_SIZE,
                data.len()
            )));
        }

        let magic = read_u64(&data[32..40]);
        if magic != MAGIC_NUMBER {
            return Err(Error::corruption(format!(
                "Invalid data file magic number: expected {:#x}, got {:#x}",
                MAGIC_NUMBER, magic
            )));
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&data[24..28]);
        let version = u32::from_le_bytes(version);
        if version != FORMAT_VERSION {
            return Err(Error::corruption(format!("Unsupported data file version {}", version)));
        }

        Ok(Self {
            index_handle: BlockHandle::decode(&data[0..16])?,
            row_count: read_u64(&data[16..24]),
        })
    }

    /// Write the footer to a writer
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.encode())?;
        Ok(())
    }

    /// Read a footer from a reader
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; FOOTER_SIZE];
        reader.read_exact(&mut buf)?;
        Self::decode(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_footer_encode_decode() {
        let footer = Footer::new(BlockHandle::new(4096, 128), 77);
        let decoded = Footer::decode(&footer.encode()).unwrap();
        assert_eq!(decoded, footer);
        assert_eq!(decoded.index_handle.end_offset(), 4224);
    }

    #[test]
    fn test_footer_bad_magic() {
        let mut bytes = Footer::new(BlockHandle::new(0, 0), 0).encode();
        bytes[39] ^= 0xff;
        assert!(matches!(Footer::decode(&bytes), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_footer_wrong_size() {
        assert!(Footer::decode(&[0u8; 12]).is_err());
    }
}
