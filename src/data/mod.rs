//! Immutable data files.
//!
//! A data file holds the records of one bucket sorted by key, with at most
//! one record per key. Files are written once, sealed, and never modified.
//!
//! ## File Format
//!
//! ```text
//! [Data Block 1]
//! [Data Block 2]
//! ...
//! [Data Block N]
//! [Index Block]     // last key + handle of every data block
//! [Footer: 40B]     // index handle, row count, version, magic
//! ```
//!
//! Data blocks are columnar batches (see [`block`]). Every block, the index
//! included, ends with a compression tag and a CRC32 of its payload.

pub mod block;
pub mod footer;
pub mod meta;
pub mod path;
pub mod reader;
pub mod writer;

pub use footer::{BlockHandle, Footer};
pub use meta::DataFileMeta;
pub use path::{bucket_dir, DataFilePathFactory};
pub use reader::{DataFileReader, RecordReader};
pub use writer::{
    DataFileWriter, DataFileWriterFactory, FileWriter, RollingFileWriter, WriterState,
};

/// Footer size in bytes (fixed)
pub const FOOTER_SIZE: usize = 40;

/// Size of the trailer sealing every block: compression tag + crc32
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Version of the data file layout
pub const FORMAT_VERSION: u32 = 1;

/// Magic number for data files
pub const MAGIC_NUMBER: u64 = 0x5442_4c53_5444_4154; // "TBLSTDAT" in hex
