//! Error types for the table store.

use std::io;
use thiserror::Error;

/// The result type used throughout the table store.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for table store operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Data corruption was detected.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// The requested object was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An object was used in a state that does not allow the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A checksum mismatch was detected.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// The expected checksum value.
        expected: u32,
        /// The actual checksum value.
        actual: u32,
    },

    /// The file or object already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A compaction attempt failed; its inputs are untouched.
    #[error("Compaction failed: {0}")]
    CompactionFailed(#[source] Box<Error>),

    /// The pending changes conflict with a concurrently committed snapshot.
    #[error("Commit conflict: {0}")]
    CommitConflict(String),

    /// The commit gave up after exhausting its retry budget.
    #[error("Commit failed after {attempts} attempts")]
    CommitFailed {
        /// Number of attempts made.
        attempts: usize,
    },

    /// A commit published some of its snapshots before a later one failed.
    #[error("Commit failed after publishing snapshots {committed:?}: {source}")]
    PartiallyCommitted {
        /// Ids of the snapshots that were published.
        committed: Vec<u64>,
        /// Why the next snapshot could not be published.
        #[source]
        source: Box<Error>,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Creates a new commit conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::CommitConflict(msg.into())
    }

    /// Creates a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Returns true if this error is a commit conflict the caller may resolve
    /// by recomputing its changes against fresh inputs.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::CommitConflict(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
