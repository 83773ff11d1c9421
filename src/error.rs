//! Error types for the CaskDb storage engine.

use std::io;

use thiserror::Error;

/// The result type used throughout CaskDb.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for CaskDb operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The caller supplied an empty key.
    #[error("the key is empty")]
    KeyIsEmpty,

    /// The key is absent or was logically deleted.
    #[error("key not found in database")]
    KeyNotFound,

    /// An index entry refers to a data file that is not open.
    #[error("data file {0} not found")]
    DataFileNotFound(u32),

    /// A structurally valid record failed its checksum.
    #[error("invalid crc value, log record maybe corrupted: expected {expected:#x}, got {actual:#x}")]
    InvalidCrc {
        /// Checksum stored in the record header.
        expected: u32,
        /// Checksum computed over the record body.
        actual: u32,
    },

    /// Data corruption that is not a checksum mismatch.
    #[error("data corruption: {0}")]
    Corruption(String),

    /// A file in the data directory does not follow the naming scheme.
    #[error("the database directory maybe corrupted: {0}")]
    DataDirectoryCorrupted(String),

    /// The handle was closed; reopen the directory to keep using it.
    #[error("the database is closed")]
    DatabaseClosed,

    /// Another engine instance holds the directory lock.
    #[error("the database directory is used by another process")]
    DatabaseInUse,

    /// The sequence number marker required by a disk-resident index is missing.
    #[error("sequence number file not found, the database was not closed cleanly")]
    SeqNoFileNotFound,

    /// A write batch holds more operations than its configured limit.
    #[error("exceed the max batch num")]
    ExceedMaxBatchNum,

    /// A merge is already running.
    #[error("merge is in progress, try again later")]
    MergeInProgress,

    /// The reclaimable ratio is below the configured merge threshold.
    #[error("the merge ratio does not reach the option")]
    MergeRatioUnreached,

    /// The merged data would not fit in the free disk space.
    #[error("no enough disk space for merge")]
    NotEnoughSpaceForMerge,

    /// The index and the log diverged.
    #[error("failed to update index")]
    IndexUpdateFailed,

    /// The disk-resident index backing failed.
    #[error("index backend error: {0}")]
    IndexBackend(String),

    /// An invalid argument was provided.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The database is in an invalid state for the requested operation.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Returns true for merge preconditions that may pass on a later attempt.
    pub fn is_merge_retryable(&self) -> bool {
        matches!(
            self,
            Error::MergeInProgress | Error::MergeRatioUnreached | Error::NotEnoughSpaceForMerge
        )
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        match err {
            sled::Error::Io(e) => Error::Io(e),
            other => Error::IndexBackend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidArgument(format!("malformed configuration: {}", err))
    }
}
