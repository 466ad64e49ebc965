//! Error types for ordkv.
//!
//! This module defines all error types that can occur while working with a
//! store, its snapshots, batches and cursors. Key absence is never an error:
//! lookups report it as `Ok(None)` or resolve it to a caller-supplied default.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ordkv operations.
///
/// This is a convenience alias for `Result<T, StorageError>`.
pub type Result<T> = std::result::Result<T, StorageError>;

/// The kind of handle an operation was issued against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Store,
    Snapshot,
    Batch,
    Cursor,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Store => "store",
            Resource::Snapshot => "snapshot",
            Resource::Batch => "batch",
            Resource::Cursor => "cursor",
        };
        f.write_str(name)
    }
}

/// Error types for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error from the operating system.
    ///
    /// This includes file system errors, permission errors, and device errors.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Data corruption detected in an engine file.
    #[error("Corrupted data in file {file:?} at offset {offset}: {reason}")]
    CorruptedData {
        /// Path to the file containing corrupted data
        file: PathBuf,
        /// Byte offset where corruption was detected
        offset: u64,
        /// What was wrong with the data
        reason: String,
    },

    /// Checksum verification failed.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Expected checksum value
        expected: u32,
        /// Actual checksum value computed from data
        actual: u32,
    },

    /// The codec could not interpret stored bytes.
    ///
    /// Either the data is corrupt or it was written with a different codec.
    #[error("Decode error ({codec}): {message}")]
    Decode {
        codec: &'static str,
        message: String,
    },

    /// The codec could not serialize a value.
    #[error("Encode error ({codec}): {message}")]
    Encode {
        codec: &'static str,
        message: String,
    },

    /// An operation was issued against a closed store, snapshot, batch or cursor.
    #[error("{resource} is closed")]
    UseAfterClose { resource: Resource },

    /// The engine does not provide this capability.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Another handle in this process already owns the store at `path`.
    #[error("Store at {path:?} is already open")]
    AlreadyOpen { path: PathBuf },

    /// The request is incompatible with the state of the store on disk.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Any other failure reported by the storage engine.
    #[error("Engine error: {0}")]
    Engine(String),

    /// Configuration validation failed.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON parsing or serialization of an options file failed.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl StorageError {
    pub(crate) fn closed(resource: Resource) -> Self {
        StorageError::UseAfterClose { resource }
    }

    /// True for failures reported by the storage engine itself (I/O,
    /// corruption, exclusivity, resource exhaustion). These are surfaced
    /// unmodified and never retried by this crate.
    pub fn is_engine_failure(&self) -> bool {
        matches!(
            self,
            StorageError::IoError(_)
                | StorageError::CorruptedData { .. }
                | StorageError::ChecksumMismatch { .. }
                | StorageError::AlreadyOpen { .. }
                | StorageError::InvalidArgument(_)
                | StorageError::Engine(_)
        )
    }

    /// True when the error reports use of a closed handle.
    pub fn is_use_after_close(&self) -> bool {
        matches!(self, StorageError::UseAfterClose { .. })
    }
}
