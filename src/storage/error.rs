//! Row cache error types
//!
//! Defines all errors that can occur while spilling query results to disk
//! and reading them back.

use crate::datapoints::CodecError;
use thiserror::Error;

/// Errors that can occur in the row cache
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization of the cache index failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected (checksum mismatch, truncated row, bad type id)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// A value could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Operation not valid in the cache's current mode
    #[error("Invalid cache state: {0}")]
    InvalidState(String),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
