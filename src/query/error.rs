//! Query error types
//!
//! Defines all error conditions that can occur while admitting, scanning and
//! partitioning a query.

use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// Query failed validation
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Invalid time range specified
    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    /// Engine misconfigured (e.g. empty permit pool)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    /// The query was killed by an administrator
    #[error("Query {hash} was killed")]
    Cancelled { hash: String },

    /// Store scan collaborator failed
    #[error("Scan error: {0}")]
    Scan(String),

    /// Query execution failed
    #[error("Execution error: {0}")]
    Execution(String),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
