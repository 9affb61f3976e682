//! Data point error types
//!
//! Errors raised when reading values off data points and when encoding or
//! decoding them through a value codec.

use thiserror::Error;

/// Errors raised by the data point value model
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// A numeric accessor was called on a kind with no numeric meaning
    #[error("Data point of type '{api_type}' has no numeric value")]
    NotNumeric { api_type: &'static str },

    /// Fractions require a non-zero denominator
    #[error("Fraction denominator must not be zero")]
    ZeroDenominator,
}

/// Errors raised by value codecs and the codec registry
#[derive(Error, Debug)]
pub enum CodecError {
    /// No codec is registered for the requested data-store type tag
    #[error("Unknown data point type tag: {0}")]
    UnknownTypeTag(String),

    /// The payload ended before a complete value could be read
    #[error("Payload truncated")]
    Truncated,

    /// A string payload was not valid UTF-8
    #[error("Invalid UTF-8 in string payload")]
    InvalidUtf8,

    /// A payload was structurally invalid
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The data point handed to a codec is not of the codec's kind
    #[error("Codec for '{expected}' cannot encode a '{found}' data point")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// A JSON value could not be converted into a data point
    #[error("JSON conversion error: {0}")]
    Json(String),

    /// The decoded value violated a data point invariant
    #[error("Value error: {0}")]
    Value(#[from] ValueError),
}

/// Result type alias for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Result type alias for value accessors
pub type ValueResult<T> = Result<T, ValueError>;
