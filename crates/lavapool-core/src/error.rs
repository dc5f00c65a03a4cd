//! Error types for the lavapool wire protocol

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Frame could not be serialized
    #[error("encode error: {0}")]
    Encode(String),

    /// Frame text was not valid JSON or not shaped like `{op, d}`
    #[error("decode error: {0}")]
    Decode(String),

    /// A required payload field was absent
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A payload field had the wrong type or an out-of-range value
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}
