use std::io;
use thiserror::Error;

/// Errors surfaced by the schema graph, resolver, validator and owners.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Attempted to mutate a frozen object")]
    Frozen,

    #[error("Field or reference '{0}' not found")]
    NotFound(String),

    #[error("Duplicate id or name '{0}'")]
    Duplicate(String),

    #[error("Operation not valid for this field class kind: {0}")]
    BadType(String),

    #[error("Value {0} does not fit the field class")]
    OutOfRange(String),

    #[error("Sequence or variant used before its reference was resolved")]
    Unresolved,

    #[error("Schema validation failed: {0}")]
    ValidationFailed(String),
}

/// Status returned by the binary type reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Ran out of bytes mid-field; retain internal state and retry with more bytes.
    Again,
    /// Reached a well-formed end of stream.
    Eof,
    /// The bytes do not conform to the field class being decoded.
    Invalid,
    /// Unrecoverable decode error, not in the `Invalid`/`Again`/`Eof` family.
    Error,
}

/// Status returned by a [`crate::medium::Medium`] in response to `request_bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediumStatus {
    Again,
    Eof,
    Error,
}

/// A decode-layer error, distinct from the schema-layer [`Error`]: `Invalid` and `Error` are
/// fatal to the reader instance but never to the owning schema graph.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Not enough bytes available yet")]
    Again,

    #[error("End of stream")]
    Eof,

    #[error("Bytes do not conform to the field class being decoded: {0}")]
    Invalid(String),

    #[error("Schema error while decoding: {0}")]
    Schema(#[from] Error),

    #[error("I/O error while reading the byte medium: {}", .0.kind())]
    Io(#[from] io::Error),
}

impl DecodeError {
    pub fn status(&self) -> DecodeStatus {
        match self {
            DecodeError::Again => DecodeStatus::Again,
            DecodeError::Eof => DecodeStatus::Eof,
            DecodeError::Invalid(_) => DecodeStatus::Invalid,
            DecodeError::Schema(_) | DecodeError::Io(_) => DecodeStatus::Error,
        }
    }
}
