//! Error types for BSON encoding and decoding

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for BSON operations
pub type Result<T> = std::result::Result<T, BsonError>;

/// Errors raised while building, encoding or decoding BSON
///
/// I/O errors are held behind an `Arc` so that an output stream can keep
/// reporting the same captured failure until it is reset.
#[derive(Error, Debug, Clone)]
pub enum BsonError {
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    #[error("C-string contains an embedded NUL byte: {0:?}")]
    EmbeddedNul(String),

    #[error("Duplicate element name in document: {0:?}")]
    DuplicateName(String),

    #[error("Unexpected end of data")]
    UnexpectedEof,

    #[error("Declared length {declared} does not match consumed length {consumed}")]
    LengthMismatch { declared: usize, consumed: usize },

    #[error("Invalid length prefix: {0}")]
    InvalidLength(i32),

    #[error("Unknown element type: 0x{0:02x}")]
    UnknownElementType(u8),

    #[error("Invalid UTF-8 string")]
    InvalidUtf8,

    #[error("Missing string terminator")]
    MissingTerminator,

    #[error("Document too large: {size} bytes (max {max})")]
    DocumentTooLarge { size: usize, max: usize },

    #[error("Documents nested more than {max} levels deep")]
    NestingTooDeep { max: usize },

    #[error("Trailing bytes after document: {0}")]
    TrailingBytes(usize),

    #[error("Invalid ObjectId: {0}")]
    InvalidObjectId(String),
}

impl BsonError {
    /// Returns true if the error came from the underlying stream
    pub fn is_io(&self) -> bool {
        matches!(self, BsonError::Io(_))
    }
}

impl From<io::Error> for BsonError {
    fn from(err: io::Error) -> Self {
        BsonError::Io(Arc::new(err))
    }
}
