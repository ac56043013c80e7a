//! Error types for the sharded connection layer

use std::io;
use std::time::Duration;

use ouroboros_bson::BsonError;
use thiserror::Error;

/// Result type alias for connection operations
pub type Result<T> = std::result::Result<T, ConnectionError>;

/// Failure reported by the server inside a reply
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplyError {
    #[error("Cursor not found")]
    CursorNotFound,

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Shard configuration is stale: {0}")]
    ShardConfigStale(String),

    #[error("Server error (ok: {ok}, code: {code:?}): {message}")]
    Reply {
        ok: i32,
        code: Option<i32>,
        message: String,
    },
}

/// Connection layer errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("BSON error: {0}")]
    Bson(#[from] BsonError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Reply(#[from] ReplyError),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Could not determine a shard server to connect to")]
    NoServerAvailable,

    #[error("Connection closed")]
    Closed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConnectionError {
    /// Returns true if a retry against the same or another server may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectionError::Io(_)
                | ConnectionError::Timeout(_)
                | ConnectionError::NoServerAvailable
                | ConnectionError::Reply(ReplyError::ShardConfigStale(_))
        )
    }

    /// Returns true for failures raised by the server rather than the transport
    pub fn is_server_error(&self) -> bool {
        matches!(self, ConnectionError::Reply(_))
    }
}
