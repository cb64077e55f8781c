//! Error types for the record store.

use repsync_protocol::{ProtocolError, RecordId};
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error while reading or writing the snapshot file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Snapshot could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Snapshot file is not a store snapshot this version understands.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Record does not exist or is a tombstone.
    #[error("record not found: {0}")]
    NotFound(RecordId),

    /// A record with this id already exists.
    #[error("record already exists: {0}")]
    AlreadyExists(RecordId),

    /// Payload encoding or decoding failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
