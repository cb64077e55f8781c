//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or validating protocol values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload could not be encoded to CBOR.
    #[error("encode error: {0}")]
    Encode(String),

    /// Payload could not be decoded from CBOR.
    #[error("decode error: {0}")]
    Decode(String),

    /// Payload belongs to a different entity type than requested.
    #[error("entity type mismatch: expected {expected}, found {found}")]
    EntityMismatch {
        /// Requested entity type.
        expected: &'static str,
        /// Entity type stored on the record.
        found: &'static str,
    },

    /// A record id string was not a valid UUID.
    #[error("invalid record id: {0}")]
    InvalidId(String),

    /// An owner id was empty.
    #[error("owner id must not be empty")]
    EmptyOwner,

    /// An entity type name was not recognized.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),
}
