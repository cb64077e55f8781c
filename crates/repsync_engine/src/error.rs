//! Error types for the sync engine.

use repsync_protocol::ProtocolError;
use repsync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Conflicts are not errors; they are settled by last-writer-wins and
/// reported in the cycle result.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The cloud store cannot be reached at all.
    #[error("unreachable")]
    Unreachable,

    /// A cloud call exceeded the request timeout.
    #[error("operation timed out")]
    Timeout,

    /// No signed-in user, or the user may not sync this owner.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The cloud store rejected the request.
    #[error("server error: {0}")]
    ServerError(String),

    /// Local store error during sync.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Malformed data.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Background work needs a Tokio runtime.
    #[error("no async runtime: {0}")]
    Runtime(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the next cycle may succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Unreachable => true,
            SyncError::Timeout => true,
            SyncError::ServerError(_) => true,
            _ => false,
        }
    }
}
