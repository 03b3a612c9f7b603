//! Error types for persistence, synchronisation and attempt orchestration.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use adaptest_core::error::{SessionError, ValidationError};
use adaptest_core::snapshot::SessionSnapshot;

/// Errors from the local durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored snapshot could not be decoded.
    #[error("corrupt snapshot {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors that can occur when talking to the remote store.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The server returned a 429 rate limit response.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// The server holds a newer snapshot of the attempt.
    #[error("remote holds a newer snapshot (revision {})", remote.revision)]
    Conflict { remote: Box<SessionSnapshot> },

    /// Authentication failed (missing or invalid API token).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The server returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    Network(String),
}

impl SyncError {
    /// Returns `true` if pushing the same snapshot again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::RateLimited { .. } | SyncError::Timeout(_) | SyncError::Network(_) => true,
            SyncError::Api { status, .. } => *status >= 500 || *status == 0,
            SyncError::Conflict { .. } | SyncError::Unauthorized(_) => false,
        }
    }

    /// Server-provided backoff hint, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            SyncError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

/// Errors surfaced by [`AttemptEngine`](crate::engine::AttemptEngine) and
/// [`AttemptRunner`](crate::attempt::AttemptRunner).
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("user {user_id} has no access to test {test_id}")]
    AccessDenied { user_id: String, test_id: String },

    #[error("access check failed: {0}")]
    AccessCheck(String),

    #[error("unknown test: {0}")]
    UnknownTest(String),

    #[error("attempt {0} not found locally or remotely")]
    NotFound(Uuid),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
