//! Error types for the store clients.

use thiserror::Error;

/// Errors that can occur when talking to a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with a non-success status.
    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The store refused the change.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The store is not reachable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}
