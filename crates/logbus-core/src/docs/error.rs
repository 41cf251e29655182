//! Document store error types.

use thiserror::Error;

/// Errors from the document binding store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocStoreError {
    /// Underlying database or filesystem operation failed.
    ///
    /// May be transient (I/O) or permanent (corruption); the message carries
    /// the backend's detail.
    #[error("doc store i/o error: {0}")]
    Io(String),

    /// Stored bytes could not be encoded or decoded.
    ///
    /// Permanent for the affected entry.
    #[error("doc store serialization error: {0}")]
    Serialization(String),
}
