//! Protocol error types.
//!
//! Every error here is fatal to the connection that produced it: a peer that
//! sends a malformed length prefix or an undecodable record is broken or
//! malicious, and the connection layer closes it without replying.

use thiserror::Error;

/// Convenience alias used throughout the protocol crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Declared frame length exceeds the configured maximum.
    #[error("frame length {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Length claimed by the prefix
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Declared frame length is below the smallest possible frame.
    ///
    /// The length prefix includes itself, so anything under 5 bytes cannot
    /// carry a record.
    #[error("frame length {0} below minimum")]
    FrameTooShort(usize),

    /// Frame payload is not a CBOR map of text-keyed fields.
    #[error("frame payload is not a record map")]
    NotARecord,

    /// Frame payload does not start with the `frame` kind entry.
    #[error("missing frame kind")]
    MissingKind,

    /// Record contains a value outside the supported type set.
    #[error("unsupported value in record: {0}")]
    UnsupportedValue(String),

    /// CBOR encoding or decoding failed.
    #[error("invalid record encoding: {0}")]
    InvalidRecord(String),
}
