//! Channel log error types.

use thiserror::Error;

/// Errors raised by the channel log layer.
///
/// Layout violations (`NonContiguousFiles`, `BadFileSize`, `BadHeader`) are
/// fatal to the channel: the directory no longer matches the invariants the
/// resolver depends on and the open fails. I/O and checksum errors surface to
/// the caller, which reports them as persistence failures without closing the
/// connection.
#[derive(Error, Debug)]
pub enum LogError {
    /// Underlying filesystem operation failed.
    #[error("channel log i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel name violates the naming rules (ASCII, no `-`).
    #[error("invalid channel name: {0:?}")]
    InvalidChannelName(String),

    /// Log file numbers are not exactly `{{0, 1, .., K}}`.
    #[error("channel {channel}: log file numbers are not contiguous from zero")]
    NonContiguousFiles {
        /// Channel whose directory failed validation
        channel: String,
    },

    /// A non-head file deviates from the configured chunk size.
    #[error("channel {channel}: file {file} has size {size}, expected {expected}")]
    BadFileSize {
        /// Channel whose directory failed validation
        channel: String,
        /// Offending file number
        file: u64,
        /// Observed size in bytes
        size: u64,
        /// Configured chunk size
        expected: u64,
    },

    /// A log file header failed magic/version validation.
    #[error("channel {channel}: bad log file header in file {file}")]
    BadHeader {
        /// Channel whose file failed validation
        channel: String,
        /// Offending file number
        file: u64,
    },

    /// A record cannot fit in a chunk even when it is the only one.
    #[error("record of {size} bytes exceeds chunk capacity {max}")]
    RecordTooLarge {
        /// Framed record size in bytes
        size: u64,
        /// Maximum framed record size for the configured chunk size
        max: u64,
    },

    /// Stored record checksum does not match its payload.
    #[error("channel {channel}: checksum mismatch at record {record}")]
    ChecksumMismatch {
        /// Channel being read
        channel: String,
        /// Record number whose frame failed verification
        record: u64,
    },

    /// Configuration rejected before any file was touched.
    #[error("invalid log configuration: {0}")]
    InvalidConfig(String),

    /// The channel's appender has shut down.
    #[error("channel log closed")]
    Closed,

    /// Record encoding or decoding failed.
    #[error("record codec error: {0}")]
    Codec(String),
}

impl From<logbus_proto::ProtocolError> for LogError {
    fn from(err: logbus_proto::ProtocolError) -> Self {
        Self::Codec(err.to_string())
    }
}
