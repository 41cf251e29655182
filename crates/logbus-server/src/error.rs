//! Server error types.
//!
//! Most variants are protocol-fatal: the connection loop logs them and
//! closes the transport without sending a response. Persistence failures
//! are the exception and travel back to the client as a negative RESPONSE
//! at the original issue ordinal.

use logbus_core::{DocStoreError, LogError};
use logbus_proto::ProtocolError;
use thiserror::Error;

/// Errors that can occur while serving a connection.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Transport-level I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame off the wire. Fatal.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Any frame other than CONNECT before authorization. Fatal.
    #[error("frame {0} received while unauthorised")]
    Unauthorised(String),

    /// A required field is absent from an inbound frame. Fatal.
    #[error("missing required field {field} in {kind} frame")]
    MissingField {
        /// Frame kind being dispatched
        kind: &'static str,
        /// Name of the absent field
        field: &'static str,
    },

    /// ACKEV or SUBCLOSE named a subscription this connection never
    /// opened (or already closed). Fatal.
    #[error("unknown subscription id {0}")]
    UnknownSubscription(i32),

    /// QUERYACK named a query this connection is not running. Fatal.
    #[error("unknown query id {0}")]
    UnknownQuery(i32),

    /// SUBSCRIBE named a channel nothing has published to. Fatal.
    #[error("unknown channel {0:?}")]
    UnknownChannel(String),

    /// Frame kind outside the protocol. Fatal.
    #[error("unknown frame kind {0:?}")]
    UnknownFrameKind(String),

    /// A per-connection sequence counter wrapped. Fatal; practically
    /// unreachable but never allowed to wrap silently.
    #[error("int wrapped!")]
    CounterWrapped,

    /// Channel log failure during open or validation. Fatal.
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// Document store failure outside the query path. Fatal.
    #[error("doc store error: {0}")]
    Docs(#[from] DocStoreError),
}
