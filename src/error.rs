//! Error types for session operations.
//!
//! Each session operation has its own error enum so callers can match on
//! exactly the failures that operation can produce. Every variant renders a
//! human-readable message; the session forwards that message to the
//! observer's error channel before returning the error.

use std::time::Duration;

use crate::session::SessionState;

/// Rejection reasons for a user-supplied WebSocket URI.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The input did not parse as an absolute URI.
    #[error("invalid URI {input:?}: {reason}")]
    InvalidUri {
        /// The trimmed input that failed to parse.
        input: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// The URI carries a `#fragment`, which WebSocket URIs may not have.
    #[error("URI fragments are not supported in WebSocket URIs")]
    FragmentNotAllowed,

    /// The scheme is neither `ws` nor `wss`.
    #[error("unsupported scheme {0:?}: WebSockets only support ws:// and wss://")]
    UnsupportedScheme(String),
}

/// Failures of [`crate::session::Session::connect`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// The session already owns a connection or a pending attempt.
    #[error("session is already {0}")]
    AlreadyActive(SessionState),

    /// The URI text was rejected before any network I/O.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// Network or handshake failure, passed through from the transport.
    #[error("{0}")]
    Failed(String),

    /// The attempt exceeded the configured connect timeout.
    #[error("connect timed out after {0:?}")]
    TimedOut(Duration),

    /// A disconnect arrived while the attempt was still pending.
    #[error("connect cancelled")]
    Cancelled,
}

impl From<TransportError> for ConnectError {
    fn from(err: TransportError) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Failures of [`crate::session::Session::disconnect`].
///
/// The session is always `Disconnected` once this is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DisconnectError {
    /// Writing the close frame failed or did not finish in time.
    #[error("disconnect failed: {0}")]
    DisconnectFailed(String),
}

/// Failures of [`crate::session::Session::send`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The session has no open connection.
    #[error("not connected")]
    NotConnected,

    /// The transport rejected the write.
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Errors surfaced by a [`crate::transport::Connector`] or its framed
/// sink/stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The opening handshake was refused or malformed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Socket-level I/O failure.
    #[error("i/o error: {0}")]
    Io(String),

    /// The peer violated the WebSocket protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection is already closed.
    #[error("connection closed")]
    Closed,
}

impl ConnectError {
    /// Short machine-readable name of the variant, used as a log field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyActive(_) => "already_active",
            Self::Invalid(_) => "invalid_uri",
            Self::Failed(_) => "failed",
            Self::TimedOut(_) => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}
