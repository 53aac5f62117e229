//! Transport layer: the seam between a session and the WebSocket wire.
//!
//! A [`Connector`] opens a connection and hands back a [`Transport`], a
//! framed sink/stream pair carrying [`Frame`]s. Ping and pong frames never
//! surface here; the transport answers them itself.

pub mod loopback;
pub mod network;

use std::fmt;
use std::pin::Pin;

use futures_util::Sink;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use serde::Serialize;

use crate::error::TransportError;
use crate::uri::WsUri;

pub use loopback::LoopbackConnector;
pub use network::TungsteniteConnector;

/// Close code for a normal, intentional closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code reported when the peer's close frame carried no status.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Close code reported when the connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Maximum close-reason length in bytes (125-byte control payload minus the code).
pub const MAX_CLOSE_REASON_BYTES: usize = 123;

/// One complete WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text message.
    Text(String),
    /// Binary message.
    Binary(Vec<u8>),
    /// Close frame, with the status the sender supplied.
    Close(Option<CloseInfo>),
}

/// Close status code and reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseInfo {
    /// Numeric close code (RFC 6455 section 7.4).
    pub code: u16,
    /// Human-readable reason, at most [`MAX_CLOSE_REASON_BYTES`] bytes.
    pub reason: String,
}

impl CloseInfo {
    /// Builds a close status, truncating `reason` on a character boundary
    /// so it fits in a close frame.
    #[must_use]
    pub fn new(code: u16, reason: &str) -> Self {
        Self {
            code,
            reason: truncate_reason(reason).to_string(),
        }
    }

    /// Normal closure (1000) with the given reason.
    #[must_use]
    pub fn normal(reason: &str) -> Self {
        Self::new(CLOSE_NORMAL, reason)
    }

    /// Close frame without a status code (1005).
    #[must_use]
    pub fn no_status() -> Self {
        Self::new(CLOSE_NO_STATUS, "")
    }

    /// Connection lost without a close frame (1006).
    #[must_use]
    pub fn abnormal(reason: &str) -> Self {
        Self::new(CLOSE_ABNORMAL, reason)
    }
}

impl fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON_BYTES {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason.get(..end).unwrap_or_default()
}

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;

/// Inbound half of a connection.
pub type FrameStream = BoxStream<'static, Result<Frame, TransportError>>;

/// An established connection, split into its two halves.
pub struct Transport {
    /// Writes frames to the peer.
    pub sink: FrameSink,
    /// Yields frames from the peer; ends when the connection is gone.
    pub stream: FrameStream,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Opens WebSocket connections.
///
/// Implementations perform the TCP/TLS connect and the opening handshake.
/// The returned future is `'static` so the session can race it against a
/// cancel signal or a timeout.
pub trait Connector: Send + Sync + fmt::Debug {
    /// Connects to `uri` and completes the opening handshake.
    fn connect(&self, uri: &WsUri) -> BoxFuture<'static, Result<Transport, TransportError>>;
}
