//! Session lifecycle states.

use std::fmt;

use serde::Serialize;

/// Where a [`super::Session`] is in its connection lifecycle.
///
/// ```text
/// Disconnected --connect()--> Connecting --success--> Connected
///      ^                          |                       |
///      +------ failure/cancel ----+                       |
///      +------------ disconnect() or remote close --------+
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No connection and no pending attempt.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// The connection is open; messages can be sent.
    Connected,
}

impl SessionState {
    /// Returns `true` while a connection exists or is being established.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Returns the state as a static string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
