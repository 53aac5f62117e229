//! Observer-facing notifications.
//!
//! A session reports its progress to the UI consumer as [`Notification`]s
//! tagged with a [`Severity`]. Inbound messages and remote closure travel
//! as [`SessionEvent`]s alongside them so the three channels share one
//! ordering.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::SessionId;
use crate::transport::CloseInfo;

/// Severity of a status line shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Progress report ("Connecting", "Connected.").
    Status,
    /// A failed operation.
    Error,
}

/// A status or error line for the UI consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Session that produced the notification.
    pub session_id: SessionId,
    /// Status or error.
    pub severity: Severity,
    /// Human-readable text.
    pub text: String,
    /// When the notification was emitted.
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// Creates a notification stamped with the current time.
    #[must_use]
    pub fn new(session_id: SessionId, severity: Severity, text: impl Into<String>) -> Self {
        Self {
            session_id,
            severity,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// Returns `true` for [`Severity::Error`].
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Everything a session delivers to its observer, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Status or error line.
    Notice(Notification),
    /// Decoded inbound text message.
    Message {
        /// Message text.
        text: String,
    },
    /// The peer or transport ended the connection.
    Closed(CloseInfo),
}

impl SessionEvent {
    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::Notice(_) => "notice",
            Self::Message { .. } => "message",
            Self::Closed(_) => "closed",
        }
    }
}
