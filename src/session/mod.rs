//! Session layer: connection lifecycle, observer callbacks, state.
//!
//! A [`Session`] owns one WebSocket connection at a time and reports to a
//! UI consumer through three callbacks: inbound messages, remote closure,
//! and status/error [`Notification`]s.

mod client;
mod dispatch;
mod id;
mod notification;
mod state;

pub use client::Session;
pub use id::SessionId;
pub use notification::{Notification, SessionEvent, Severity};
pub use state::SessionState;
