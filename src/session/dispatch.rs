//! Serialized delivery of session events to observer callbacks.
//!
//! [`Dispatcher`] wraps an unbounded [`tokio::sync::mpsc`] channel drained by
//! a single task. Caller-driven operations and the per-connection reader
//! task all publish through the same channel, so callbacks never run
//! concurrently and see events in the order they were published. Callbacks
//! run outside every session lock and may call back into the session.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use super::notification::{Notification, SessionEvent, Severity};
use super::SessionId;
use crate::transport::CloseInfo;

type MessageHandler = Arc<dyn Fn(String) + Send + Sync>;
type ClosedHandler = Arc<dyn Fn(CloseInfo) + Send + Sync>;
type NotificationHandler = Arc<dyn Fn(Notification) + Send + Sync>;

/// At most one handler per event kind; registering replaces.
#[derive(Default)]
struct Handlers {
    message: Option<MessageHandler>,
    closed: Option<ClosedHandler>,
    notification: Option<NotificationHandler>,
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("message", &self.message.is_some())
            .field("closed", &self.closed.is_some())
            .field("notification", &self.notification.is_some())
            .finish()
    }
}

/// Publishing side of a session's event queue.
#[derive(Debug, Clone)]
pub(crate) struct Dispatcher {
    session_id: SessionId,
    sender: mpsc::UnboundedSender<SessionEvent>,
    handlers: Arc<Mutex<Handlers>>,
}

impl Dispatcher {
    /// Creates the queue and spawns the task that drains it.
    ///
    /// The task exits once every clone of the dispatcher is dropped and the
    /// queue is empty.
    pub(crate) fn spawn(session_id: SessionId) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handlers = Arc::new(Mutex::new(Handlers::default()));
        tokio::spawn(run(receiver, Arc::clone(&handlers)));
        Self {
            session_id,
            sender,
            handlers,
        }
    }

    fn handlers(&self) -> MutexGuard<'_, Handlers> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_message_handler(&self, handler: MessageHandler) {
        self.handlers().message = Some(handler);
    }

    pub(crate) fn set_closed_handler(&self, handler: ClosedHandler) {
        self.handlers().closed = Some(handler);
    }

    pub(crate) fn set_notification_handler(&self, handler: NotificationHandler) {
        self.handlers().notification = Some(handler);
    }

    /// Queues an event. Dropped silently if the drain task is gone, which
    /// only happens while the runtime is shutting down.
    pub(crate) fn publish(&self, event: SessionEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!(session_id = %self.session_id, "event dropped: dispatcher stopped");
        }
    }

    pub(crate) fn status(&self, text: impl Into<String>) {
        self.notice(Severity::Status, text.into());
    }

    pub(crate) fn error(&self, text: impl Into<String>) {
        self.notice(Severity::Error, text.into());
    }

    fn notice(&self, severity: Severity, text: String) {
        self.publish(SessionEvent::Notice(Notification::new(
            self.session_id,
            severity,
            text,
        )));
    }

    pub(crate) fn message(&self, text: String) {
        self.publish(SessionEvent::Message { text });
    }

    pub(crate) fn closed(&self, info: CloseInfo) {
        self.publish(SessionEvent::Closed(info));
    }
}

async fn run(mut receiver: mpsc::UnboundedReceiver<SessionEvent>, handlers: Arc<Mutex<Handlers>>) {
    while let Some(event) = receiver.recv().await {
        // Clone the handlers out so no lock is held during the call.
        let (on_message, on_closed, on_notification) = {
            let registered = handlers.lock().unwrap_or_else(PoisonError::into_inner);
            (
                registered.message.clone(),
                registered.closed.clone(),
                registered.notification.clone(),
            )
        };
        match event {
            SessionEvent::Notice(note) => {
                if let Some(handler) = on_notification {
                    handler(note);
                }
            }
            SessionEvent::Message { text } => match on_message {
                Some(handler) => handler(text),
                None => tracing::debug!("inbound message dropped: no handler registered"),
            },
            SessionEvent::Closed(info) => {
                if let Some(handler) = on_closed {
                    handler(info);
                }
            }
        }
    }
}
