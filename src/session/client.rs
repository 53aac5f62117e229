//! The WebSocket client session.
//!
//! [`Session`] owns at most one connection. Caller-driven transitions
//! (`connect`, `disconnect`) and transport-driven ones (remote close) all go
//! through one mutex around the session state, and each connection lifetime
//! carries a generation number so a late completion from a superseded
//! lifetime is recognized and ignored.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::dispatch::Dispatcher;
use super::{Notification, SessionId, SessionState};
use crate::config::SessionConfig;
use crate::error::{ConnectError, DisconnectError, SendError, TransportError};
use crate::transport::{
    CloseInfo, Connector, Frame, FrameSink, FrameStream, Transport, TungsteniteConnector,
};
use crate::uri::{WsUri, validate_uri};

/// An open connection: the shared write half plus the task reading the
/// other half.
struct Connection {
    sink: Arc<AsyncMutex<FrameSink>>,
    reader: JoinHandle<()>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("reader_finished", &self.reader.is_finished())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: SessionState,
    target_uri: Option<WsUri>,
    connection: Option<Connection>,
    /// Wakes the in-flight `connect` when a disconnect cancels it.
    pending: Option<Arc<Notify>>,
    generation: u64,
}

impl Inner {
    /// Ends the current lifetime and hands back the released connection.
    fn reset(&mut self) -> Option<Connection> {
        self.state = SessionState::Disconnected;
        self.target_uri = None;
        self.generation = self.generation.wrapping_add(1);
        if let Some(pending) = self.pending.take() {
            pending.notify_one();
        }
        self.connection.take()
    }

    fn is_current(&self, generation: u64, state: SessionState) -> bool {
        self.generation == generation && self.state == state
    }
}

/// State shared between the session handle and its reader task.
#[derive(Debug)]
struct Shared {
    id: SessionId,
    inner: Mutex<Inner>,
    dispatcher: Dispatcher,
    close_timeout: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handles the end of a connection that the session did not initiate.
    async fn remote_closed(&self, generation: u64, info: CloseInfo) {
        let released = {
            let mut inner = self.lock();
            if !inner.is_current(generation, SessionState::Connected) {
                return;
            }
            let released = inner.reset();
            self.dispatcher
                .status(format!("Connection closed by peer: {info}."));
            self.dispatcher.closed(info.clone());
            released
        };
        tracing::info!(session_id = %self.id, code = info.code, reason = %info.reason, "connection closed by peer");

        // Answer the peer's close frame; the connection is already released.
        if let Some(connection) = released {
            let answered = tokio::time::timeout(self.close_timeout, async {
                connection.sink.lock().await.close().await
            })
            .await;
            if !matches!(answered, Ok(Ok(()))) {
                tracing::debug!(session_id = %self.id, "close reply not delivered");
            }
        }
    }
}

/// Releases the session if a `connect` future is dropped mid-attempt.
struct PendingConnect<'a> {
    shared: &'a Shared,
    generation: u64,
    armed: bool,
}

impl PendingConnect<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingConnect<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.shared.lock();
        if inner.is_current(self.generation, SessionState::Connecting) {
            inner.reset();
            self.shared.dispatcher.status("Connect abandoned. Disconnected.");
            tracing::debug!(session_id = %self.shared.id, "connect future dropped");
        }
    }
}

/// A WebSocket client session: one logical connection and its lifecycle.
///
/// Create it inside a Tokio runtime; observer callbacks run on a task the
/// session spawns.
///
/// ```no_run
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// use ws_talker::config::SessionConfig;
/// use ws_talker::session::Session;
///
/// let session = Session::with_network(SessionConfig::default());
/// session.on_message_received(|text| println!("< {text}"));
/// session.connect_str("ws://echo.example/socket").await?;
/// session.send("hello").await?;
/// session.disconnect("done").await?;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("connector", &self.connector)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a disconnected session that opens connections through
    /// `connector`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new(connector: impl Connector + 'static, config: SessionConfig) -> Self {
        let id = SessionId::new();
        Self {
            shared: Arc::new(Shared {
                id,
                inner: Mutex::new(Inner::default()),
                dispatcher: Dispatcher::spawn(id),
                close_timeout: config.close_timeout,
            }),
            connector: Arc::new(connector),
            config,
        }
    }

    /// Creates a session that connects over the network.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn with_network(config: SessionConfig) -> Self {
        Self::new(TungsteniteConnector::new(), config)
    }

    /// Returns the session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Returns the endpoint of the current or pending connection.
    #[must_use]
    pub fn target_uri(&self) -> Option<WsUri> {
        self.shared.lock().target_uri.clone()
    }

    /// Returns `true` while messages can be sent.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Registers the inbound-message handler, replacing any previous one.
    ///
    /// Called once per message, in arrival order.
    pub fn on_message_received<F>(&self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.shared.dispatcher.set_message_handler(Arc::new(handler));
    }

    /// Registers the remote-close handler, replacing any previous one.
    ///
    /// Called once per connection lifetime when the peer or the transport
    /// ends the connection, after the session is already `Disconnected`.
    /// A local [`Session::disconnect`] does not trigger it.
    pub fn on_closed<F>(&self, handler: F)
    where
        F: Fn(CloseInfo) + Send + Sync + 'static,
    {
        self.shared.dispatcher.set_closed_handler(Arc::new(handler));
    }

    /// Registers the status/error handler, replacing any previous one.
    pub fn on_notification<F>(&self, handler: F)
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        self.shared
            .dispatcher
            .set_notification_handler(Arc::new(handler));
    }

    /// Validates `input` and connects to it.
    ///
    /// A rejected URI is reported without any network I/O.
    ///
    /// # Errors
    ///
    /// [`ConnectError::Invalid`] if the URI is rejected, otherwise the same
    /// errors as [`Session::connect`].
    pub async fn connect_str(&self, input: &str) -> Result<(), ConnectError> {
        self.shared.dispatcher.status("Starting to connect.");
        match validate_uri(input) {
            Ok(uri) => self.connect(uri).await,
            Err(err) => Err(self.report_connect_error(err.into())),
        }
    }

    /// Opens a connection to `uri`.
    ///
    /// Moves the session to `Connecting` and then to `Connected`, or back to
    /// `Disconnected` on failure. Never retries.
    ///
    /// # Errors
    ///
    /// - [`ConnectError::AlreadyActive`] unless the session is disconnected.
    /// - [`ConnectError::Failed`] on network or handshake failure.
    /// - [`ConnectError::TimedOut`] if the configured connect timeout elapses.
    /// - [`ConnectError::Cancelled`] if [`Session::disconnect`] ran while the
    ///   attempt was pending.
    pub async fn connect(&self, uri: WsUri) -> Result<(), ConnectError> {
        let (generation, cancel) = {
            let mut inner = self.shared.lock();
            if inner.state.is_active() {
                let err = ConnectError::AlreadyActive(inner.state);
                drop(inner);
                return Err(self.report_connect_error(err));
            }
            inner.generation = inner.generation.wrapping_add(1);
            inner.state = SessionState::Connecting;
            inner.target_uri = Some(uri.clone());
            let cancel = Arc::new(Notify::new());
            inner.pending = Some(Arc::clone(&cancel));
            self.shared
                .dispatcher
                .status(format!("Connecting to {uri}."));
            (inner.generation, cancel)
        };
        tracing::info!(session_id = %self.shared.id, uri = %uri, "connecting");

        let mut pending = PendingConnect {
            shared: &self.shared,
            generation,
            armed: true,
        };
        let attempt = self.connector.connect(&uri);
        let outcome = tokio::select! {
            result = bounded(attempt, self.config.connect_timeout) => result,
            () = cancel.notified() => Err(ConnectError::Cancelled),
        };
        pending.disarm();

        match outcome {
            Ok(transport) => self.install(generation, &uri, transport),
            Err(err) => {
                let mut inner = self.shared.lock();
                // A disconnect that cancelled the attempt already reset the state.
                let err = if inner.is_current(generation, SessionState::Connecting) {
                    inner.reset();
                    err
                } else {
                    ConnectError::Cancelled
                };
                drop(inner);
                Err(self.report_connect_error(err))
            }
        }
    }

    /// Stores a freshly opened transport unless the attempt was superseded.
    fn install(
        &self,
        generation: u64,
        uri: &WsUri,
        transport: Transport,
    ) -> Result<(), ConnectError> {
        let Transport { sink, stream } = transport;
        let mut inner = self.shared.lock();
        if !inner.is_current(generation, SessionState::Connecting) {
            drop(inner);
            tracing::debug!(session_id = %self.shared.id, uri = %uri, "discarding connection completed after cancel");
            return Err(self.report_connect_error(ConnectError::Cancelled));
        }

        inner.pending = None;
        inner.state = SessionState::Connected;
        // Queued before the reader exists so it precedes every inbound message.
        self.shared.dispatcher.status("Connected.");

        let span = tracing::info_span!("session_reader", session_id = %self.shared.id);
        let reader = tokio::spawn(
            read_loop(Arc::clone(&self.shared), generation, stream).instrument(span),
        );
        inner.connection = Some(Connection {
            sink: Arc::new(AsyncMutex::new(sink)),
            reader,
        });
        drop(inner);

        tracing::info!(session_id = %self.shared.id, uri = %uri, "connected");
        Ok(())
    }

    /// Closes the connection with code 1000 and `reason`.
    ///
    /// Cancels a pending connect. Does nothing when already disconnected.
    /// The session is `Disconnected` and the connection released when this
    /// returns, whatever the result. Waits for the close frame to be
    /// written, not for the peer's reply.
    ///
    /// # Errors
    ///
    /// [`DisconnectError::DisconnectFailed`] if the close frame could not be
    /// written within the configured close timeout.
    pub async fn disconnect(&self, reason: &str) -> Result<(), DisconnectError> {
        let released = {
            let mut inner = self.shared.lock();
            match inner.state {
                SessionState::Disconnected => {
                    tracing::trace!(session_id = %self.shared.id, "disconnect while disconnected");
                    return Ok(());
                }
                SessionState::Connecting => {
                    inner.reset();
                    self.shared
                        .dispatcher
                        .status("Connect cancelled. Disconnected.");
                    tracing::info!(session_id = %self.shared.id, "pending connect cancelled");
                    return Ok(());
                }
                SessionState::Connected => {
                    self.shared.dispatcher.status("Disconnecting.");
                    inner.reset()
                }
            }
        };

        let Some(connection) = released else {
            self.shared.dispatcher.status("Disconnected.");
            return Ok(());
        };
        connection.reader.abort();

        let close = CloseInfo::normal(reason);
        let limit = self.config.close_timeout;
        let written = tokio::time::timeout(limit, async {
            let mut writer = connection.sink.lock().await;
            writer.send(Frame::Close(Some(close))).await
        })
        .await;

        let failure = match written {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some(format!("close frame not written within {limit:?}")),
        };
        match failure {
            None => {
                self.shared.dispatcher.status("Disconnected.");
                tracing::info!(session_id = %self.shared.id, reason, "disconnected");
                Ok(())
            }
            Some(description) => {
                let err = DisconnectError::DisconnectFailed(description);
                self.shared
                    .dispatcher
                    .error(format!("Error disconnecting: {err}"));
                tracing::warn!(session_id = %self.shared.id, error = %err, "disconnect failed");
                Err(err)
            }
        }
    }

    /// Sends `text` as one complete text message.
    ///
    /// # Errors
    ///
    /// - [`SendError::NotConnected`] unless the session is connected; no
    ///   transport I/O happens in that case.
    /// - [`SendError::SendFailed`] if the transport rejects the write. The
    ///   session state is left alone; a concurrent close is reported through
    ///   [`Session::on_closed`].
    pub async fn send(&self, text: &str) -> Result<(), SendError> {
        let sink = {
            let inner = self.shared.lock();
            if inner.state == SessionState::Connected {
                inner.connection.as_ref().map(|c| Arc::clone(&c.sink))
            } else {
                None
            }
        };
        let Some(sink) = sink else {
            return Err(self.report_send_error(SendError::NotConnected));
        };

        let mut writer = sink.lock().await;
        match writer.send(Frame::Text(text.to_string())).await {
            Ok(()) => {
                tracing::debug!(session_id = %self.shared.id, bytes = text.len(), "message sent");
                Ok(())
            }
            Err(err) => Err(self.report_send_error(SendError::SendFailed(err.to_string()))),
        }
    }

    fn report_connect_error(&self, err: ConnectError) -> ConnectError {
        tracing::warn!(session_id = %self.shared.id, kind = err.kind(), error = %err, "connect failed");
        self.shared
            .dispatcher
            .error(format!("Error connecting: {err}"));
        err
    }

    fn report_send_error(&self, err: SendError) -> SendError {
        tracing::warn!(session_id = %self.shared.id, error = %err, "send failed");
        self.shared.dispatcher.error(format!("Error sending: {err}"));
        err
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(connection) = self.shared.lock().reset() {
            connection.reader.abort();
        }
    }
}

/// Applies the optional connect timeout to a connect attempt.
async fn bounded(
    attempt: BoxFuture<'static, Result<Transport, TransportError>>,
    limit: Option<Duration>,
) -> Result<Transport, ConnectError> {
    match limit {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result.map_err(ConnectError::from),
            Err(_) => Err(ConnectError::TimedOut(limit)),
        },
        None => attempt.await.map_err(ConnectError::from),
    }
}

/// Delivers inbound messages until the connection ends.
async fn read_loop(shared: Arc<Shared>, generation: u64, mut stream: FrameStream) {
    let close = loop {
        match stream.next().await {
            Some(Ok(Frame::Text(text))) => {
                tracing::trace!(bytes = text.len(), "text message received");
                shared.dispatcher.message(text);
            }
            // Binary payloads are decoded as UTF-8 text as well.
            Some(Ok(Frame::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => shared.dispatcher.message(text),
                Err(err) => shared
                    .dispatcher
                    .error(format!("Error decoding message: {err}")),
            },
            Some(Ok(Frame::Close(info))) => break info.unwrap_or_else(CloseInfo::no_status),
            Some(Err(err)) => {
                tracing::warn!(error = %err, "read failed");
                break CloseInfo::abnormal(&err.to_string());
            }
            None => break CloseInfo::abnormal("connection lost"),
        }
    };
    shared.remote_closed(generation, close).await;
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::error::ValidationError;
    use crate::session::Severity;
    use crate::transport::{CLOSE_ABNORMAL, CLOSE_NORMAL, LoopbackConnector};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Seen {
        Status(String),
        Error(String),
        Message(String),
        Closed(CloseInfo),
    }

    struct Recorder {
        rx: mpsc::UnboundedReceiver<Seen>,
    }

    impl Recorder {
        fn attach(session: &Session) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let t = tx.clone();
            session.on_notification(move |note| {
                let seen = match note.severity {
                    Severity::Status => Seen::Status(note.text),
                    Severity::Error => Seen::Error(note.text),
                };
                let _ = t.send(seen);
            });
            let t = tx.clone();
            session.on_message_received(move |text| {
                let _ = t.send(Seen::Message(text));
            });
            session.on_closed(move |info| {
                let _ = tx.send(Seen::Closed(info));
            });
            Self { rx }
        }

        async fn next(&mut self) -> Seen {
            match tokio::time::timeout(Duration::from_secs(2), self.rx.recv()).await {
                Ok(Some(seen)) => seen,
                _ => panic!("timed out waiting for a session event"),
            }
        }

        /// Collects events up to and including the first one matching `last`.
        async fn until(&mut self, last: impl Fn(&Seen) -> bool) -> Vec<Seen> {
            let mut seen = Vec::new();
            loop {
                let event = self.next().await;
                let done = last(&event);
                seen.push(event);
                if done {
                    return seen;
                }
            }
        }
    }

    fn uri(text: &str) -> WsUri {
        let Ok(uri) = validate_uri(text) else {
            panic!("uri rejected: {text}");
        };
        uri
    }

    fn session_with(config: SessionConfig) -> (Session, LoopbackConnector) {
        let connector = LoopbackConnector::new();
        (Session::new(connector.clone(), config), connector)
    }

    async fn connected() -> (Session, LoopbackConnector, Recorder) {
        let (session, connector) = session_with(SessionConfig::default());
        let mut recorder = Recorder::attach(&session);
        tokio_test::assert_ok!(session.connect(uri("ws://echo.example/socket")).await);
        recorder
            .until(|s| *s == Seen::Status("Connected.".to_string()))
            .await;
        (session, connector, recorder)
    }

    async fn wait_for_state(session: &Session, state: SessionState) {
        for _ in 0..200 {
            if session.state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session never reached {state}");
    }

    #[tokio::test]
    async fn new_session_is_disconnected() {
        let (session, _) = session_with(SessionConfig::default());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.target_uri(), None);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn connect_success_moves_to_connected() {
        let (session, connector) = session_with(SessionConfig::default());
        let mut recorder = Recorder::attach(&session);

        tokio_test::assert_ok!(session.connect(uri("ws://echo.example/socket")).await);

        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.target_uri(), Some(uri("ws://echo.example/socket")));
        assert_eq!(connector.connect_attempts(), 1);
        assert_eq!(
            recorder.next().await,
            Seen::Status("Connecting to ws://echo.example/socket.".to_string())
        );
        assert_eq!(recorder.next().await, Seen::Status("Connected.".to_string()));
    }

    #[tokio::test]
    async fn connect_failure_returns_to_disconnected() {
        let (session, connector) = session_with(SessionConfig::default());
        let mut recorder = Recorder::attach(&session);
        connector.fail_next_connect(TransportError::Handshake("HTTP 404".to_string()));

        let result = session.connect(uri("ws://echo.example/socket")).await;

        assert_eq!(
            result,
            Err(ConnectError::Failed("handshake failed: HTTP 404".to_string()))
        );
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.target_uri(), None);
        let seen = recorder.until(|s| matches!(s, Seen::Error(_))).await;
        assert_eq!(
            seen.last(),
            Some(&Seen::Error(
                "Error connecting: handshake failed: HTTP 404".to_string()
            ))
        );
        // No retry.
        assert_eq!(connector.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn connect_while_connected_is_rejected() {
        let (session, connector, _recorder) = connected().await;
        let result = session.connect(uri("ws://other.example/")).await;
        assert_eq!(
            result,
            Err(ConnectError::AlreadyActive(SessionState::Connected))
        );
        assert_eq!(connector.connect_attempts(), 1);
        assert_eq!(session.target_uri(), Some(uri("ws://echo.example/socket")));
    }

    #[tokio::test]
    async fn fragment_uri_never_reaches_the_network() {
        let (session, connector) = session_with(SessionConfig::default());
        let mut recorder = Recorder::attach(&session);

        let result = session.connect_str("ws://valid#frag").await;

        assert_eq!(
            result,
            Err(ConnectError::Invalid(ValidationError::FragmentNotAllowed))
        );
        assert_eq!(connector.connect_attempts(), 0);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(
            recorder.next().await,
            Seen::Status("Starting to connect.".to_string())
        );
        assert!(matches!(recorder.next().await, Seen::Error(_)));
    }

    #[tokio::test]
    async fn send_while_disconnected_does_no_io() {
        let (session, connector) = session_with(SessionConfig::default());
        let mut recorder = Recorder::attach(&session);

        assert_eq!(session.send("hello").await, Err(SendError::NotConnected));
        assert!(connector.written().is_empty());
        assert_eq!(connector.connect_attempts(), 0);
        assert_eq!(
            recorder.next().await,
            Seen::Error("Error sending: not connected".to_string())
        );
    }

    #[tokio::test]
    async fn echo_round_trip_precedes_any_close() {
        let (session, connector, mut recorder) = connected().await;

        tokio_test::assert_ok!(session.send("hello").await);

        assert_eq!(recorder.next().await, Seen::Message("hello".to_string()));
        assert_eq!(connector.written(), vec![Frame::Text("hello".to_string())]);
    }

    #[tokio::test]
    async fn messages_arrive_in_order() {
        let (session, _connector, mut recorder) = connected().await;

        for text in ["one", "two", "three"] {
            tokio_test::assert_ok!(session.send(text).await);
        }

        assert_eq!(recorder.next().await, Seen::Message("one".to_string()));
        assert_eq!(recorder.next().await, Seen::Message("two".to_string()));
        assert_eq!(recorder.next().await, Seen::Message("three".to_string()));
    }

    #[tokio::test]
    async fn binary_frames_are_decoded_as_utf8() {
        let (_session, connector, mut recorder) = connected().await;

        assert!(connector.push_frame(Frame::Binary("héllo".as_bytes().to_vec())));
        assert_eq!(recorder.next().await, Seen::Message("héllo".to_string()));

        assert!(connector.push_frame(Frame::Binary(vec![0xff, 0xfe])));
        assert!(matches!(recorder.next().await, Seen::Error(text) if text.starts_with("Error decoding message")));
    }

    #[tokio::test]
    async fn disconnect_sends_normal_close_and_is_idempotent() {
        let (session, connector, mut recorder) = connected().await;

        tokio_test::assert_ok!(session.disconnect("opening new one").await);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.target_uri(), None);

        tokio_test::assert_ok!(session.disconnect("again").await);
        assert_eq!(session.state(), SessionState::Disconnected);

        assert_eq!(
            connector.written(),
            vec![Frame::Close(Some(CloseInfo {
                code: CLOSE_NORMAL,
                reason: "opening new one".to_string(),
            }))]
        );
        assert_eq!(recorder.next().await, Seen::Status("Disconnecting.".to_string()));
        assert_eq!(recorder.next().await, Seen::Status("Disconnected.".to_string()));
    }

    #[tokio::test]
    async fn local_disconnect_does_not_fire_on_closed() {
        let (session, _connector, mut recorder) = connected().await;

        tokio_test::assert_ok!(session.disconnect("bye").await);
        // A later event acts as a fence: everything before it has been delivered.
        assert_eq!(session.send("late").await, Err(SendError::NotConnected));

        let seen = recorder.until(|s| matches!(s, Seen::Error(_))).await;
        assert!(!seen.iter().any(|s| matches!(s, Seen::Closed(_))));
    }

    #[tokio::test]
    async fn remote_close_fires_once_and_disconnects() {
        let (session, connector, mut recorder) = connected().await;

        assert!(connector.close_remote(Some(CloseInfo::new(1001, "going away"))));
        let seen = recorder.until(|s| matches!(s, Seen::Closed(_))).await;
        assert_eq!(
            seen.last(),
            Some(&Seen::Closed(CloseInfo::new(1001, "going away")))
        );
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.target_uri(), None);

        assert_eq!(session.send("after").await, Err(SendError::NotConnected));
        let seen = recorder.until(|s| matches!(s, Seen::Error(_))).await;
        assert!(!seen.iter().any(|s| matches!(s, Seen::Closed(_))));
    }

    #[tokio::test]
    async fn transport_reset_reports_abnormal_closure() {
        let (session, connector, mut recorder) = connected().await;

        assert!(connector.reset_remote());
        let seen = recorder.until(|s| matches!(s, Seen::Closed(_))).await;
        let Some(Seen::Closed(info)) = seen.last() else {
            panic!("expected a closed event");
        };
        assert_eq!(info.code, CLOSE_ABNORMAL);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn can_reconnect_after_remote_close() {
        let (session, connector, mut recorder) = connected().await;
        assert!(connector.close_remote(None));
        recorder.until(|s| matches!(s, Seen::Closed(_))).await;

        tokio_test::assert_ok!(session.connect(uri("ws://echo.example/again")).await);
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(connector.connect_attempts(), 2);

        tokio_test::assert_ok!(session.send("second life").await);
        let seen = recorder.until(|s| matches!(s, Seen::Message(_))).await;
        assert_eq!(seen.last(), Some(&Seen::Message("second life".to_string())));
    }

    #[tokio::test]
    async fn send_failure_keeps_state() {
        let (session, connector, mut recorder) = connected().await;
        connector.break_transport();

        let result = session.send("lost").await;
        assert_eq!(
            result,
            Err(SendError::SendFailed("connection closed".to_string()))
        );
        assert_eq!(session.state(), SessionState::Connected);
        assert!(matches!(recorder.next().await, Seen::Error(_)));
    }

    #[tokio::test]
    async fn failed_disconnect_still_releases_connection() {
        let (session, connector, _recorder) = connected().await;
        connector.break_transport();

        let result = session.disconnect("bye").await;
        assert!(matches!(result, Err(DisconnectError::DisconnectFailed(_))));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.target_uri(), None);
        assert_eq!(session.send("x").await, Err(SendError::NotConnected));

        tokio_test::assert_ok!(session.disconnect("bye").await);
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_connect() {
        let (session, connector) = session_with(SessionConfig::default());
        let session = Arc::new(session);
        connector.hold_connects();

        let attempt = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.connect(uri("ws://slow.example/")).await }
        });
        wait_for_state(&session, SessionState::Connecting).await;
        assert_eq!(session.target_uri(), Some(uri("ws://slow.example/")));

        tokio_test::assert_ok!(session.disconnect("never mind").await);
        assert_eq!(session.state(), SessionState::Disconnected);

        let Ok(result) = attempt.await else {
            panic!("connect task panicked");
        };
        assert_eq!(result, Err(ConnectError::Cancelled));

        connector.release_connects();
        tokio::task::yield_now().await;
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.target_uri(), None);
        assert!(connector.written().is_empty());
    }

    #[tokio::test]
    async fn connect_while_connecting_is_rejected() {
        let (session, connector) = session_with(SessionConfig::default());
        let session = Arc::new(session);
        connector.hold_connects();

        let attempt = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.connect(uri("ws://slow.example/")).await }
        });
        wait_for_state(&session, SessionState::Connecting).await;

        let result = session.connect(uri("ws://other.example/")).await;
        assert_eq!(
            result,
            Err(ConnectError::AlreadyActive(SessionState::Connecting))
        );
        assert_eq!(session.target_uri(), Some(uri("ws://slow.example/")));

        connector.release_connects();
        let Ok(first) = attempt.await else {
            panic!("connect task panicked");
        };
        tokio_test::assert_ok!(first);
        assert_eq!(connector.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn connect_timeout_returns_to_disconnected() {
        let (session, connector) = session_with(SessionConfig {
            connect_timeout: Some(Duration::from_millis(50)),
            ..SessionConfig::default()
        });
        connector.hold_connects();

        let result = session.connect(uri("ws://slow.example/")).await;

        assert_eq!(
            result,
            Err(ConnectError::TimedOut(Duration::from_millis(50)))
        );
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.target_uri(), None);
    }

    /// Peer that speaks first: a text frame is ready as soon as the
    /// handshake completes.
    #[derive(Debug)]
    struct GreetingConnector;

    impl Connector for GreetingConnector {
        fn connect(&self, _uri: &WsUri) -> BoxFuture<'static, Result<Transport, TransportError>> {
            use futures_util::{FutureExt, stream};

            let sink = futures_util::sink::drain::<Frame>()
                .sink_map_err(|never: std::convert::Infallible| match never {});
            let stream = stream::iter([Ok::<_, TransportError>(Frame::Text("greeting".to_string()))])
                .chain(stream::pending())
                .boxed();
            futures_util::future::ready(Ok(Transport {
                sink: Box::pin(sink),
                stream,
            }))
            .boxed()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn connected_precedes_greeting_from_peer() {
        for _ in 0..300 {
            let session = Session::new(GreetingConnector, SessionConfig::default());
            let mut recorder = Recorder::attach(&session);

            tokio_test::assert_ok!(session.connect(uri("ws://greeter.example/")).await);

            assert_eq!(
                recorder.next().await,
                Seen::Status("Connecting to ws://greeter.example/.".to_string())
            );
            assert_eq!(recorder.next().await, Seen::Status("Connected.".to_string()));
            assert_eq!(recorder.next().await, Seen::Message("greeting".to_string()));
        }
    }

    #[tokio::test]
    async fn dropped_connect_future_releases_session() {
        let (session, connector) = session_with(SessionConfig::default());
        connector.hold_connects();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            session.connect(uri("ws://slow.example/")),
        )
        .await;

        assert!(abandoned.is_err());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.target_uri(), None);
    }
}
