//! In-memory echo transport.
//!
//! [`LoopbackConnector`] stands in for a remote echo service: every text or
//! binary frame written to the sink comes back on the stream. A clone of the
//! connector shares its control state, so a test can keep one handle to
//! script the peer (fail the next connect, hold connects, close from the
//! remote side, break the socket) and inspect what was written.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use futures_util::stream;
use tokio::sync::{mpsc, watch};

use super::{CloseInfo, Connector, Frame, Transport};
use crate::error::TransportError;
use crate::uri::WsUri;

type PeerSender = mpsc::UnboundedSender<Result<Frame, TransportError>>;

#[derive(Debug)]
struct LoopbackShared {
    connect_attempts: AtomicUsize,
    fail_next: Mutex<Option<TransportError>>,
    gate: watch::Sender<bool>,
    broken: AtomicBool,
    written: Mutex<Vec<Frame>>,
    peer: Mutex<Option<PeerSender>>,
}

/// [`Connector`] whose peer is an in-process echo service.
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    shared: Arc<LoopbackShared>,
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoopbackConnector {
    /// Creates a connector whose connects succeed immediately.
    #[must_use]
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            shared: Arc::new(LoopbackShared {
                connect_attempts: AtomicUsize::new(0),
                fail_next: Mutex::new(None),
                gate,
                broken: AtomicBool::new(false),
                written: Mutex::new(Vec::new()),
                peer: Mutex::new(None),
            }),
        }
    }

    /// Number of times [`Connector::connect`] has been called.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    /// Makes the next connect attempt fail with `err`.
    pub fn fail_next_connect(&self, err: TransportError) {
        *lock(&self.shared.fail_next) = Some(err);
    }

    /// Holds connect attempts until [`Self::release_connects`] is called.
    pub fn hold_connects(&self) {
        self.shared.gate.send_replace(false);
    }

    /// Lets held and future connect attempts proceed.
    pub fn release_connects(&self) {
        self.shared.gate.send_replace(true);
    }

    /// Makes every subsequent write on any open sink fail.
    pub fn break_transport(&self) {
        self.shared.broken.store(true, Ordering::SeqCst);
    }

    /// Every frame written by the client, in order, across connections.
    #[must_use]
    pub fn written(&self) -> Vec<Frame> {
        lock(&self.shared.written).clone()
    }

    /// Sends a close frame from the peer on the current connection.
    ///
    /// Returns `false` if there is no open connection.
    pub fn close_remote(&self, info: Option<CloseInfo>) -> bool {
        self.push_from_peer(Ok(Frame::Close(info)))
    }

    /// Fails the current connection's stream as if the socket were reset.
    ///
    /// Returns `false` if there is no open connection.
    pub fn reset_remote(&self) -> bool {
        self.push_from_peer(Err(TransportError::Io("connection reset by peer".to_string())))
    }

    /// Delivers a frame from the peer that was not an echo.
    ///
    /// Returns `false` if there is no open connection.
    pub fn push_frame(&self, frame: Frame) -> bool {
        self.push_from_peer(Ok(frame))
    }

    fn push_from_peer(&self, item: Result<Frame, TransportError>) -> bool {
        let peer = lock(&self.shared.peer).take();
        let Some(peer) = peer else {
            return false;
        };
        let delivered = peer.send(item.clone()).is_ok();
        if delivered && matches!(item, Ok(Frame::Text(_) | Frame::Binary(_))) {
            *lock(&self.shared.peer) = Some(peer);
        }
        delivered
    }
}

impl Connector for LoopbackConnector {
    fn connect(&self, uri: &WsUri) -> BoxFuture<'static, Result<Transport, TransportError>> {
        let shared = Arc::clone(&self.shared);
        let target = uri.to_string();
        async move {
            shared.connect_attempts.fetch_add(1, Ordering::SeqCst);
            let mut gate = shared.gate.subscribe();
            if gate.wait_for(|open| *open).await.is_err() {
                return Err(TransportError::Closed);
            }
            if let Some(err) = lock(&shared.fail_next).take() {
                return Err(err);
            }
            tracing::trace!(uri = %target, "loopback connection opened");

            let (tx, rx) = mpsc::unbounded_channel();
            *lock(&shared.peer) = Some(tx.clone());
            shared.broken.store(false, Ordering::SeqCst);

            let sink = futures_util::sink::unfold(
                (Arc::clone(&shared), tx),
                |(shared, tx), frame: Frame| async move {
                    if shared.broken.load(Ordering::SeqCst) {
                        return Err(TransportError::Closed);
                    }
                    lock(&shared.written).push(frame.clone());
                    match frame {
                        Frame::Text(_) | Frame::Binary(_) => {
                            // A closed stream means the client dropped its
                            // reader; the write itself still succeeded.
                            let _ = tx.send(Ok(frame));
                        }
                        Frame::Close(_) => {
                            lock(&shared.peer).take();
                        }
                    }
                    Ok((shared, tx))
                },
            );
            let stream = stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });

            Ok(Transport {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        }
        .boxed()
    }
}
