//! Network transport backed by `tokio-tungstenite`.
//!
//! Plain `ws://` endpoints use a bare TCP stream; `wss://` endpoints are
//! wrapped in rustls with the webpki root set and the `ring` crypto provider.

use futures_util::future::{self, BoxFuture};
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::{CloseInfo, Connector, Frame, Transport};
use crate::error::TransportError;
use crate::uri::WsUri;

/// [`Connector`] that opens real network connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    /// Creates a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Connector for TungsteniteConnector {
    fn connect(&self, uri: &WsUri) -> BoxFuture<'static, Result<Transport, TransportError>> {
        let target = uri.as_str().to_string();
        if uri.is_secure() {
            install_crypto_provider();
        }
        async move {
            tracing::debug!(uri = %target, "performing websocket handshake");
            let (stream, response) = tokio_tungstenite::connect_async(target.as_str())
                .await
                .map_err(TransportError::from)?;
            tracing::debug!(uri = %target, status = %response.status(), "handshake complete");

            let (sink, stream) = stream.split();
            let sink = sink
                .sink_map_err(TransportError::from)
                .with(|frame: Frame| future::ready(Ok::<_, TransportError>(Message::from(frame))));
            let stream = stream.filter_map(|item| {
                future::ready(match item {
                    Ok(message) => frame_from_message(message).map(Ok),
                    Err(e) => Some(Err(TransportError::from(e))),
                })
            });

            Ok(Transport {
                sink: Box::pin(sink),
                stream: stream.boxed(),
            })
        }
        .boxed()
    }
}

/// Makes `ring` the process-wide rustls provider unless one is installed.
fn install_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_none()
        && rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
    {
        tracing::trace!("rustls crypto provider installed concurrently");
    }
}

/// Maps an inbound message to a frame; control frames yield `None`.
fn frame_from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text.as_str().to_string())),
        Message::Binary(data) => Some(Frame::Binary(data.to_vec())),
        Message::Close(frame) => Some(Frame::Close(frame.map(|f| CloseInfo {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_string(),
        }))),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Self::Text(text.into()),
            Frame::Binary(data) => Self::Binary(data.into()),
            Frame::Close(info) => Self::Close(info.map(|info| CloseFrame {
                code: CloseCode::from(info.code),
                reason: info.reason.into(),
            })),
        }
    }
}

impl From<WsError> for TransportError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::Closed,
            WsError::Io(e) => Self::Io(e.to_string()),
            WsError::Http(response) => Self::Handshake(format!(
                "server answered HTTP {}",
                response.status()
            )),
            WsError::Url(e) => Self::Handshake(e.to_string()),
            other => Self::Protocol(other.to_string()),
        }
    }
}
