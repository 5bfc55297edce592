//! Feed Transport
//!
//! The seam between the connection supervisor and the network. A
//! [`Transport`] opens one duplex frame connection per call; the
//! supervisor never touches sockets directly, which lets tests drive it
//! with in-memory channels.
//!
//! [`WebSocketTransport`] is the production implementation over
//! `tokio-tungstenite` with rustls.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

// =============================================================================
// Frames
// =============================================================================

/// Frame sent to the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// JSON text frame.
    Text(String),
    /// Graceful close.
    Close,
}

/// Frame received from the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Text (or UTF-8 binary) frame.
    Text(String),
    /// Transport-level ping. The transport queues the pong reply itself.
    Ping,
    /// Transport-level pong.
    Pong,
    /// Server close, with the reason if one was given.
    Close(Option<String>),
}

/// Errors that can occur on a transport connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<OutboundFrame, Error = TransportError> + Send>>;

/// Inbound half of a connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<InboundFrame, TransportError>> + Send>>;

/// An open duplex connection.
pub struct TransportConnection {
    /// Outbound frames.
    pub sink: FrameSink,
    /// Inbound frames. Ends when the peer closes.
    pub stream: FrameStream,
}

impl std::fmt::Debug for TransportConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConnection").finish_non_exhaustive()
    }
}

/// Opens connections to a feed URL.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a new connection.
    async fn connect(&self, url: &str) -> Result<TransportConnection, TransportError>;
}

// =============================================================================
// WebSocket Transport
// =============================================================================

/// `tokio-tungstenite` transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn to_message(frame: OutboundFrame) -> Message {
    match frame {
        OutboundFrame::Text(text) => Message::Text(text.into()),
        OutboundFrame::Close => Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: Utf8Bytes::from_static("client disconnect"),
        })),
    }
}

fn from_message(message: Message) -> Option<InboundFrame> {
    match message {
        Message::Text(text) => Some(InboundFrame::Text(text.as_str().to_owned())),
        Message::Binary(data) => match String::from_utf8(data.to_vec()) {
            Ok(text) => Some(InboundFrame::Text(text)),
            Err(_) => {
                tracing::debug!(len = data.len(), "Ignoring non-UTF-8 binary frame");
                None
            }
        },
        Message::Ping(_) => Some(InboundFrame::Ping),
        Message::Pong(_) => Some(InboundFrame::Pong),
        Message::Close(frame) => Some(InboundFrame::Close(
            frame.map(|close| close.reason.as_str().to_owned()),
        )),
        Message::Frame(_) => None,
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<TransportConnection, TransportError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(TransportError::from)
            .with(|frame: OutboundFrame| {
                futures::future::ready(Ok::<_, TransportError>(to_message(frame)))
            });

        let stream = read.filter_map(|item| {
            futures::future::ready(match item {
                Ok(message) => from_message(message).map(Ok),
                Err(error) => Some(Err(TransportError::from(error))),
            })
        });

        Ok(TransportConnection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
