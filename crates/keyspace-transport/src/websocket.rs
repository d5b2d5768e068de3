//! WebSocket link implementation using `tokio-tungstenite`.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connection, DEFAULT_MAX_FRAME_SIZE, LinkId, TransportError};

/// A [`Connection`] carrying one binary WebSocket message per frame.
///
/// The socket is split into sink and stream halves so receiving and sending
/// lock independently.
pub struct WebSocketLink<S = MaybeTlsStream<TcpStream>> {
    id: LinkId,
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    source: Mutex<SplitStream<WebSocketStream<S>>>,
    max_frame_size: usize,
}

impl WebSocketLink {
    /// Connects to a WebSocket server, e.g. `ws://127.0.0.1:7448`.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        Self::connect_with_limit(url, DEFAULT_MAX_FRAME_SIZE).await
    }

    /// Connects with a custom frame limit. Incoming messages above it are
    /// refused by the WebSocket layer; outgoing ones are rejected locally.
    pub async fn connect_with_limit(
        url: &str,
        max_frame_size: usize,
    ) -> Result<Self, TransportError> {
        let config = ws_config(max_frame_size);
        let (ws, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(config), true)
                .await
                .map_err(|e| {
                    TransportError::ConnectFailed(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        e,
                    ))
                })?;
        tracing::info!(url, max_frame_size, "WebSocket link connected");
        Ok(Self::from_stream_with_limit(ws, max_frame_size))
    }
}

/// Tungstenite limits matching a link frame limit.
fn ws_config(max_frame_size: usize) -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(max_frame_size))
        .max_frame_size(Some(max_frame_size))
}

impl<S> WebSocketLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps an already-established WebSocket stream.
    pub fn from_stream(ws: WebSocketStream<S>) -> Self {
        Self::from_stream_with_limit(ws, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Wraps a stream, rejecting outgoing frames above `max_frame_size`.
    /// The incoming limit is whatever `ws` was configured with.
    pub fn from_stream_with_limit(
        ws: WebSocketStream<S>,
        max_frame_size: usize,
    ) -> Self {
        let (sink, source) = ws.split();
        Self {
            id: LinkId::next(),
            sink: Mutex::new(sink),
            source: Mutex::new(source),
            max_frame_size,
        }
    }
}

impl<S> Connection for WebSocketLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Error = TransportError;

    async fn send(&self, frame: &[u8]) -> Result<(), Self::Error> {
        if frame.len() > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: frame.len(),
                max: self.max_frame_size,
            });
        }
        let msg = Message::Binary(frame.to_vec().into());
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut source = self.source.lock().await;
        loop {
            match source.next().await {
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(data.into()));
                }
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    fn id(&self) -> LinkId {
        self.id
    }

    fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}
