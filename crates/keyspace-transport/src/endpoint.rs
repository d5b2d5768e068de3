//! Endpoints (`tcp/host:port`, `ws/host:port`) and the [`Link`] they open.

use std::fmt;
use std::str::FromStr;

use tokio::net::TcpStream;

#[cfg(feature = "websocket")]
use crate::WebSocketLink;
use crate::{
    Connection, DEFAULT_MAX_FRAME_SIZE, LinkId, StreamLink, TransportError,
};

/// Where a router can be reached.
///
/// Written as `<protocol>/<address>`, e.g. `tcp/127.0.0.1:7447` or
/// `ws/router.local:7448`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Length-prefixed frames over TCP.
    Tcp(String),
    /// Binary WebSocket messages.
    WebSocket(String),
}

impl Endpoint {
    /// Returns the address part (`host:port`).
    pub fn address(&self) -> &str {
        match self {
            Self::Tcp(addr) | Self::WebSocket(addr) => addr,
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (proto, addr) = s.split_once('/').ok_or_else(|| {
            TransportError::InvalidEndpoint(format!(
                "{s}: expected <protocol>/<address>"
            ))
        })?;
        if addr.is_empty() {
            return Err(TransportError::InvalidEndpoint(format!(
                "{s}: missing address"
            )));
        }
        match proto {
            "tcp" => Ok(Self::Tcp(addr.to_string())),
            "ws" => Ok(Self::WebSocket(addr.to_string())),
            other => Err(TransportError::InvalidEndpoint(format!(
                "{s}: unsupported protocol {other:?}"
            ))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp/{addr}"),
            Self::WebSocket(addr) => write!(f, "ws/{addr}"),
        }
    }
}

/// A link opened from an [`Endpoint`].
pub enum Link {
    /// TCP stream link.
    Tcp(StreamLink<TcpStream>),
    /// WebSocket link.
    #[cfg(feature = "websocket")]
    WebSocket(WebSocketLink),
}

/// Opens a link to the given endpoint.
pub async fn connect(endpoint: &Endpoint) -> Result<Link, TransportError> {
    connect_with_limit(endpoint, DEFAULT_MAX_FRAME_SIZE).await
}

/// Opens a link that rejects frames above `max_frame_size` in both
/// directions.
pub async fn connect_with_limit(
    endpoint: &Endpoint,
    max_frame_size: usize,
) -> Result<Link, TransportError> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr.as_str())
                .await
                .map_err(TransportError::ConnectFailed)?;
            // Frames are small and latency matters more than throughput.
            stream
                .set_nodelay(true)
                .map_err(TransportError::ConnectFailed)?;
            tracing::info!(%endpoint, "TCP link connected");
            Ok(Link::Tcp(StreamLink::with_max_frame_size(
                stream,
                max_frame_size,
            )))
        }
        #[cfg(feature = "websocket")]
        Endpoint::WebSocket(addr) => {
            let link = WebSocketLink::connect_with_limit(
                &format!("ws://{addr}"),
                max_frame_size,
            )
            .await?;
            Ok(Link::WebSocket(link))
        }
        #[cfg(not(feature = "websocket"))]
        Endpoint::WebSocket(_) => Err(TransportError::InvalidEndpoint(
            format!("{endpoint}: built without the `websocket` feature"),
        )),
    }
}

impl Connection for Link {
    type Error = TransportError;

    async fn send(&self, frame: &[u8]) -> Result<(), Self::Error> {
        match self {
            Self::Tcp(link) => link.send(frame).await,
            #[cfg(feature = "websocket")]
            Self::WebSocket(link) => link.send(frame).await,
        }
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        match self {
            Self::Tcp(link) => link.recv().await,
            #[cfg(feature = "websocket")]
            Self::WebSocket(link) => link.recv().await,
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        match self {
            Self::Tcp(link) => link.close().await,
            #[cfg(feature = "websocket")]
            Self::WebSocket(link) => link.close().await,
        }
    }

    fn id(&self) -> LinkId {
        match self {
            Self::Tcp(link) => link.id(),
            #[cfg(feature = "websocket")]
            Self::WebSocket(link) => link.id(),
        }
    }

    fn max_frame_size(&self) -> usize {
        match self {
            Self::Tcp(link) => link.max_frame_size(),
            #[cfg(feature = "websocket")]
            Self::WebSocket(link) => link.max_frame_size(),
        }
    }
}
