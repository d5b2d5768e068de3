//! Link abstraction layer for Keyspace.
//!
//! Provides the [`Connection`] trait that the session core runs on, plus the
//! framed links that implement it:
//!
//! - [`StreamLink`]: length-prefixed frames over any tokio byte stream
//!   (TCP, Unix sockets, in-memory duplex pipes)
//! - [`WebSocketLink`]: one binary WebSocket message per frame
//! - [`Link`]: an enum over both, produced by [`connect`] from an [`Endpoint`]
//!
//! A link moves opaque frames. It knows nothing about messages, and it never
//! retries: a failed send or receive is reported and the caller decides what
//! the loss of the link means.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket links via `tokio-tungstenite`

mod endpoint;
mod error;
mod stream;
#[cfg(feature = "websocket")]
mod websocket;

pub use endpoint::{connect, connect_with_limit, Endpoint, Link};
pub use error::TransportError;
pub use stream::{StreamLink, DEFAULT_MAX_FRAME_SIZE};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketLink;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique link IDs.
static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(u64);

impl LinkId {
    /// Creates a new `LinkId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-wide link id.
    pub(crate) fn next() -> Self {
        Self(NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// A single reliable link that sends and receives whole frames.
///
/// Implementations must allow one task to sit in [`recv`](Self::recv) while
/// other tasks call [`send`](Self::send); the session core relies on that to
/// run its reader and writer concurrently.
///
/// The returned futures are `Send` so the session can drive them from
/// spawned tasks without knowing the concrete link type.
pub trait Connection: Send + Sync + 'static {
    /// The error type for link operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends one frame to the remote peer.
    fn send(
        &self,
        frame: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the link is cleanly closed.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Closes the link.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this link.
    fn id(&self) -> LinkId;

    /// Largest frame [`send`](Self::send) accepts. Larger frames fail with a
    /// local error and leave the link usable.
    fn max_frame_size(&self) -> usize {
        usize::MAX
    }
}
