//! Handshake plus the reader and writer tasks behind a [`Session`](crate::Session).
//!
//! ```text
//!            ┌──────────── writer task ◀── outbound queue ◀── API calls
//!   link ◀───┘
//!   link ────┐
//!            └──────────── reader task ──▶ Dispatcher ──▶ callbacks
//! ```
//!
//! Neither task retries. A failed send or receive tears the session down
//! and stops both tasks.

use std::sync::Arc;
use std::time::Duration;

use keyspace_protocol::{
    decode, encode, encode_into, Message, PeerId, ResourceTable,
    PROTOCOL_VERSION,
};
use keyspace_session::{Dispatcher, SessionError};
use keyspace_transport::{Connection, TransportError};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::KeyspaceError;

/// Soft limit for batching queued messages into one frame.
const BATCH_BYTES: usize = 64 * 1024;

/// Sends `Open` and waits for the router's `OpenAck`.
///
/// Returns the router's peer id.
pub(crate) async fn handshake<C>(
    conn: &C,
    peer_id: &PeerId,
    timeout: Duration,
) -> Result<PeerId, KeyspaceError>
where
    C: Connection<Error = TransportError>,
{
    let open = Message::Open {
        version: PROTOCOL_VERSION,
        peer_id: peer_id.clone(),
    };
    conn.send(&encode(&open)).await?;

    let failed = |reason: String| -> KeyspaceError {
        SessionError::HandshakeFailed(reason).into()
    };

    let frame = match tokio::time::timeout(timeout, conn.recv()).await {
        Ok(Ok(Some(frame))) => frame,
        Ok(Ok(None)) => {
            return Err(failed("link closed before OpenAck".into()));
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(failed(format!("no OpenAck within {timeout:?}")));
        }
    };

    let (reply, _) = decode(&frame, &ResourceTable::new())
        .map_err(|e| failed(e.to_string()))?;

    match reply {
        Message::OpenAck { version, peer_id } if version == PROTOCOL_VERSION => {
            Ok(peer_id)
        }
        Message::OpenAck { version, .. } => Err(failed(format!(
            "version mismatch: expected {PROTOCOL_VERSION}, got {version}"
        ))),
        Message::Close { reason } => {
            Err(failed(format!("router refused the session: {reason}")))
        }
        other => Err(failed(format!(
            "expected OpenAck, got {}",
            other.kind_name()
        ))),
    }
}

/// Drains the link into the dispatcher until the link ends or the router
/// closes the session.
pub(crate) async fn read_loop<C>(
    conn: Arc<C>,
    dispatcher: Dispatcher,
    writer: AbortHandle,
) where
    C: Connection,
{
    let link = conn.id();
    loop {
        match conn.recv().await {
            Ok(Some(frame)) => {
                if dispatcher.dispatch_frame(&frame).await.is_break() {
                    break;
                }
            }
            Ok(None) => {
                tracing::warn!(%link, "link closed by router");
                dispatcher.link_lost().await;
                break;
            }
            Err(e) => {
                tracing::warn!(%link, error = %e, "link failed");
                dispatcher.link_lost().await;
                break;
            }
        }
    }
    writer.abort();
    let _ = conn.close().await;
    tracing::debug!(%link, "reader stopped");
}

/// Encodes queued messages and sends them, batching whatever is already
/// waiting into one frame no larger than the link accepts. Stops after
/// sending `Close`.
pub(crate) async fn write_loop<C>(
    conn: Arc<C>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    dispatcher: Dispatcher,
) where
    C: Connection<Error = TransportError>,
{
    let link = conn.id();
    let max_frame = conn.max_frame_size();
    let batch_limit = BATCH_BYTES.min(max_frame);
    let mut frame = Vec::with_capacity(256);
    let mut encoded = Vec::with_capacity(256);

    while let Some(first) = outbound.recv().await {
        frame.clear();
        let mut next = Some(first);
        let mut closing = false;

        while let Some(msg) = next.take() {
            closing = matches!(msg, Message::Close { .. });
            encoded.clear();
            encode_into(&msg, &mut encoded);
            if encoded.len() > max_frame {
                tracing::warn!(
                    %link,
                    kind = msg.kind_name(),
                    size = encoded.len(),
                    max = max_frame,
                    "message over the frame limit dropped"
                );
            } else {
                if !frame.is_empty() && frame.len() + encoded.len() > batch_limit {
                    if !flush(&*conn, &frame, &dispatcher).await {
                        return;
                    }
                    frame.clear();
                }
                frame.extend_from_slice(&encoded);
            }
            if closing || frame.len() >= batch_limit {
                break;
            }
            next = outbound.try_recv().ok();
        }

        if !frame.is_empty() && !flush(&*conn, &frame, &dispatcher).await {
            return;
        }
        if closing {
            let _ = conn.close().await;
            break;
        }
    }
    tracing::debug!(%link, "writer stopped");
}

/// Sends one frame. Returns `false` once the link is gone.
///
/// A frame the link refuses for its size is dropped; the link itself is
/// still fine.
async fn flush<C>(conn: &C, frame: &[u8], dispatcher: &Dispatcher) -> bool
where
    C: Connection<Error = TransportError>,
{
    let link = conn.id();
    match conn.send(frame).await {
        Ok(()) => true,
        Err(e @ TransportError::FrameTooLarge { .. }) => {
            tracing::warn!(%link, error = %e, "frame dropped");
            true
        }
        Err(e) => {
            tracing::warn!(%link, error = %e, "send failed");
            dispatcher.link_lost().await;
            tracing::debug!(%link, "writer stopped");
            false
        }
    }
}
