//! Length-prefixed framing over a tokio byte stream.
//!
//! Every frame on the wire is a 4-byte big-endian body length followed by the
//! body:
//!
//! ```text
//! ┌────────────┬──────────────────┐
//! │ Length     │ Body             │
//! │ u32 BE     │ `Length` bytes   │
//! └────────────┴──────────────────┘
//! ```
//!
//! Frames are self-delimiting, so a body the protocol layer can't decode is
//! simply dropped and the next read starts on the next frame boundary. A
//! length above the configured limit can't be skipped safely and is fatal.

use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf,
};
use tokio::sync::Mutex;

use crate::{Connection, LinkId, TransportError};

/// Default maximum frame body size (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Size of the length prefix in bytes.
const LEN_PREFIX_SIZE: usize = 4;

/// A [`Connection`] over any `AsyncRead + AsyncWrite` stream.
///
/// The stream is split so the read and write halves lock independently: a
/// reader parked in [`recv`](Connection::recv) never holds up senders.
pub struct StreamLink<S> {
    id: LinkId,
    reader: Mutex<ReadHalf<S>>,
    writer: Mutex<WriteHalf<S>>,
    max_frame_size: usize,
}

impl<S> StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wraps an already-connected stream with the default frame limit.
    pub fn new(stream: S) -> Self {
        Self::with_max_frame_size(stream, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Wraps an already-connected stream with a custom frame limit.
    pub fn with_max_frame_size(stream: S, max_frame_size: usize) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let id = LinkId::next();
        tracing::debug!(%id, max_frame_size, "stream link created");
        Self {
            id,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            max_frame_size,
        }
    }

}

impl<S> Connection for StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    type Error = TransportError;

    async fn send(&self, frame: &[u8]) -> Result<(), Self::Error> {
        if frame.len() > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: frame.len(),
                max: self.max_frame_size,
            });
        }

        // One buffer, one write: the prefix and body never interleave with
        // another sender's frame even if the writer lock were bypassed.
        let mut buf = Vec::with_capacity(LEN_PREFIX_SIZE + frame.len());
        buf.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        buf.extend_from_slice(frame);

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&buf)
            .await
            .map_err(TransportError::SendFailed)?;
        writer.flush().await.map_err(TransportError::SendFailed)
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut reader = self.reader.lock().await;

        let mut len_buf = [0u8; LEN_PREFIX_SIZE];
        let mut filled = 0;
        while filled < LEN_PREFIX_SIZE {
            let n = reader
                .read(&mut len_buf[filled..])
                .await
                .map_err(TransportError::ReceiveFailed)?;
            if n == 0 {
                if filled == 0 {
                    // EOF on a frame boundary: clean close.
                    return Ok(None);
                }
                return Err(TransportError::ReceiveFailed(
                    std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "link closed inside a length prefix",
                    ),
                ));
            }
            filled += n;
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }

        let mut body = vec![0u8; len];
        reader
            .read_exact(&mut body)
            .await
            .map_err(TransportError::ReceiveFailed)?;
        Ok(Some(body))
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.writer
            .lock()
            .await
            .shutdown()
            .await
            .map_err(TransportError::SendFailed)
    }

    fn id(&self) -> LinkId {
        self.id
    }

    fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}
