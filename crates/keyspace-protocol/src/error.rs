//! Error types for the protocol layer.
//!
//! Decoding errors are per frame: the reader drops the frame that produced
//! them and carries on with the next one.

/// Errors that can occur in the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is truncated or structurally invalid: a length prefix runs
    /// past the end of the buffer, a varint overflows, a string isn't UTF-8,
    /// or an enum field holds an undefined value.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The header names a message kind this codec doesn't know.
    #[error("unknown message kind 0x{0:02x}")]
    UnknownMessageKind(u8),

    /// A key expression failed validation.
    #[error("invalid key expression {0:?}")]
    InvalidKeyExpr(String),

    /// A peer id string isn't 1 to 16 bytes of hex.
    #[error("invalid peer id {0:?}")]
    InvalidPeerId(String),
}
