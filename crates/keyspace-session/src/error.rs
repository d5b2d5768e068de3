//! Error types for the session layer.

use keyspace_protocol::ResourceId;

/// Errors that can occur while declaring, publishing, or querying.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The id is already bound, or lies below the next id this session
    /// would issue (ids are never reused).
    #[error("id {0} is already declared")]
    DuplicateDeclaration(ResourceId),

    /// The id counter cannot advance past the last id handed out.
    #[error("no ids left after {0}")]
    IdsExhausted(ResourceId),

    /// No declaration exists with this id.
    #[error("no declaration with id {0}")]
    UnknownId(ResourceId),

    /// The query deadline passed before any reply arrived.
    #[error("query timed out without replies")]
    QueryTimeout,

    /// The link to the router failed or the router closed it.
    #[error("link to the router was lost")]
    LinkLost,

    /// The session was closed, either locally or after a link loss.
    #[error("session is closed")]
    SessionClosed,

    /// A key or pattern failed validation.
    #[error("invalid key expression {0:?}")]
    InvalidKeyExpr(String),

    /// The `Open`/`OpenAck` exchange did not complete.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
}
