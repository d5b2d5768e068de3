//! Unified error type for Keyspace.

use keyspace_protocol::ProtocolError;
use keyspace_session::SessionError;
use keyspace_transport::TransportError;

/// Errors from loading or validating a [`Config`](crate::Config).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The JSON is malformed or has fields of the wrong type.
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value parsed but is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls, so
/// the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum KeyspaceError {
    /// A link-level error (connect, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (invalid key, undecodable message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (closed, timeout, unknown id).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl KeyspaceError {
    /// Returns the session error, if this is one.
    pub fn as_session(&self) -> Option<&SessionError> {
        match self {
            Self::Session(e) => Some(e),
            _ => None,
        }
    }
}
