//! Session configuration.
//!
//! A [`Config`] is plain data. Every field has a default, so a JSON file
//! only needs the fields it changes:
//!
//! ```json
//! { "connect": ["tcp/10.0.0.1:7447"], "query_timeout_ms": 2000 }
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use keyspace_protocol::PeerId;
use keyspace_transport::{DEFAULT_MAX_FRAME_SIZE, Endpoint};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Settings for opening a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Router endpoints to try, in order (`tcp/host:port`, `ws/host:port`).
    pub connect: Vec<String>,

    /// This session's peer id as hex. A random id is used when absent.
    pub zid: Option<String>,

    /// How long to wait for the router's `OpenAck`.
    pub handshake_timeout_ms: u64,

    /// Deadline used by [`Session::get`](crate::Session::get) and by
    /// queries that don't set their own.
    pub query_timeout_ms: u64,

    /// Largest frame accepted on stream links.
    pub max_frame_size: usize,

    /// Whether `put` also delivers to this session's own matching
    /// subscribers.
    pub local_routing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect: vec!["tcp/127.0.0.1:7447".to_string()],
            zid: None,
            handshake_timeout_ms: 5_000,
            query_timeout_ms: 10_000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            local_routing: true,
        }
    }
}

impl Config {
    /// Parses and validates a JSON config.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json =
            std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_json(&json)
    }

    /// Sets one field from a JSON value, e.g.
    /// `config.insert_json("connect", r#"["tcp/10.0.0.2:7447"]"#)`.
    pub fn insert_json(
        &mut self,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let value: serde_json::Value = serde_json::from_str(value)?;
        let mut current = serde_json::to_value(&*self)?;
        let Some(fields) = current.as_object_mut() else {
            return Err(ConfigError::Invalid("config is not an object".into()));
        };
        if !fields.contains_key(key) {
            return Err(ConfigError::Invalid(format!("unknown field {key:?}")));
        }
        fields.insert(key.to_string(), value);
        let updated: Self = serde_json::from_value(current)?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Checks value ranges and that every endpoint and the peer id parse.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "handshake_timeout_ms must be positive".into(),
            ));
        }
        if self.query_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "query_timeout_ms must be positive".into(),
            ));
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::Invalid(
                "max_frame_size must be positive".into(),
            ));
        }
        self.endpoints()?;
        self.peer_id()?;
        Ok(())
    }

    /// The parsed `connect` list.
    pub fn endpoints(&self) -> Result<Vec<Endpoint>, ConfigError> {
        self.connect
            .iter()
            .map(|s| {
                Endpoint::from_str(s)
                    .map_err(|e| ConfigError::Invalid(e.to_string()))
            })
            .collect()
    }

    /// The configured peer id, or a fresh random one.
    pub fn peer_id(&self) -> Result<PeerId, ConfigError> {
        match &self.zid {
            Some(hex) => hex
                .parse()
                .map_err(|e: keyspace_protocol::ProtocolError| {
                    ConfigError::Invalid(e.to_string())
                }),
            None => Ok(PeerId::random()),
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}
