//! What callbacks receive: samples, queries, and replies.

use std::fmt;
use std::sync::Arc;

use keyspace_protocol::{ConsolidationMode, Encoding, QueryTarget, SampleKind};

/// One value published on a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Full path the value was published on.
    pub key: String,
    pub payload: Vec<u8>,
    pub encoding: Encoding,
    pub kind: SampleKind,
}

impl Sample {
    /// A `Put` sample with the default encoding.
    pub fn new(key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
            encoding: Encoding::default(),
            kind: SampleKind::Put,
        }
    }

    /// Returns a copy with the given encoding.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// A `Delete` sample: no payload.
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            kind: SampleKind::Delete,
            ..Self::new(key, Vec::new())
        }
    }

    /// The payload as UTF-8, with invalid sequences replaced.
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} '{}'", self.kind, self.key, self.payload_str())
    }
}

/// A query as seen by a queryable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// The key or pattern being asked for.
    pub key: String,
    /// Free-form selector parameters, empty when absent.
    pub predicate: String,
    pub target: QueryTarget,
    pub consolidation: ConsolidationMode,
}

/// One answer to a query issued by this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub query_id: u64,
    pub sample: Sample,
}

/// Invoked for each sample matching a subscription.
pub type DataCallback = Arc<dyn Fn(Sample) + Send + Sync>;

/// Invoked for each query matching a queryable; returns the replies.
pub type QueryCallback = Arc<dyn Fn(&Query) -> Vec<Sample> + Send + Sync>;

/// Invoked for each reply a pending query delivers.
pub type ReplyCallback = Arc<dyn Fn(Reply) + Send + Sync>;
