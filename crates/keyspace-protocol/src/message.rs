//! The messages exchanged between a client session and its router.

use crate::{
    ConsolidationMode, DeclKind, Encoding, PeerId, QueryTarget,
    QueryableKind, ResKey, ResourceId, SampleKind, SubInfo,
};

/// Protocol version carried in the handshake.
pub const PROTOCOL_VERSION: u8 = 1;

/// One protocol message.
///
/// `id` fields of declarations come from the declaring session's id space;
/// `query_id` on replies echoes the id chosen by the querying session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    // -- Session lifecycle --
    /// Client → router: first message on a new link.
    Open { version: u8, peer_id: PeerId },

    /// Router → client: handshake accepted.
    OpenAck { version: u8, peer_id: PeerId },

    /// Either direction: the session is ending.
    Close { reason: String },

    // -- Declarations --
    /// Binds `id` to the path `key` resolves to.
    DeclareResource { id: ResourceId, key: ResKey },

    /// Announces that this session publishes on `key`.
    DeclarePublisher { id: ResourceId, key: ResKey },

    /// Registers interest in data matching `key`.
    DeclareSubscriber {
        id: ResourceId,
        key: ResKey,
        info: SubInfo,
    },

    /// Registers a responder for queries matching `key`.
    DeclareQueryable {
        id: ResourceId,
        key: ResKey,
        kind: QueryableKind,
    },

    /// Removes an earlier declaration.
    Undeclare { kind: DeclKind, id: ResourceId },

    // -- Data --
    /// A publication.
    Data {
        key: ResKey,
        payload: Vec<u8>,
        encoding: Encoding,
        kind: SampleKind,
    },

    /// Asks the router to release data held for a pull subscriber.
    Pull { id: ResourceId },

    // -- Queries --
    /// A query for every value matching `key`.
    Query {
        id: u64,
        key: ResKey,
        predicate: String,
        target: QueryTarget,
        consolidation: ConsolidationMode,
    },

    /// One answer to query `query_id`.
    Reply {
        query_id: u64,
        key: ResKey,
        payload: Vec<u8>,
        encoding: Encoding,
        kind: SampleKind,
    },

    /// No more replies will follow for `query_id`.
    ReplyFinal { query_id: u64 },
}

impl Message {
    /// Short name of the message kind, for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "Open",
            Self::OpenAck { .. } => "OpenAck",
            Self::Close { .. } => "Close",
            Self::DeclareResource { .. } => "DeclareResource",
            Self::DeclarePublisher { .. } => "DeclarePublisher",
            Self::DeclareSubscriber { .. } => "DeclareSubscriber",
            Self::DeclareQueryable { .. } => "DeclareQueryable",
            Self::Undeclare { .. } => "Undeclare",
            Self::Data { .. } => "Data",
            Self::Pull { .. } => "Pull",
            Self::Query { .. } => "Query",
            Self::Reply { .. } => "Reply",
            Self::ReplyFinal { .. } => "ReplyFinal",
        }
    }

    /// Convenience constructor for a `Put` data message with the default
    /// encoding.
    pub fn put(key: impl Into<ResKey>, payload: impl Into<Vec<u8>>) -> Self {
        Self::Data {
            key: key.into(),
            payload: payload.into(),
            encoding: Encoding::default(),
            kind: SampleKind::Put,
        }
    }
}
