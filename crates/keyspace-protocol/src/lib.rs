//! Wire protocol for keyspace sessions.
//!
//! This crate defines what a client session and its router say to each
//! other:
//!
//! - **Keys** ([`KeyExpr`], [`intersect`]): hierarchical paths and the
//!   wildcard matching used to route data and queries.
//! - **Types** ([`Message`], [`ResKey`], [`Encoding`], ...): the structures
//!   that travel on the wire.
//! - **Codec** ([`encode`], [`decode`]): the compact binary encoding of
//!   those messages.
//! - **Tables** ([`ResourceTable`]): the id-to-path bindings needed to
//!   decode id-compressed keys.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (framed bytes) and session
//! (declarations, subscriptions, queries). It knows nothing about links or
//! callbacks; it only turns messages into bytes and back.
//!
//! ```text
//! Transport (frames) → Protocol (Message) → Session (routing + callbacks)
//! ```

mod codec;
mod error;
mod keyexpr;
mod message;
mod table;
mod types;

pub use codec::{decode, encode, encode_into, ZINT_MAX_BYTES};
pub use error::ProtocolError;
pub use keyexpr::{intersect, KeyExpr};
pub use message::{Message, PROTOCOL_VERSION};
pub use table::ResourceTable;
pub use types::{
    ConsolidationMode, DeclKind, Encoding, PeerId, QueryTarget, QueryableKind,
    Reliability, ResKey, ResourceId, SampleKind, SubInfo, SubMode,
};
