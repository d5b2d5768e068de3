//! Core protocol types shared by messages, the session, and the public API.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Numeric id bound to a resource path (or to a subscriber, queryable, ...).
///
/// Id `0` is reserved: on the wire it means "no id, the key is a full name".
pub type ResourceId = u64;

// ---------------------------------------------------------------------------
// PeerId
// ---------------------------------------------------------------------------

/// Identity of a session endpoint: 1 to 16 opaque bytes, shown as hex.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PeerId(Vec<u8>);

impl PeerId {
    /// Maximum id length in bytes.
    pub const MAX_SIZE: usize = 16;

    /// Creates a peer id from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, ProtocolError> {
        let bytes = bytes.into();
        if bytes.is_empty() || bytes.len() > Self::MAX_SIZE {
            return Err(ProtocolError::InvalidPeerId(hex(&bytes)));
        }
        Ok(Self(bytes))
    }

    /// Generates a random 16-byte peer id.
    pub fn random() -> Self {
        let bytes: [u8; Self::MAX_SIZE] = rand::rng().random();
        Self(bytes.to_vec())
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex(&self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({self})")
    }
}

impl FromStr for PeerId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidPeerId(s.to_string());
        if s.len() % 2 != 0 || !s.is_ascii() {
            return Err(invalid());
        }
        let bytes = (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| invalid())?;
        Self::new(bytes).map_err(|_| invalid())
    }
}

// ---------------------------------------------------------------------------
// ResKey
// ---------------------------------------------------------------------------

/// How a message refers to a resource.
///
/// Declaring a resource binds a numeric id to a path so later messages can
/// send the id instead of the full string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResKey {
    /// A full path, e.g. `/demo/example`.
    Name(String),
    /// A previously declared id. Id `0` is reserved and never bound.
    Id(ResourceId),
    /// A declared id plus a suffix appended to its path. Build it with
    /// [`ResKey::with_suffix`]: with id `0` this is just a name and travels
    /// as one.
    IdWithSuffix(ResourceId, String),
}

impl ResKey {
    /// An id plus suffix, or a plain [`Name`](Self::Name) when `id` is `0`.
    pub fn with_suffix(id: ResourceId, suffix: impl Into<String>) -> Self {
        match id {
            0 => Self::Name(suffix.into()),
            id => Self::IdWithSuffix(id, suffix.into()),
        }
    }

    /// Returns the numeric id, or `0` for a plain name.
    pub fn id(&self) -> ResourceId {
        match self {
            Self::Name(_) => 0,
            Self::Id(id) | Self::IdWithSuffix(id, _) => *id,
        }
    }

    /// Returns the full path if it can be known without a table lookup.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for ResKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Id(id) => write!(f, "#{id}"),
            Self::IdWithSuffix(id, suffix) => write!(f, "#{id}{suffix}"),
        }
    }
}

impl From<&str> for ResKey {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for ResKey {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<ResourceId> for ResKey {
    fn from(id: ResourceId) -> Self {
        Self::Id(id)
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Describes how a payload is encoded.
///
/// Opaque to the session core: it travels with the payload and is handed to
/// the application unchanged. The numeric prefixes follow zenoh's table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Encoding {
    pub prefix: u64,
    #[serde(default)]
    pub suffix: String,
}

impl Encoding {
    pub const EMPTY: Encoding = Encoding::new(0);
    pub const APP_OCTET_STREAM: Encoding = Encoding::new(1);
    pub const APP_CUSTOM: Encoding = Encoding::new(2);
    pub const TEXT_PLAIN: Encoding = Encoding::new(3);
    pub const APP_PROPERTIES: Encoding = Encoding::new(4);
    pub const APP_JSON: Encoding = Encoding::new(5);
    pub const APP_SQL: Encoding = Encoding::new(6);
    pub const APP_INTEGER: Encoding = Encoding::new(7);
    pub const APP_FLOAT: Encoding = Encoding::new(8);
    pub const APP_XML: Encoding = Encoding::new(9);
    pub const TEXT_JSON: Encoding = Encoding::new(12);
    pub const TEXT_HTML: Encoding = Encoding::new(13);
    pub const TEXT_XML: Encoding = Encoding::new(14);
    pub const TEXT_CSV: Encoding = Encoding::new(16);
    pub const IMAGE_JPEG: Encoding = Encoding::new(18);
    pub const IMAGE_PNG: Encoding = Encoding::new(19);

    /// Creates an encoding with no suffix.
    pub const fn new(prefix: u64) -> Self {
        Self {
            prefix,
            suffix: String::new(),
        }
    }

    /// Returns a copy with the given suffix, e.g. a MIME parameter.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Returns `true` for the default (empty) encoding.
    pub fn is_empty(&self) -> bool {
        self.prefix == 0 && self.suffix.is_empty()
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.prefix {
            0 => "",
            1 => "application/octet-stream",
            2 => "application/custom",
            3 => "text/plain",
            4 => "application/properties",
            5 => "application/json",
            6 => "application/sql",
            7 => "application/integer",
            8 => "application/float",
            9 => "application/xml",
            12 => "text/json",
            13 => "text/html",
            14 => "text/xml",
            16 => "text/csv",
            18 => "image/jpeg",
            19 => "image/png",
            other => return write!(f, "encoding-{other}{}", self.suffix),
        };
        write!(f, "{name}{}", self.suffix)
    }
}

// ---------------------------------------------------------------------------
// Small enums carried on the wire
// ---------------------------------------------------------------------------

/// What a data message does to its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    /// A new value.
    #[default]
    Put,
    /// The key was removed.
    Delete,
}

impl SampleKind {
    pub(crate) const fn to_wire(self) -> u64 {
        match self {
            Self::Put => 0,
            Self::Delete => 2,
        }
    }

    pub(crate) fn from_wire(v: u64) -> Result<Self, ProtocolError> {
        match v {
            0 => Ok(Self::Put),
            2 => Ok(Self::Delete),
            other => Err(ProtocolError::MalformedFrame(format!(
                "invalid sample kind {other}"
            ))),
        }
    }
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Put => f.write_str("PUT"),
            Self::Delete => f.write_str("DELETE"),
        }
    }
}

/// Delivery guarantee a subscriber asks the router for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    #[default]
    BestEffort,
    Reliable,
}

/// Whether the router pushes data as it arrives or holds it until pulled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubMode {
    #[default]
    Push,
    Pull,
}

/// Subscription options sent with a subscriber declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubInfo {
    pub reliability: Reliability,
    pub mode: SubMode,
}

impl SubInfo {
    /// Reliable push subscription.
    pub fn reliable() -> Self {
        Self {
            reliability: Reliability::Reliable,
            mode: SubMode::Push,
        }
    }

    /// Returns a copy in pull mode.
    pub fn pull(mut self) -> Self {
        self.mode = SubMode::Pull;
        self
    }
}

/// What a queryable answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryableKind {
    /// Stored values.
    #[default]
    Storage,
    /// Values computed on demand.
    Eval,
    /// Every kind.
    All,
}

impl QueryableKind {
    pub(crate) const fn to_wire(self) -> u64 {
        match self {
            Self::All => 0x01,
            Self::Storage => 0x02,
            Self::Eval => 0x04,
        }
    }

    pub(crate) fn from_wire(v: u64) -> Result<Self, ProtocolError> {
        match v {
            0x01 => Ok(Self::All),
            0x02 => Ok(Self::Storage),
            0x04 => Ok(Self::Eval),
            other => Err(ProtocolError::MalformedFrame(format!(
                "invalid queryable kind {other}"
            ))),
        }
    }
}

/// Which queryables a query should reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryTarget {
    /// The closest queryable that matches.
    #[default]
    BestMatching,
    /// Every matching queryable.
    All,
    /// Every matching queryable that is complete for the key.
    AllComplete,
}

/// How replies for the same key are merged before the caller sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationMode {
    /// Deliver every reply as it arrives.
    None,
    /// Deliver the first reply per key as it arrives; drop later ones.
    Lazy,
    /// Hold replies, keep the last one per key, deliver when the query ends.
    #[default]
    Full,
}

/// The kind of entity an `Undeclare` message removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclKind {
    Resource,
    Publisher,
    Subscriber,
    Queryable,
}

impl fmt::Display for DeclKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource => f.write_str("resource"),
            Self::Publisher => f.write_str("publisher"),
            Self::Subscriber => f.write_str("subscriber"),
            Self::Queryable => f.write_str("queryable"),
        }
    }
}

/// Generates `to_wire`/`from_wire` for enums encoded as their position.
macro_rules! wire_enum {
    ($ty:ident { $($variant:ident = $code:literal),+ $(,)? }) => {
        impl $ty {
            pub(crate) const fn to_wire(self) -> u64 {
                match self {
                    $(Self::$variant => $code,)+
                }
            }

            pub(crate) fn from_wire(v: u64) -> Result<Self, ProtocolError> {
                match v {
                    $($code => Ok(Self::$variant),)+
                    other => Err(ProtocolError::MalformedFrame(format!(
                        concat!("invalid ", stringify!($ty), " {}"),
                        other
                    ))),
                }
            }
        }
    };
}

wire_enum!(QueryTarget { BestMatching = 0, All = 1, AllComplete = 2 });
wire_enum!(ConsolidationMode { None = 0, Lazy = 1, Full = 2 });
wire_enum!(DeclKind { Resource = 0, Publisher = 1, Subscriber = 2, Queryable = 3 });
