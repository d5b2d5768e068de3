//! Binary wire codec.
//!
//! Each message starts with a one-byte header: the low 5 bits name the
//! message kind, the high 3 bits are per-kind flags. Fields follow in a fixed
//! order:
//!
//! ```text
//! ┌───┬───┬───┬───────────┐
//! │ F │ F │ F │   Kind    │   header byte
//! └───┴───┴───┴───────────┘
//! │ zint / string / bytes fields ...
//! ```
//!
//! Integers use the variable-length "zint" encoding: 7 bits per byte, least
//! significant group first, high bit set on every byte but the last. Strings
//! and byte arrays are a zint length followed by the raw bytes.
//!
//! Resource keys are a zint id (`0` = none) followed, when the `K` flag is
//! set, by a name or suffix string.
//!
//! The codec is stateless. The only outside input is the
//! [`ResourceTable`] handed to [`decode`], used to expand id-keyed references
//! into full paths.

use crate::{
    ConsolidationMode, DeclKind, Encoding, Message, PeerId, ProtocolError,
    QueryTarget, QueryableKind, Reliability, ResKey, ResourceTable,
    SampleKind, SubInfo, SubMode,
};

/// Maximum bytes of a zint carrying a `u64`.
pub const ZINT_MAX_BYTES: usize = 10;

/// Message kind identifiers (low 5 bits of the header).
pub mod id {
    pub const OPEN: u8 = 0x01;
    pub const OPEN_ACK: u8 = 0x02;
    pub const CLOSE: u8 = 0x03;
    pub const DECLARE_RESOURCE: u8 = 0x04;
    pub const DECLARE_PUBLISHER: u8 = 0x05;
    pub const DECLARE_SUBSCRIBER: u8 = 0x06;
    pub const DECLARE_QUERYABLE: u8 = 0x07;
    pub const UNDECLARE: u8 = 0x08;
    pub const DATA: u8 = 0x09;
    pub const PULL: u8 = 0x0a;
    pub const QUERY: u8 = 0x0b;
    pub const REPLY: u8 = 0x0c;
    pub const REPLY_FINAL: u8 = 0x0d;
}

/// Header flags (high 3 bits). Meaning depends on the message kind.
pub mod flag {
    /// Keyed messages: a name or suffix string follows the resource id.
    pub const K: u8 = 0x80;
    /// Data/Reply: a non-default encoding is present.
    pub const E: u8 = 0x40;
    /// Data/Reply: a non-`Put` sample kind is present.
    pub const D: u8 = 0x20;
    /// DeclareSubscriber: reliable delivery requested.
    pub const R: u8 = 0x40;
    /// DeclareSubscriber: pull mode.
    pub const P: u8 = 0x20;
    /// Query: a predicate string is present.
    pub const Q: u8 = 0x40;
}

const KIND_MASK: u8 = 0x1f;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encodes one message into a new buffer.
pub fn encode(msg: &Message) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    encode_into(msg, &mut buf);
    buf
}

/// Appends one encoded message to `buf`.
///
/// Several messages appended back to back form a valid batch frame.
pub fn encode_into(msg: &Message, buf: &mut Vec<u8>) {
    match msg {
        Message::Open { version, peer_id } => {
            buf.push(id::OPEN);
            buf.push(*version);
            write_bytes(buf, peer_id.as_bytes());
        }
        Message::OpenAck { version, peer_id } => {
            buf.push(id::OPEN_ACK);
            buf.push(*version);
            write_bytes(buf, peer_id.as_bytes());
        }
        Message::Close { reason } => {
            buf.push(id::CLOSE);
            write_string(buf, reason);
        }
        Message::DeclareResource { id: rid, key } => {
            buf.push(id::DECLARE_RESOURCE | key_flag(key));
            write_zint(buf, *rid);
            write_res_key(buf, key);
        }
        Message::DeclarePublisher { id: rid, key } => {
            buf.push(id::DECLARE_PUBLISHER | key_flag(key));
            write_zint(buf, *rid);
            write_res_key(buf, key);
        }
        Message::DeclareSubscriber { id: rid, key, info } => {
            let mut header = id::DECLARE_SUBSCRIBER | key_flag(key);
            if info.reliability == Reliability::Reliable {
                header |= flag::R;
            }
            if info.mode == SubMode::Pull {
                header |= flag::P;
            }
            buf.push(header);
            write_zint(buf, *rid);
            write_res_key(buf, key);
        }
        Message::DeclareQueryable { id: rid, key, kind } => {
            buf.push(id::DECLARE_QUERYABLE | key_flag(key));
            write_zint(buf, *rid);
            write_res_key(buf, key);
            write_zint(buf, kind.to_wire());
        }
        Message::Undeclare { kind, id: rid } => {
            buf.push(id::UNDECLARE);
            write_zint(buf, kind.to_wire());
            write_zint(buf, *rid);
        }
        Message::Data {
            key,
            payload,
            encoding,
            kind,
        } => {
            buf.push(id::DATA | key_flag(key) | value_flags(encoding, *kind));
            write_res_key(buf, key);
            write_value(buf, payload, encoding, *kind);
        }
        Message::Pull { id: rid } => {
            buf.push(id::PULL);
            write_zint(buf, *rid);
        }
        Message::Query {
            id: qid,
            key,
            predicate,
            target,
            consolidation,
        } => {
            let mut header = id::QUERY | key_flag(key);
            if !predicate.is_empty() {
                header |= flag::Q;
            }
            buf.push(header);
            write_zint(buf, *qid);
            write_res_key(buf, key);
            if !predicate.is_empty() {
                write_string(buf, predicate);
            }
            write_zint(buf, target.to_wire());
            write_zint(buf, consolidation.to_wire());
        }
        Message::Reply {
            query_id,
            key,
            payload,
            encoding,
            kind,
        } => {
            buf.push(
                id::REPLY | key_flag(key) | value_flags(encoding, *kind),
            );
            write_zint(buf, *query_id);
            write_res_key(buf, key);
            write_value(buf, payload, encoding, *kind);
        }
        Message::ReplyFinal { query_id } => {
            buf.push(id::REPLY_FINAL);
            write_zint(buf, *query_id);
        }
    }
}

/// Writes `v` as a zint.
pub fn write_zint(buf: &mut Vec<u8>, mut v: u64) {
    while v > 0x7f {
        buf.push((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_zint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_bytes(buf, s.as_bytes());
}

fn key_flag(key: &ResKey) -> u8 {
    match key {
        ResKey::Id(_) => 0,
        ResKey::Name(_) | ResKey::IdWithSuffix(..) => flag::K,
    }
}

fn write_res_key(buf: &mut Vec<u8>, key: &ResKey) {
    write_zint(buf, key.id());
    match key {
        ResKey::Name(s) | ResKey::IdWithSuffix(_, s) => write_string(buf, s),
        ResKey::Id(_) => {}
    }
}

fn value_flags(encoding: &Encoding, kind: SampleKind) -> u8 {
    let mut flags = 0;
    if !encoding.is_empty() {
        flags |= flag::E;
    }
    if kind != SampleKind::Put {
        flags |= flag::D;
    }
    flags
}

fn write_value(
    buf: &mut Vec<u8>,
    payload: &[u8],
    encoding: &Encoding,
    kind: SampleKind,
) {
    if !encoding.is_empty() {
        write_zint(buf, encoding.prefix);
        write_string(buf, &encoding.suffix);
    }
    if kind != SampleKind::Put {
        write_zint(buf, kind.to_wire());
    }
    write_bytes(buf, payload);
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decodes one message from the front of `buf`.
///
/// Returns the message and the number of bytes it occupied, so a frame
/// holding several messages can be walked. Id-keyed references bound in
/// `table` are expanded to full names; unbound ids are returned as-is.
///
/// # Errors
/// - [`ProtocolError::MalformedFrame`] for truncated or invalid input
/// - [`ProtocolError::UnknownMessageKind`] for an unrecognized header
pub fn decode(
    buf: &[u8],
    table: &ResourceTable,
) -> Result<(Message, usize), ProtocolError> {
    let mut r = Reader::new(buf);
    let header = r.u8()?;
    let has_key_name = header & flag::K != 0;

    let msg = match header & KIND_MASK {
        id::OPEN => Message::Open {
            version: r.u8()?,
            peer_id: r.peer_id()?,
        },
        id::OPEN_ACK => Message::OpenAck {
            version: r.u8()?,
            peer_id: r.peer_id()?,
        },
        id::CLOSE => Message::Close {
            reason: r.string()?,
        },
        id::DECLARE_RESOURCE => Message::DeclareResource {
            id: r.zint()?,
            key: table.decompress(r.res_key(has_key_name)?),
        },
        id::DECLARE_PUBLISHER => Message::DeclarePublisher {
            id: r.zint()?,
            key: table.decompress(r.res_key(has_key_name)?),
        },
        id::DECLARE_SUBSCRIBER => {
            let rid = r.zint()?;
            let key = table.decompress(r.res_key(has_key_name)?);
            let info = SubInfo {
                reliability: if header & flag::R != 0 {
                    Reliability::Reliable
                } else {
                    Reliability::BestEffort
                },
                mode: if header & flag::P != 0 {
                    SubMode::Pull
                } else {
                    SubMode::Push
                },
            };
            Message::DeclareSubscriber { id: rid, key, info }
        }
        id::DECLARE_QUERYABLE => Message::DeclareQueryable {
            id: r.zint()?,
            key: table.decompress(r.res_key(has_key_name)?),
            kind: QueryableKind::from_wire(r.zint()?)?,
        },
        id::UNDECLARE => Message::Undeclare {
            kind: DeclKind::from_wire(r.zint()?)?,
            id: r.zint()?,
        },
        id::DATA => {
            let key = table.decompress(r.res_key(has_key_name)?);
            let (payload, encoding, kind) = r.value(header)?;
            Message::Data {
                key,
                payload,
                encoding,
                kind,
            }
        }
        id::PULL => Message::Pull { id: r.zint()? },
        id::QUERY => {
            let qid = r.zint()?;
            let key = table.decompress(r.res_key(has_key_name)?);
            let predicate = if header & flag::Q != 0 {
                r.string()?
            } else {
                String::new()
            };
            Message::Query {
                id: qid,
                key,
                predicate,
                target: QueryTarget::from_wire(r.zint()?)?,
                consolidation: ConsolidationMode::from_wire(r.zint()?)?,
            }
        }
        id::REPLY => {
            let query_id = r.zint()?;
            let key = table.decompress(r.res_key(has_key_name)?);
            let (payload, encoding, kind) = r.value(header)?;
            Message::Reply {
                query_id,
                key,
                payload,
                encoding,
                kind,
            }
        }
        id::REPLY_FINAL => Message::ReplyFinal {
            query_id: r.zint()?,
        },
        unknown => return Err(ProtocolError::UnknownMessageKind(unknown)),
    };

    Ok((msg, r.pos))
}

/// Cursor over an input buffer. Every read is bounds-checked.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        let b = *self.buf.get(self.pos).ok_or_else(|| {
            ProtocolError::MalformedFrame("unexpected end of frame".into())
        })?;
        self.pos += 1;
        Ok(b)
    }

    fn zint(&mut self) -> Result<u64, ProtocolError> {
        let mut v: u64 = 0;
        for i in 0..ZINT_MAX_BYTES {
            let b = self.u8()?;
            let group = u64::from(b & 0x7f);
            // The tenth byte may only carry the top bit of a u64.
            if i == ZINT_MAX_BYTES - 1 && group > 1 {
                break;
            }
            v |= group << (7 * i);
            if b & 0x80 == 0 {
                return Ok(v);
            }
        }
        Err(ProtocolError::MalformedFrame(
            "zint exceeds 64 bits".into(),
        ))
    }

    fn bytes(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let len = self.zint()?;
        if len > self.remaining() as u64 {
            return Err(ProtocolError::MalformedFrame(format!(
                "length prefix {len} exceeds the {} remaining bytes",
                self.remaining()
            )));
        }
        let len = len as usize;
        let out = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(out)
    }

    fn string(&mut self) -> Result<String, ProtocolError> {
        String::from_utf8(self.bytes()?).map_err(|_| {
            ProtocolError::MalformedFrame("string is not valid UTF-8".into())
        })
    }

    fn peer_id(&mut self) -> Result<PeerId, ProtocolError> {
        PeerId::new(self.bytes()?)
            .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }

    fn res_key(&mut self, has_name: bool) -> Result<ResKey, ProtocolError> {
        let rid = self.zint()?;
        // Id 0 is never bound, so a bare `Id(0)` resolves to nothing.
        match (rid, has_name) {
            (rid, true) => Ok(ResKey::with_suffix(rid, self.string()?)),
            (rid, false) => Ok(ResKey::Id(rid)),
        }
    }

    fn value(
        &mut self,
        header: u8,
    ) -> Result<(Vec<u8>, Encoding, SampleKind), ProtocolError> {
        let encoding = if header & flag::E != 0 {
            let prefix = self.zint()?;
            Encoding::new(prefix).with_suffix(self.string()?)
        } else {
            Encoding::default()
        };
        let kind = if header & flag::D != 0 {
            SampleKind::from_wire(self.zint()?)?
        } else {
            SampleKind::Put
        };
        let payload = self.bytes()?;
        Ok((payload, encoding, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(b: u8) -> PeerId {
        PeerId::new(vec![b; 4]).unwrap()
    }

    fn decode_plain(buf: &[u8]) -> Result<(Message, usize), ProtocolError> {
        decode(buf, &ResourceTable::new())
    }

    /// One instance of every message kind, with the optional fields both
    /// present and absent somewhere in the set.
    fn sample_messages() -> Vec<Message> {
        vec![
            Message::Open {
                version: 1,
                peer_id: peer(0xaa),
            },
            Message::OpenAck {
                version: 1,
                peer_id: peer(0xbb),
            },
            Message::Close {
                reason: "bye".into(),
            },
            Message::DeclareResource {
                id: 7,
                key: ResKey::from("/x/y"),
            },
            Message::DeclarePublisher {
                id: 8,
                key: ResKey::Id(7),
            },
            Message::DeclareSubscriber {
                id: 9,
                key: ResKey::IdWithSuffix(7, "/**".into()),
                info: SubInfo::reliable().pull(),
            },
            Message::DeclareQueryable {
                id: 10,
                key: ResKey::from("/q/*"),
                kind: QueryableKind::Eval,
            },
            Message::DeclareQueryable {
                id: 11,
                key: ResKey::Id(7),
                kind: QueryableKind::All,
            },
            Message::Undeclare {
                kind: DeclKind::Queryable,
                id: 10,
            },
            Message::put("/a/b", b"payload".to_vec()),
            Message::Data {
                key: ResKey::Id(300),
                payload: Vec::new(),
                encoding: Encoding::TEXT_PLAIN.with_suffix(";utf8"),
                kind: SampleKind::Delete,
            },
            Message::Pull { id: 9 },
            Message::Query {
                id: u64::MAX,
                key: ResKey::from("/a/**"),
                predicate: "start=0".into(),
                target: QueryTarget::All,
                consolidation: ConsolidationMode::Lazy,
            },
            Message::Query {
                id: 1,
                key: ResKey::Id(2),
                predicate: String::new(),
                target: QueryTarget::BestMatching,
                consolidation: ConsolidationMode::Full,
            },
            Message::Reply {
                query_id: 12,
                key: ResKey::from("/a/b"),
                payload: vec![0; 200],
                encoding: Encoding::APP_JSON,
                kind: SampleKind::Put,
            },
            Message::ReplyFinal { query_id: 12 },
        ]
    }

    #[test]
    fn test_decode_encode_round_trip_law() {
        for msg in sample_messages() {
            let bytes = encode(&msg);
            let (decoded, used) = decode_plain(&bytes)
                .unwrap_or_else(|e| panic!("{msg:?} failed: {e}"));
            assert_eq!(decoded, msg);
            assert_eq!(used, bytes.len(), "{msg:?} left bytes unread");
        }
    }

    #[test]
    fn test_decode_reports_bytes_consumed_for_batches() {
        let first = Message::Pull { id: 1 };
        let second = Message::ReplyFinal { query_id: 2 };
        let mut frame = encode(&first);
        encode_into(&second, &mut frame);

        let (m1, n1) = decode_plain(&frame).unwrap();
        let (m2, n2) = decode_plain(&frame[n1..]).unwrap();

        assert_eq!(m1, first);
        assert_eq!(m2, second);
        assert_eq!(n1 + n2, frame.len());
    }

    #[test]
    fn test_decode_with_table_expands_declared_id() {
        // Declare "/x/y" as 7, then data referencing 7: the peer decodes
        // the full path.
        let mut table = ResourceTable::new();
        let decl = encode(&Message::DeclareResource {
            id: 7,
            key: ResKey::from("/x/y"),
        });
        if let (Message::DeclareResource { id, key }, _) =
            decode(&decl, &table).unwrap()
        {
            table.insert(id, key.as_name().unwrap());
        }

        let data = encode(&Message::put(ResKey::Id(7), b"v".to_vec()));
        let (msg, _) = decode(&data, &table).unwrap();

        assert_eq!(msg, Message::put("/x/y", b"v".to_vec()));
    }

    #[test]
    fn test_decode_with_table_expands_suffix() {
        let mut table = ResourceTable::new();
        table.insert(3, "/home");
        let bytes = encode(&Message::put(
            ResKey::IdWithSuffix(3, "/kitchen".into()),
            b"21".to_vec(),
        ));

        let (msg, _) = decode(&bytes, &table).unwrap();
        assert_eq!(msg, Message::put("/home/kitchen", b"21".to_vec()));
    }

    #[test]
    fn test_decode_length_prefix_past_end_is_malformed() {
        let mut bytes = encode(&Message::put("/a", b"abcdef".to_vec()));
        bytes.truncate(bytes.len() - 2);

        let result = decode_plain(&bytes);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_empty_buffer_is_malformed() {
        assert!(matches!(
            decode_plain(&[]),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_unknown_kind() {
        let result = decode_plain(&[0x1f, 0x00]);
        assert_eq!(result, Err(ProtocolError::UnknownMessageKind(0x1f)));
    }

    #[test]
    fn test_decode_reserved_id_zero_round_trips() {
        let msg = Message::put(ResKey::Id(0), b"v".to_vec());
        let (decoded, _) = decode_plain(&encode(&msg)).unwrap();
        assert_eq!(decoded, msg);
        // Nothing is ever bound to id 0.
        let (expanded, _) = decode(&encode(&msg), &ResourceTable::new()).unwrap();
        assert_eq!(expanded, msg);
    }

    #[test]
    fn test_suffix_on_id_zero_is_a_plain_name() {
        let key = ResKey::with_suffix(0, "/a/b");
        assert_eq!(key, ResKey::Name("/a/b".into()));

        let msg = Message::put(key, b"v".to_vec());
        let (decoded, _) = decode_plain(&encode(&msg)).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_decode_invalid_utf8_is_malformed() {
        let bytes = [id::CLOSE, 0x02, 0xff, 0xfe];
        assert!(matches!(
            decode_plain(&bytes),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_invalid_enum_value_is_malformed() {
        // Undeclare with kind 9.
        let bytes = [id::UNDECLARE, 0x09, 0x01];
        assert!(matches!(
            decode_plain(&bytes),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_zint_boundaries() {
        for (v, len) in [(0u64, 1), (0x7f, 1), (0x80, 2), (0x3fff, 2), (u64::MAX, 10)] {
            let mut buf = Vec::new();
            write_zint(&mut buf, v);
            assert_eq!(buf.len(), len, "encoded size of {v}");
            let mut r = Reader::new(&buf);
            assert_eq!(r.zint().unwrap(), v);
        }
    }

    #[test]
    fn test_zint_overflow_is_malformed() {
        let buf = [0xff; 11];
        let mut r = Reader::new(&buf);
        assert!(matches!(r.zint(), Err(ProtocolError::MalformedFrame(_))));

        // Ten bytes whose last group carries more than the top bit.
        let mut buf = vec![0xff; 9];
        buf.push(0x02);
        let mut r = Reader::new(&buf);
        assert!(matches!(r.zint(), Err(ProtocolError::MalformedFrame(_))));
    }
}
