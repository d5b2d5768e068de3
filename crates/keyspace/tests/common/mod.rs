//! A scripted stand-in for a router, driven by the test body.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use keyspace::protocol::{
    decode, encode, Message, PeerId, ResKey, ResourceTable, PROTOCOL_VERSION,
};
use keyspace::transport::{Connection, StreamLink};
use keyspace::{Config, Session};
use tokio::io::DuplexStream;

/// How long the router waits for the next message before failing the test.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub fn router_id() -> PeerId {
    PeerId::new(vec![0xaa, 0xbb]).unwrap()
}

/// Config for tests: fixed peer id, short handshake.
pub fn test_config() -> Config {
    Config {
        zid: Some("0102".into()),
        handshake_timeout_ms: 1_000,
        ..Config::default()
    }
}

/// The router end of an in-memory link.
pub struct FakeRouter {
    link: StreamLink<DuplexStream>,
    /// Resource ids the session declared, applied as they arrive.
    pub table: ResourceTable,
    pending: VecDeque<Message>,
}

impl FakeRouter {
    /// Creates a linked (client link, router) pair.
    pub fn pair() -> (StreamLink<DuplexStream>, FakeRouter) {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let router = FakeRouter {
            link: StreamLink::new(server),
            table: ResourceTable::new(),
            pending: VecDeque::new(),
        };
        (StreamLink::new(client), router)
    }

    /// Like [`pair`](Self::pair), but the client link refuses frames over
    /// `max_frame_size` bytes.
    pub fn pair_with_limit(
        max_frame_size: usize,
    ) -> (StreamLink<DuplexStream>, FakeRouter) {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let router = FakeRouter {
            link: StreamLink::new(server),
            table: ResourceTable::new(),
            pending: VecDeque::new(),
        };
        (StreamLink::with_max_frame_size(client, max_frame_size), router)
    }

    /// Opens a session against a router that accepts the handshake.
    pub async fn open(config: Config) -> (Session, FakeRouter) {
        Self::open_on(Self::pair(), config).await
    }

    /// Opens a session whose link refuses frames over `max_frame_size`.
    pub async fn open_with_limit(
        config: Config,
        max_frame_size: usize,
    ) -> (Session, FakeRouter) {
        Self::open_on(Self::pair_with_limit(max_frame_size), config).await
    }

    async fn open_on(
        (client, mut router): (StreamLink<DuplexStream>, FakeRouter),
        config: Config,
    ) -> (Session, FakeRouter) {
        let (session, ()) =
            tokio::join!(Session::open(client, config), router.accept());
        (session.expect("session should open"), router)
    }

    /// Reads the client's `Open` and answers with `OpenAck`.
    pub async fn accept(&mut self) {
        match self.recv().await {
            Message::Open { version, .. } => assert_eq!(version, PROTOCOL_VERSION),
            other => panic!("expected Open, got {other:?}"),
        }
        self.send(&Message::OpenAck {
            version: PROTOCOL_VERSION,
            peer_id: router_id(),
        })
        .await;
    }

    /// Next message from the session. Panics if none arrives in time.
    pub async fn recv(&mut self) -> Message {
        if let Some(msg) = self.pending.pop_front() {
            return msg;
        }
        let frame = tokio::time::timeout(RECV_TIMEOUT, self.link.recv())
            .await
            .expect("router timed out waiting for a message")
            .expect("router link failed")
            .expect("session closed the link");
        let mut pos = 0;
        while pos < frame.len() {
            let (msg, used) =
                decode(&frame[pos..], &self.table).expect("session sent garbage");
            pos += used;
            self.track(&msg);
            self.pending.push_back(msg);
        }
        self.pending.pop_front().expect("frame held no message")
    }

    /// Returns `true` if the session closed the link.
    pub async fn recv_eof(&mut self) -> bool {
        matches!(
            tokio::time::timeout(RECV_TIMEOUT, self.link.recv()).await,
            Ok(Ok(None)) | Ok(Err(_))
        )
    }

    pub async fn send(&self, msg: &Message) {
        self.link.send(&encode(msg)).await.expect("router send failed");
    }

    /// Publishes a `Put` to the session.
    pub async fn publish(&self, key: &str, payload: &[u8]) {
        self.send(&Message::put(key, payload.to_vec())).await;
    }

    /// Closes the router end, as a crashed router would.
    pub async fn hang_up(self) {
        let _ = self.link.close().await;
        drop(self);
    }

    fn track(&mut self, msg: &Message) {
        match msg {
            Message::DeclareResource {
                id,
                key: ResKey::Name(path),
            } => {
                self.table.insert(*id, path.clone());
            }
            Message::Undeclare {
                kind: keyspace::protocol::DeclKind::Resource,
                id,
            } => {
                self.table.remove(*id);
            }
            _ => {}
        }
    }
}

/// Extracts the query id from a `Query` message.
pub fn query_id(msg: &Message) -> u64 {
    match msg {
        Message::Query { id, .. } => *id,
        other => panic!("expected Query, got {other:?}"),
    }
}

/// A `Reply` carrying `payload` on `key`.
pub fn reply(query_id: u64, key: &str, payload: &[u8]) -> Message {
    Message::Reply {
        query_id,
        key: key.into(),
        payload: payload.to_vec(),
        encoding: Default::default(),
        kind: Default::default(),
    }
}
