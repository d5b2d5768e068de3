//! Integration tests for `Session` against a scripted router.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{query_id, reply, test_config, FakeRouter};
use keyspace::prelude::*;
use keyspace::protocol::{DeclKind, Message, PeerId, ResKey, PROTOCOL_VERSION};
use keyspace::transport::TransportError;
use tokio::time::Instant;

fn session_error(err: KeyspaceError) -> SessionError {
    match err {
        KeyspaceError::Session(e) => e,
        other => panic!("expected a session error, got {other:?}"),
    }
}

/// Waits until the session has handled everything the router sent before:
/// the router's `ReplyFinal` to an empty query is processed in order.
async fn sync(session: &Session, router: &mut FakeRouter) {
    let s = session.clone();
    let query = tokio::spawn(async move {
        s.query("/__sync", |_| {}, Duration::from_secs(5)).await
    });
    let id = query_id(&router.recv().await);
    router.send(&Message::ReplyFinal { query_id: id }).await;
    assert_eq!(query.await.unwrap().unwrap(), 0);
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_open_exchanges_peer_ids() {
    let (session, _router) = FakeRouter::open(test_config()).await;

    let info = session.info();
    assert_eq!(info.peer_id.to_string(), "0102");
    assert_eq!(info.router_id, common::router_id());
    assert!(session.is_open().await);
}

#[tokio::test]
async fn test_open_version_mismatch_fails() {
    let (client, mut router) = FakeRouter::pair();
    let script = async {
        router.recv().await;
        router
            .send(&Message::OpenAck {
                version: PROTOCOL_VERSION + 1,
                peer_id: PeerId::new(vec![1]).unwrap(),
            })
            .await;
    };

    let (result, ()) = tokio::join!(Session::open(client, test_config()), script);

    let err = result.err().expect("open should fail");
    assert!(matches!(
        session_error(err),
        SessionError::HandshakeFailed(reason) if reason.contains("version mismatch")
    ));
}

#[tokio::test]
async fn test_open_rejected_with_close_fails() {
    let (client, mut router) = FakeRouter::pair();
    let script = async {
        router.recv().await;
        router.send(&Message::Close { reason: "full".into() }).await;
    };

    let (result, ()) = tokio::join!(Session::open(client, test_config()), script);

    assert!(matches!(
        result.err().map(session_error),
        Some(SessionError::HandshakeFailed(reason)) if reason.contains("full")
    ));
}

#[tokio::test(start_paused = true)]
async fn test_open_without_ack_times_out() {
    let (client, mut router) = FakeRouter::pair();
    let script = async {
        assert!(matches!(router.recv().await, Message::Open { .. }));
    };

    let start = Instant::now();
    let (result, ()) = tokio::join!(Session::open(client, test_config()), script);

    assert!(matches!(
        result.err().map(session_error),
        Some(SessionError::HandshakeFailed(_))
    ));
    assert!(start.elapsed() >= Duration::from_millis(1_000));
}

#[tokio::test]
async fn test_open_rejects_invalid_config() {
    let (client, _router) = FakeRouter::pair();
    let config = Config {
        query_timeout_ms: 0,
        ..test_config()
    };
    let result = Session::open(client, config).await;
    assert!(matches!(result, Err(KeyspaceError::Config(_))));
}

// =========================================================================
// Subscriptions
// =========================================================================

#[tokio::test]
async fn test_subscribe_single_wild_delivers_one_level_only() {
    let (session, mut router) = FakeRouter::open(test_config()).await;
    let (sub, mut samples) = session.subscribe_channel("/a/*").await.unwrap();

    match router.recv().await {
        Message::DeclareSubscriber { id, key, info } => {
            assert_eq!(id, sub.id());
            assert_eq!(key, ResKey::Name("/a/*".into()));
            assert_eq!(info, SubInfo::default());
        }
        other => panic!("expected DeclareSubscriber, got {other:?}"),
    }

    router.publish("/a/b", b"hello").await;
    router.publish("/a/b/c", b"too deep").await;
    router.publish("/a/z", b"end").await;

    let first = samples.recv().await.unwrap();
    assert_eq!(first.key, "/a/b");
    assert_eq!(first.payload, b"hello");
    assert_eq!(first.kind, SampleKind::Put);
    assert_eq!(samples.recv().await.unwrap().key, "/a/z");
}

#[tokio::test]
async fn test_subscribe_invokes_every_matching_callback_once() {
    let (session, mut router) = FakeRouter::open(test_config()).await;
    let hits = Arc::new(AtomicUsize::new(0));
    let mut subs = Vec::new();
    for pattern in ["/home/**", "/home/*/temp", "/home/kitchen/temp", "/garage/**"] {
        let hits = hits.clone();
        subs.push(
            session
                .subscribe(pattern, move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap(),
        );
        router.recv().await;
    }

    router.publish("/home/kitchen/temp", b"21").await;
    sync(&session, &mut router).await;

    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_undeclare_stops_delivery() {
    let (session, mut router) = FakeRouter::open(test_config()).await;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let sub = session
        .subscribe("/a", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
    let id = sub.id();
    router.recv().await;

    router.publish("/a", b"1").await;
    sync(&session, &mut router).await;
    sub.undeclare().await.unwrap();

    assert_eq!(
        router.recv().await,
        Message::Undeclare {
            kind: DeclKind::Subscriber,
            id
        }
    );
    router.publish("/a", b"2").await;
    sync(&session, &mut router).await;

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_subscriber_drop_undeclares_in_background() {
    let (session, mut router) = FakeRouter::open(test_config()).await;
    let sub = session.subscribe("/a/**", |_| {}).await.unwrap();
    let id = sub.id();
    router.recv().await;

    drop(sub);

    assert_eq!(
        router.recv().await,
        Message::Undeclare {
            kind: DeclKind::Subscriber,
            id
        }
    );
}

#[tokio::test]
async fn test_pull_subscriber_sends_pull() {
    let (session, mut router) = FakeRouter::open(test_config()).await;
    let sub = session
        .subscribe_with("/sensor/**", SubInfo::reliable().pull(), |_| {})
        .await
        .unwrap();
    match router.recv().await {
        Message::DeclareSubscriber { info, .. } => {
            assert_eq!(info.mode, SubMode::Pull);
            assert_eq!(info.reliability, Reliability::Reliable);
        }
        other => panic!("expected DeclareSubscriber, got {other:?}"),
    }

    sub.pull().await.unwrap();

    assert_eq!(router.recv().await, Message::Pull { id: sub.id() });
}

// =========================================================================
// Publication and resources
// =========================================================================

#[tokio::test]
async fn test_declared_id_decodes_to_path_on_router() {
    let (session, mut router) = FakeRouter::open(test_config()).await;

    session.declare_resource_with_id(7, "/x/y").await.unwrap();
    session.put("/x/y", "v").await.unwrap();

    assert_eq!(
        router.recv().await,
        Message::DeclareResource {
            id: 7,
            key: ResKey::Name("/x/y".into())
        }
    );
    // The session sent id 7; the router's table expands it.
    assert_eq!(router.recv().await, Message::put("/x/y", b"v".to_vec()));
}

#[tokio::test]
async fn test_declare_resource_with_used_id_fails() {
    let (session, _router) = FakeRouter::open(test_config()).await;
    session.declare_resource_with_id(7, "/x/y").await.unwrap();

    let err = session.declare_resource_with_id(7, "/other").await.unwrap_err();
    assert_eq!(session_error(err), SessionError::DuplicateDeclaration(7));

    let next = session.declare_resource("/z").await.unwrap();
    assert_eq!(next, 8);
}

#[tokio::test]
async fn test_put_below_declared_prefix_uses_suffix() {
    let (session, mut router) = FakeRouter::open(test_config()).await;
    let home = session.declare_resource("/home").await.unwrap();
    router.recv().await;

    // Decode without the table to see the raw key form.
    router.table.clear();
    session
        .put_with("/home/kitchen", "21", Encoding::TEXT_PLAIN)
        .await
        .unwrap();

    match router.recv().await {
        Message::Data { key, encoding, .. } => {
            assert_eq!(key, ResKey::IdWithSuffix(home, "/kitchen".into()));
            assert_eq!(encoding, Encoding::TEXT_PLAIN);
        }
        other => panic!("expected Data, got {other:?}"),
    }
}

#[tokio::test]
async fn test_put_rejects_wildcard_and_invalid_keys() {
    let (session, _router) = FakeRouter::open(test_config()).await;

    assert!(matches!(
        session.put("/a/*", "x").await,
        Err(KeyspaceError::Session(SessionError::InvalidKeyExpr(_)))
    ));
    assert!(matches!(
        session.put("no-slash", "x").await,
        Err(KeyspaceError::Protocol(_))
    ));
}

#[tokio::test]
async fn test_delete_sends_delete_kind() {
    let (session, mut router) = FakeRouter::open(test_config()).await;

    session.delete("/a/b").await.unwrap();

    match router.recv().await {
        Message::Data { kind, payload, .. } => {
            assert_eq!(kind, SampleKind::Delete);
            assert!(payload.is_empty());
        }
        other => panic!("expected Data, got {other:?}"),
    }
}

#[tokio::test]
async fn test_publisher_declares_then_puts_on_its_key() {
    let (session, mut router) = FakeRouter::open(test_config()).await;

    let publisher = session.declare_publisher("/demo/out").await.unwrap();
    publisher.put("one").await.unwrap();
    publisher.undeclare().await.unwrap();

    assert!(matches!(
        router.recv().await,
        Message::DeclarePublisher { key: ResKey::Name(k), .. } if k == "/demo/out"
    ));
    assert_eq!(router.recv().await, Message::put("/demo/out", b"one".to_vec()));
    assert!(matches!(
        router.recv().await,
        Message::Undeclare { kind: DeclKind::Publisher, .. }
    ));
}

#[tokio::test]
async fn test_put_burst_is_split_into_frames_the_link_accepts() {
    let (session, mut router) =
        FakeRouter::open_with_limit(test_config(), 1024).await;

    for i in 0..50 {
        session.put(&format!("/burst/{i}"), vec![b'x'; 100]).await.unwrap();
    }

    for i in 0..50 {
        match router.recv().await {
            Message::Data { key: ResKey::Name(k), payload, .. } => {
                assert_eq!(k, format!("/burst/{i}"));
                assert_eq!(payload.len(), 100);
            }
            other => panic!("expected Data, got {other:?}"),
        }
    }
    assert!(session.is_open().await);
}

#[tokio::test]
async fn test_put_over_frame_limit_fails_and_session_stays_open() {
    let (session, mut router) =
        FakeRouter::open_with_limit(test_config(), 1024).await;

    let err = session.put("/big", vec![0u8; 4096]).await.unwrap_err();
    assert!(matches!(
        err,
        KeyspaceError::Transport(TransportError::FrameTooLarge { size, max: 1024 })
            if size > 4096
    ));

    assert!(session.is_open().await);
    session.put("/small", "ok").await.unwrap();
    assert_eq!(router.recv().await, Message::put("/small", b"ok".to_vec()));
}

#[tokio::test]
async fn test_put_with_local_routing_reaches_own_subscriber() {
    let (session, _router) = FakeRouter::open(test_config()).await;
    let (_sub, mut samples) = session.subscribe_channel("/local/**").await.unwrap();

    session.put("/local/a", "mine").await.unwrap();

    let sample = samples.try_recv().expect("delivered before put returns");
    assert_eq!(sample.payload, b"mine");
}

#[tokio::test]
async fn test_put_without_local_routing_skips_own_subscriber() {
    let config = Config {
        local_routing: false,
        ..test_config()
    };
    let (session, _router) = FakeRouter::open(config).await;
    let (_sub, mut samples) = session.subscribe_channel("/local/**").await.unwrap();

    session.put("/local/a", "mine").await.unwrap();

    assert!(samples.try_recv().is_err());
}

// =========================================================================
// Queries
// =========================================================================

#[tokio::test]
async fn test_query_delivers_replies_until_final() {
    let (session, mut router) = FakeRouter::open(test_config()).await;
    let s = session.clone();
    let query = tokio::spawn(async move {
        s.get("/store/**", Duration::from_secs(5)).await
    });

    let msg = router.recv().await;
    let id = query_id(&msg);
    assert!(matches!(
        &msg,
        Message::Query { key: ResKey::Name(k), consolidation: ConsolidationMode::Full, .. }
            if k == "/store/**"
    ));
    router.send(&reply(id, "/store/b", b"2")).await;
    router.send(&reply(id, "/store/a", b"1")).await;
    router.send(&Message::ReplyFinal { query_id: id }).await;

    let replies = query.await.unwrap().unwrap();
    let keys: Vec<&str> = replies.iter().map(|r| r.sample.key.as_str()).collect();
    assert_eq!(keys, ["/store/a", "/store/b"]);
    assert!(replies.iter().all(|r| r.query_id == id));
}

#[tokio::test]
async fn test_query_with_sends_options_and_stops_at_expected_count() {
    let (session, mut router) = FakeRouter::open(test_config()).await;
    let got = Arc::new(Mutex::new(Vec::new()));
    let sink = got.clone();
    let s = session.clone();
    let query = tokio::spawn(async move {
        let options = QueryOptions {
            predicate: "start=0".into(),
            target: QueryTarget::All,
            consolidation: ConsolidationMode::None,
            timeout: Some(Duration::from_secs(5)),
            expected_replies: Some(2),
        };
        s.query_with("/a/*", options, move |r| sink.lock().unwrap().push(r))
            .await
    });

    let msg = router.recv().await;
    match &msg {
        Message::Query {
            predicate, target, ..
        } => {
            assert_eq!(predicate, "start=0");
            assert_eq!(*target, QueryTarget::All);
        }
        other => panic!("expected Query, got {other:?}"),
    }
    let id = query_id(&msg);
    router.send(&reply(id, "/a/x", b"1")).await;
    router.send(&reply(id, "/a/x", b"2")).await;

    // No ReplyFinal: the second reply completes the query.
    assert_eq!(query.await.unwrap().unwrap(), 2);
    assert_eq!(got.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_query_without_replies_times_out_at_deadline() {
    let (session, mut router) = FakeRouter::open(test_config()).await;
    let s = session.clone();
    let start = Instant::now();
    let query = tokio::spawn(async move {
        s.query("/silent/**", |_| {}, Duration::from_millis(500)).await
    });
    router.recv().await;

    let err = query.await.unwrap().unwrap_err();
    let elapsed = start.elapsed();

    assert_eq!(session_error(err), SessionError::QueryTimeout);
    assert!(elapsed >= Duration::from_millis(500), "fired early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "fired late: {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_query_deadline_with_partial_replies_keeps_them() {
    let (session, mut router) = FakeRouter::open(test_config()).await;
    let got = Arc::new(Mutex::new(Vec::new()));
    let sink = got.clone();
    let s = session.clone();
    let query = tokio::spawn(async move {
        let options = QueryOptions {
            timeout: Some(Duration::from_millis(300)),
            ..QueryOptions::default()
        };
        s.query_with("/a/**", options, move |r: Reply| {
            sink.lock().unwrap().push(r.sample.key)
        })
        .await
    });
    let id = query_id(&router.recv().await);
    router.send(&reply(id, "/a/one", b"1")).await;

    assert_eq!(query.await.unwrap().unwrap(), 1);
    // Full consolidation holds replies until the end; the deadline releases
    // them.
    assert_eq!(got.lock().unwrap().as_slice(), ["/a/one"]);
}

#[tokio::test]
async fn test_late_reply_is_dropped() {
    let (session, mut router) = FakeRouter::open(test_config()).await;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let s = session.clone();
    let query = tokio::spawn(async move {
        s.query(
            "/a",
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_secs(5),
        )
        .await
    });
    let id = query_id(&router.recv().await);
    router.send(&Message::ReplyFinal { query_id: id }).await;
    assert_eq!(query.await.unwrap().unwrap(), 0);

    router.send(&reply(id, "/a", b"late")).await;
    router.send(&Message::ReplyFinal { query_id: id }).await;
    sync(&session, &mut router).await;

    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(session.is_open().await);
}

#[tokio::test]
async fn test_query_dropped_before_end_discards_later_replies() {
    let (session, mut router) = FakeRouter::open(test_config()).await;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let s = session.clone();
    let query = tokio::spawn(async move {
        let options = QueryOptions {
            consolidation: ConsolidationMode::None,
            timeout: Some(Duration::from_secs(60)),
            ..QueryOptions::default()
        };
        s.query_with("/a/**", options, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
    });
    let id = query_id(&router.recv().await);

    query.abort();
    assert!(query.await.unwrap_err().is_cancelled());

    router.send(&reply(id, "/a/1", b"1")).await;
    router.send(&reply(id, "/a/2", b"2")).await;
    router.send(&reply(id, "/a/3", b"3")).await;
    router.send(&Message::ReplyFinal { query_id: id }).await;
    sync(&session, &mut router).await;

    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(session.is_open().await);
}

// =========================================================================
// Queryables
// =========================================================================

#[tokio::test]
async fn test_queryable_answers_router_query() {
    let (session, mut router) = FakeRouter::open(test_config()).await;
    let _queryable = session
        .declare_queryable("/store/**", QueryableKind::Storage, |query| {
            vec![Sample::new("/store/a", format!("for {}", query.predicate))]
        })
        .await
        .unwrap();
    assert!(matches!(
        router.recv().await,
        Message::DeclareQueryable { kind: QueryableKind::Storage, .. }
    ));

    router
        .send(&Message::Query {
            id: 50,
            key: "/store/*".into(),
            predicate: "p".into(),
            target: QueryTarget::All,
            consolidation: ConsolidationMode::None,
        })
        .await;

    assert_eq!(router.recv().await, reply(50, "/store/a", b"for p"));
    assert_eq!(router.recv().await, Message::ReplyFinal { query_id: 50 });
}

// =========================================================================
// Teardown
// =========================================================================

#[tokio::test]
async fn test_link_lost_fails_both_pending_queries() {
    let (session, mut router) = FakeRouter::open(test_config()).await;
    let mut queries = Vec::new();
    for _ in 0..2 {
        let s = session.clone();
        queries.push(tokio::spawn(async move {
            s.query("/a/**", |_| {}, Duration::from_secs(30)).await
        }));
        router.recv().await;
    }

    router.hang_up().await;

    for query in queries {
        let err = query.await.unwrap().unwrap_err();
        assert_eq!(session_error(err), SessionError::LinkLost);
    }
    assert!(!session.is_open().await);
    let err = session.put("/a/b", "x").await.unwrap_err();
    assert_eq!(session_error(err), SessionError::SessionClosed);
}

#[tokio::test]
async fn test_router_close_is_treated_as_link_loss() {
    let (session, mut router) = FakeRouter::open(test_config()).await;
    let s = session.clone();
    let query = tokio::spawn(async move {
        s.query("/a", |_| {}, Duration::from_secs(30)).await
    });
    router.recv().await;

    router.send(&Message::Close { reason: "restart".into() }).await;

    assert_eq!(
        session_error(query.await.unwrap().unwrap_err()),
        SessionError::LinkLost
    );
    assert!(!session.is_open().await);
}

#[tokio::test]
async fn test_close_sends_close_and_rejects_further_calls() {
    let (session, mut router) = FakeRouter::open(test_config()).await;
    let s = session.clone();
    let query = tokio::spawn(async move {
        s.query("/a", |_| {}, Duration::from_secs(30)).await
    });
    router.recv().await;

    session.close().await.unwrap();

    assert!(matches!(router.recv().await, Message::Close { .. }));
    assert!(router.recv_eof().await);
    assert_eq!(
        session_error(query.await.unwrap().unwrap_err()),
        SessionError::SessionClosed
    );
    for err in [
        session.put("/a", "x").await.unwrap_err(),
        session.declare_resource("/a").await.unwrap_err(),
        session.subscribe("/a", |_| {}).await.err().unwrap(),
        session.close().await.unwrap_err(),
    ] {
        assert_eq!(session_error(err), SessionError::SessionClosed);
    }
}
