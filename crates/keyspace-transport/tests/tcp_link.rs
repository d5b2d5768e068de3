//! Integration tests for length-prefixed links over real TCP sockets.

use keyspace_transport::{connect, Connection, Endpoint, Link, StreamLink};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[tokio::test]
async fn test_tcp_link_frames_survive_fragmented_writes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // The router writes one frame a byte at a time; the link must still
    // hand back the whole frame in one piece.
    let router = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.set_nodelay(true).unwrap();
        let mut wire = 5u32.to_be_bytes().to_vec();
        wire.extend_from_slice(b"frame");
        for byte in wire {
            stream.write_all(&[byte]).await.unwrap();
            stream.flush().await.unwrap();
        }
        stream
    });

    let link = connect(&Endpoint::Tcp(addr.to_string()))
        .await
        .expect("should connect");
    assert!(matches!(link, Link::Tcp(_)));

    let frame = link.recv().await.unwrap();
    assert_eq!(frame.as_deref(), Some(&b"frame"[..]));

    let _stream = router.await.unwrap();
}

#[tokio::test]
async fn test_tcp_link_writes_length_prefix() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let router = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 7];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    });

    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let link = StreamLink::new(stream);
    link.send(b"abc").await.unwrap();

    let wire = router.await.unwrap();
    assert_eq!(wire, [0, 0, 0, 3, b'a', b'b', b'c']);
}

#[tokio::test]
async fn test_tcp_link_back_to_back_frames_are_split_correctly() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let router = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let link = StreamLink::new(stream);
        let mut frames = Vec::new();
        while let Some(frame) = link.recv().await.unwrap() {
            frames.push(frame);
        }
        frames
    });

    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let link = StreamLink::new(stream);
    link.send(b"one").await.unwrap();
    link.send(b"").await.unwrap();
    link.send(b"three").await.unwrap();
    link.close().await.unwrap();

    let frames = router.await.unwrap();
    assert_eq!(frames, vec![b"one".to_vec(), Vec::new(), b"three".to_vec()]);
}
