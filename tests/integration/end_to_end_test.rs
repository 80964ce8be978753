// tests/integration/end_to_end_test.rs

//! The literal end-to-end scenarios from the specification's testable
//! properties section: a single online slot, cross-slot rejection, and
//! hash-tag coalescing.

use super::test_helpers::{ProxyHarness, command_arg, command_verb, fake_backend};
use bytes::Bytes;
use shardproxy::core::cluster::SlotStatus;
use shardproxy::core::cluster::slot::get_slot;
use shardproxy::core::protocol::RespFrame;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn read_reply(client: &mut TcpStream) -> Vec<u8> {
    let mut buf = vec![0u8; 4096];
    let n = client.read(&mut buf).await.unwrap();
    buf.truncate(n);
    buf
}

/// Scenario 1: `SET foo bar` on an online slot is forwarded unchanged and
/// the backend's `+OK` is returned verbatim.
#[tokio::test]
async fn single_slot_online_forwards_and_returns_reply() {
    let backend_addr = fake_backend(|frame| {
        assert_eq!(command_verb(frame), "SET");
        RespFrame::SimpleString("OK".into())
    })
    .await;

    let harness = ProxyHarness::start().await;
    let slot = get_slot(&Bytes::from_static(b"foo"), 1024);
    harness.routing.set_slot(slot, 1, SlotStatus::Online, None).unwrap();
    harness.routing.set_group(1, Some(backend_addr.to_string()), vec![]);

    let mut client = TcpStream::connect(harness.addr).await.unwrap();
    client
        .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
        .await
        .unwrap();
    assert_eq!(read_reply(&mut client).await, b"+OK\r\n");
}

/// Scenario 2: an `MGET` over two keys that hash to different slots is
/// rejected with `CROSSSLOT` and the connection stays open for further use.
#[tokio::test]
async fn cross_slot_mget_is_rejected_and_connection_stays_open() {
    let harness = ProxyHarness::start().await;
    let mut client = TcpStream::connect(harness.addr).await.unwrap();

    client
        .write_all(b"*3\r\n$4\r\nMGET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
        .await
        .unwrap();
    let reply = read_reply(&mut client).await;
    assert_eq!(
        reply,
        b"-ERR CROSSSLOT keys in request don't hash to the same slot\r\n"
    );

    // The connection is still usable: a broadcast command answers normally.
    client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    assert_eq!(read_reply(&mut client).await, b"+PONG\r\n");
}

/// Scenario 3: `{user:7}:name` and `{user:7}:age` must route to the same
/// slot -- the backend records which key each request carried.
#[tokio::test]
async fn hash_tag_coalesces_related_keys_onto_the_same_slot() {
    let seen_keys = std::sync::Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
    let seen_keys_clone = seen_keys.clone();
    let backend_addr = fake_backend(move |frame| {
        if let Some(key) = command_arg(frame, 1) {
            seen_keys_clone.lock().unwrap().push(key);
        }
        RespFrame::SimpleString("OK".into())
    })
    .await;

    let harness = ProxyHarness::start().await;
    let slot = get_slot(&Bytes::from_static(b"user:7"), 1024);
    harness.routing.set_slot(slot, 1, SlotStatus::Online, None).unwrap();
    harness.routing.set_group(1, Some(backend_addr.to_string()), vec![]);

    let mut client = TcpStream::connect(harness.addr).await.unwrap();
    client
        .write_all(b"*3\r\n$3\r\nSET\r\n$13\r\n{user:7}:name\r\n$5\r\nalice\r\n")
        .await
        .unwrap();
    assert_eq!(read_reply(&mut client).await, b"+OK\r\n");
    client
        .write_all(b"*3\r\n$3\r\nSET\r\n$12\r\n{user:7}:age\r\n$2\r\n30\r\n")
        .await
        .unwrap();
    assert_eq!(read_reply(&mut client).await, b"+OK\r\n");

    let keys = seen_keys.lock().unwrap();
    assert_eq!(keys.as_slice(), ["{user:7}:name", "{user:7}:age"]);
}

/// A slot with no group assigned (the default, freshly-constructed state)
/// replies `slot offline` rather than silently dropping the request.
#[tokio::test]
async fn offline_slot_replies_in_band_rather_than_dropping_the_request() {
    let harness = ProxyHarness::start().await;
    let mut client = TcpStream::connect(harness.addr).await.unwrap();
    client
        .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n")
        .await
        .unwrap();
    let reply = read_reply(&mut client).await;
    assert!(reply.starts_with(b"-ERR"));
    assert!(String::from_utf8_lossy(&reply).contains("offline"));
}
