// tests/integration/migration_test.rs

//! Scenario 4: a slot under `MIGRATE(from=A, to=B)` gets a per-key
//! `SLOTSMGRT-TAGSLOT` preflight issued against B naming A before the
//! client's actual request is forwarded to B.

use super::test_helpers::{ProxyHarness, command_arg, command_verb, fake_backend};
use bytes::Bytes;
use shardproxy::core::cluster::SlotStatus;
use shardproxy::core::cluster::slot::get_slot;
use shardproxy::core::protocol::RespFrame;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn read_reply(client: &mut TcpStream) -> Vec<u8> {
    let mut buf = vec![0u8; 4096];
    let n = client.read(&mut buf).await.unwrap();
    buf.truncate(n);
    buf
}

#[tokio::test]
async fn migrate_slot_preflights_against_destination_before_forwarding() {
    let commands_seen = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));

    // Source group A: never contacted by the proxy directly in this flow --
    // only named as an argument to the destination's preflight command.
    let source_addr = fake_backend(|_frame| RespFrame::error("should not be contacted")).await;

    let seen = commands_seen.clone();
    let dest_addr = fake_backend(move |frame| {
        let verb = command_verb(frame);
        seen.lock().unwrap().push(verb.clone());
        match verb.as_str() {
            "SLOTSMGRT-TAGSLOT" => RespFrame::SimpleString("OK".into()),
            "GET" => RespFrame::BulkString(Bytes::from_static(b"bar")),
            _ => RespFrame::error("unexpected command"),
        }
    })
    .await;

    let harness = ProxyHarness::start().await;
    let slot = get_slot(&Bytes::from_static(b"foo"), 1024);
    harness.routing.set_group(100, Some(source_addr.to_string()), vec![]);
    harness.routing.set_group(200, Some(dest_addr.to_string()), vec![]);
    harness.routing.set_slot(slot, 200, SlotStatus::Migrate, Some(100)).unwrap();

    let mut client = TcpStream::connect(harness.addr).await.unwrap();
    client.write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await.unwrap();
    assert_eq!(read_reply(&mut client).await, b"$3\r\nbar\r\n");

    let commands = commands_seen.lock().unwrap();
    assert_eq!(commands.as_slice(), ["SLOTSMGRT-TAGSLOT", "GET"]);
}

#[tokio::test]
async fn migrate_preflight_names_the_source_host_port_slot_and_key() {
    let source_addr = fake_backend(|_frame| RespFrame::error("not contacted")).await;
    let captured = Arc::new(std::sync::Mutex::new(Vec::<RespFrame>::new()));
    let captured_clone = captured.clone();
    let dest_addr = fake_backend(move |frame| {
        captured_clone.lock().unwrap().push(frame.clone());
        if command_verb(frame) == "SLOTSMGRT-TAGSLOT" {
            RespFrame::SimpleString("OK".into())
        } else {
            RespFrame::SimpleString("OK".into())
        }
    })
    .await;

    let harness = ProxyHarness::start().await;
    let slot = get_slot(&Bytes::from_static(b"foo"), 1024);
    harness.routing.set_group(100, Some(source_addr.to_string()), vec![]);
    harness.routing.set_group(200, Some(dest_addr.to_string()), vec![]);
    harness.routing.set_slot(slot, 200, SlotStatus::Migrate, Some(100)).unwrap();

    let mut client = TcpStream::connect(harness.addr).await.unwrap();
    client.write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await.unwrap();
    let _ = read_reply(&mut client).await;

    let frames = captured.lock().unwrap();
    let preflight = &frames[0];
    assert_eq!(command_verb(preflight), "SLOTSMGRT-TAGSLOT");
    let source_addr_str = source_addr.to_string();
    let (source_host, source_port) = source_addr_str.rsplit_once(':').unwrap();
    assert_eq!(command_arg(preflight, 1).as_deref(), Some(source_host));
    assert_eq!(command_arg(preflight, 2).as_deref(), Some(source_port));
    assert_eq!(command_arg(preflight, 4).as_deref(), Some(slot.to_string().as_str()));
    assert_eq!(command_arg(preflight, 5).as_deref(), Some("foo"));
}

/// If the destination's preflight command errors for a reason other than
/// "key did not exist at source", the migration error is surfaced in-band
/// and the client's actual request is never forwarded.
#[tokio::test]
async fn preflight_failure_is_surfaced_without_forwarding_the_request() {
    let source_addr = fake_backend(|_frame| RespFrame::error("not contacted")).await;
    let forwarded_count = Arc::new(AtomicUsize::new(0));
    let forwarded_count_clone = forwarded_count.clone();
    let dest_addr = fake_backend(move |frame| {
        if command_verb(frame) == "GET" {
            forwarded_count_clone.fetch_add(1, Ordering::SeqCst);
        }
        RespFrame::Error("ERR source unreachable".into())
    })
    .await;

    let harness = ProxyHarness::start().await;
    let slot = get_slot(&Bytes::from_static(b"foo"), 1024);
    harness.routing.set_group(100, Some(source_addr.to_string()), vec![]);
    harness.routing.set_group(200, Some(dest_addr.to_string()), vec![]);
    harness.routing.set_slot(slot, 200, SlotStatus::Migrate, Some(100)).unwrap();

    let mut client = TcpStream::connect(harness.addr).await.unwrap();
    client.write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await.unwrap();
    let reply = read_reply(&mut client).await;
    assert!(reply.starts_with(b"-"));
    assert_eq!(forwarded_count.load(Ordering::SeqCst), 0);
}
