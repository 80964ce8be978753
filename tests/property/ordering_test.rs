// tests/property/ordering_test.rs

//! Per-client ordering property (spec §8): however the backends serving a
//! pipelined client's requests are interleaved in real time, replies must
//! reassemble in the order the requests arrived.

use crate::test_helpers::ProxyHarness;
use bytes::Bytes;
use proptest::prelude::*;
use shardproxy::core::cluster::SlotStatus;
use shardproxy::core::cluster::slot::get_slot;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Spawns a scripted backend on its own port that replies `tag\r\n` as a
/// RESP simple string after `delay_ms`, to every request it receives.
async fn delayed_backend(tag: &'static str, delay_ms: u64) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let reply = format!("+{tag}\r\n").into_bytes();
    tokio::spawn(async move {
        let Ok((mut sock, _)) = listener.accept().await else {
            return;
        };
        let mut buf = vec![0u8; 1024];
        loop {
            match sock.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    if sock.write_all(&reply).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    addr
}

/// Finds four distinct keys whose slots land in four distinct, fixed
/// "lanes" (0..4 via `slot % 4`) so each request below can be pinned to a
/// specific backend regardless of the hash function's exact output.
fn key_for_lane(lane: u32) -> Bytes {
    let mut i = 0u64;
    loop {
        let candidate = Bytes::from(format!("lanekey-{i}"));
        if get_slot(&candidate, 1024) % 4 == lane {
            return candidate;
        }
        i += 1;
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 12,
        ..ProptestConfig::default()
    })]

    /// Four lanes, each backed by a backend with its own randomized delay
    /// (0-60ms): whatever order the backends actually reply in, the client
    /// must see its four replies back in the order it sent the requests.
    #[test]
    fn replies_reassemble_in_arrival_order_under_random_backend_delays(
        delays in prop::collection::vec(0u64..60, 4),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let harness = ProxyHarness::start().await;
            let tags = ["LANE0", "LANE1", "LANE2", "LANE3"];
            for (lane, (&tag, &delay)) in tags.iter().zip(delays.iter()).enumerate() {
                let addr = delayed_backend(tag, delay).await;
                let key = key_for_lane(lane as u32);
                let slot = get_slot(&key, 1024);
                harness.routing.set_slot(slot, lane as u32, SlotStatus::Online, None).unwrap();
                harness.routing.set_group(lane as u32, Some(addr.to_string()), vec![]);
            }

            let mut client = TcpStream::connect(harness.addr).await.unwrap();
            for lane in 0..4u32 {
                let key = key_for_lane(lane);
                let cmd = format!("*2\r\n$3\r\nGET\r\n${}\r\n{}\r\n", key.len(), String::from_utf8_lossy(&key));
                client.write_all(cmd.as_bytes()).await.unwrap();
            }

            let expected: String = tags.iter().map(|t| format!("+{t}\r\n")).collect();
            let mut collected = Vec::new();
            let mut buf = vec![0u8; 4096];
            while collected.len() < expected.len() {
                let n = client.read(&mut buf).await.unwrap();
                collected.extend_from_slice(&buf[..n]);
            }
            assert_eq!(String::from_utf8_lossy(&collected), expected);
        });
    }
}
