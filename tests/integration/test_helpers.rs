// tests/integration/test_helpers.rs

//! Shared fixtures for the integration suite: a scriptable fake backend and
//! a minimal proxy harness wired from the same public components
//! `server::initialization` assembles, without requiring a real
//! coordinator or product configuration.

use futures::{SinkExt, StreamExt};
use shardproxy::connection::ConnectionHandler;
use shardproxy::core::backend::BackendPool;
use shardproxy::core::dispatch::{DispatchConfig, Dispatcher};
use shardproxy::core::protocol::{RespFrame, RespFrameCodec};
use shardproxy::core::routing::RoutingTable;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;

/// Spawns a fake backend that accepts one connection and answers every
/// decoded frame via `responder`. Runs until the connection closes.
pub async fn fake_backend<F>(responder: F) -> SocketAddr
where
    F: Fn(&RespFrame) -> RespFrame + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((sock, _)) = listener.accept().await else {
            return;
        };
        let mut framed = Framed::new(sock, RespFrameCodec::new(2));
        while let Some(Ok(frame)) = framed.next().await {
            let reply = responder(&frame);
            if framed.send(reply).await.is_err() {
                break;
            }
        }
    });
    addr
}

/// Returns the uppercased command verb of a decoded client frame, e.g. "GET".
pub fn command_verb(frame: &RespFrame) -> String {
    frame
        .as_command_parts()
        .and_then(|parts| parts.first().map(|b| String::from_utf8_lossy(b).to_uppercase()))
        .unwrap_or_default()
}

/// Returns the frame's Nth bulk-string argument as a `String`, if present.
pub fn command_arg(frame: &RespFrame, index: usize) -> Option<String> {
    frame
        .as_command_parts()
        .and_then(|parts| parts.get(index).map(|b| String::from_utf8_lossy(b).to_string()))
}

/// A minimal routed proxy: one routing table, one backend pool, one
/// dispatcher, listening for client connections on an ephemeral port. No
/// coordinator or topology watcher -- tests mutate the routing table
/// directly, the same way the topology watcher would.
pub struct ProxyHarness {
    pub addr: SocketAddr,
    pub routing: Arc<RoutingTable>,
    #[allow(dead_code)]
    pub pool: Arc<BackendPool>,
}

impl ProxyHarness {
    pub async fn start() -> Self {
        let routing = Arc::new(RoutingTable::new(1024));
        let pool = Arc::new(BackendPool::new(Duration::from_secs(60)));
        let dispatcher = Arc::new(Dispatcher::new(
            routing.clone(),
            pool.clone(),
            DispatchConfig::default(),
            None,
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        tokio::spawn(async move {
            loop {
                let Ok((socket, peer)) = listener.accept().await else {
                    return;
                };
                let dispatcher = dispatcher.clone();
                let shutdown_rx = shutdown_tx.subscribe();
                tokio::spawn(async move {
                    ConnectionHandler::new(socket, peer, dispatcher, shutdown_rx)
                        .run()
                        .await;
                });
            }
        });

        Self { addr, routing, pool }
    }
}
