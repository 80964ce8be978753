// src/connection/guard.rs

//! An RAII guard for per-connection resource cleanup, mirroring the pattern
//! this codebase uses to guarantee a client's accounting is undone exactly
//! once regardless of which path out of the handler's loop is taken.

use crate::core::metrics;
use std::net::SocketAddr;
use tracing::debug;

/// Decrements the connected-client gauge when the connection's handler
/// returns, however it returns -- normal close, protocol error, or panic
/// unwind through the task.
pub struct ConnectionGuard {
    addr: SocketAddr,
}

impl ConnectionGuard {
    pub fn new(addr: SocketAddr) -> Self {
        metrics::CLIENT_CONNECTIONS.inc();
        Self { addr }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        metrics::CLIENT_CONNECTIONS.dec();
        debug!("connection from {} cleaned up", self.addr);
    }
}
