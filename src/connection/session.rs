// src/connection/session.rs

//! Per-connection metadata tracked alongside the framed socket. The proxy
//! dispatches statelessly (no `SELECT`-style per-connection backend state
//! survives between commands), so this is deliberately thin compared to a
//! full Redis session.

use std::net::SocketAddr;
use std::time::Instant;

/// Metadata for one accepted client connection.
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub addr: SocketAddr,
    pub connected_at: Instant,
}

impl ClientSession {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connected_at: Instant::now(),
        }
    }
}
