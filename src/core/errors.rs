// src/core/errors.rs

//! The crate-wide error type and its conversions.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by any component of the proxy.
///
/// Recoverable variants are turned into an in-band `-ERR ...` reply to the
/// client that triggered them; `Fatal` terminates the process so an external
/// supervisor can restart and re-register it.
#[derive(Debug, Clone, Error)]
pub enum ProxyError {
    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("incomplete frame")]
    IncompleteData,

    #[error("syntax error")]
    SyntaxError,

    #[error("routing error: {0}")]
    RoutingError(String),

    #[error("CROSSSLOT keys in request don't hash to the same slot")]
    CrossSlot,

    #[error("slot {0} is offline")]
    SlotOffline(u32),

    #[error("backend down")]
    BackendUnreachable,

    #[error("migration preflight failed: {0}")]
    MigrationError(String),

    #[error("topology reference is stale: {0}")]
    TopologyStale(String),

    #[error("request timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    #[error("config error: {0}")]
    Config(String),

    #[error("coordinator error: {0}")]
    Coordinator(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl PartialEq for ProxyError {
    fn eq(&self, other: &Self) -> bool {
        use ProxyError::*;
        match (self, other) {
            (ProtocolError(a), ProtocolError(b)) => a == b,
            (IncompleteData, IncompleteData) => true,
            (SyntaxError, SyntaxError) => true,
            (RoutingError(a), RoutingError(b)) => a == b,
            (CrossSlot, CrossSlot) => true,
            (SlotOffline(a), SlotOffline(b)) => a == b,
            (BackendUnreachable, BackendUnreachable) => true,
            (MigrationError(a), MigrationError(b)) => a == b,
            (TopologyStale(a), TopologyStale(b)) => a == b,
            (Timeout, Timeout) => true,
            (Io(a), Io(b)) => a.kind() == b.kind(),
            (Config(a), Config(b)) => a == b,
            (Coordinator(a), Coordinator(b)) => a == b,
            (Fatal(a), Fatal(b)) => a == b,
            _ => false,
        }
    }
}

impl From<io::Error> for ProxyError {
    fn from(e: io::Error) -> Self {
        ProxyError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(e: serde_json::Error) -> Self {
        ProxyError::Coordinator(e.to_string())
    }
}

impl From<std::str::Utf8Error> for ProxyError {
    fn from(e: std::str::Utf8Error) -> Self {
        ProxyError::ProtocolError(e.to_string())
    }
}
