// src/core/backend/mod.rs

//! Backend connectivity: a pipelined session per endpoint (C) and a pool
//! that keeps one session alive per endpoint with capped-backoff reconnect
//! (D).

pub mod pool;
pub mod session;

pub use pool::BackendPool;
pub use session::{BackendSession, SessionState};
