// src/core/backend/pool.rs

//! The backend pool (component D): one live session per endpoint, created
//! lazily and reconnected with capped exponential backoff, mirroring the
//! warden's own backoff shape in this codebase's topology reconnect loop
//! but tuned to the much shorter client-facing deadlines a dispatch path
//! can tolerate.

use super::session::{BackendSession, SessionState};
use crate::core::errors::ProxyError;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

const RECONNECT_MIN_BACKOFF: Duration = Duration::from_millis(50);
const RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(2);
const CONNECT_RETRY_CEILING: u32 = 5;

struct Slot {
    session: Mutex<Option<BackendSession>>,
    last_used: Mutex<Instant>,
}

/// Keyed by backend endpoint (`host:port`). `borrow` returns the current
/// live session, reconnecting lazily if none exists or the existing one has
/// gone `Broken`. Idle sessions are swept by `evict_idle`, called
/// periodically by the server's background maintenance task.
pub struct BackendPool {
    slots: DashMap<String, Arc<Slot>>,
    idle_ttl: Duration,
}

impl BackendPool {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            idle_ttl,
        }
    }

    /// Returns the live session for `endpoint`, connecting (with capped
    /// exponential backoff across retries) if none exists yet or the
    /// existing one is `Broken`. Fails with `BackendUnreachable` once the
    /// retry ceiling is exceeded.
    pub async fn borrow(&self, endpoint: &str) -> Result<BackendSession, ProxyError> {
        let slot = self
            .slots
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                Arc::new(Slot {
                    session: Mutex::new(None),
                    last_used: Mutex::new(Instant::now()),
                })
            })
            .clone();

        *slot.last_used.lock().await = Instant::now();

        let mut guard = slot.session.lock().await;
        if let Some(session) = guard.as_ref() {
            if session.state() != SessionState::Broken {
                return Ok(session.clone());
            }
        }

        let mut backoff = RECONNECT_MIN_BACKOFF;
        let mut last_err = None;
        for attempt in 0..CONNECT_RETRY_CEILING {
            match BackendSession::connect(endpoint.to_string()).await {
                Ok(session) => {
                    *guard = Some(session.clone());
                    return Ok(session);
                }
                Err(e) => {
                    warn!("backend {endpoint}: connect attempt {attempt} failed: {e}");
                    last_err = Some(e);
                    if attempt + 1 < CONNECT_RETRY_CEILING {
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(RECONNECT_MAX_BACKOFF);
                    }
                }
            }
        }
        *guard = None;
        Err(last_err.unwrap_or(ProxyError::BackendUnreachable))
    }

    /// Forces the next `borrow` for `endpoint` to reconnect, used when the
    /// topology watcher removes a group's master or the voter condemns it.
    pub async fn invalidate(&self, endpoint: &str) {
        if let Some(slot) = self.slots.get(endpoint) {
            if let Some(session) = slot.session.lock().await.as_ref() {
                session.mark_broken();
            }
        }
    }

    /// Drops the pooled slot for `endpoint` entirely.
    pub async fn close(&self, endpoint: &str) {
        if let Some((_, slot)) = self.slots.remove(endpoint)
            && let Some(session) = slot.session.lock().await.as_ref()
        {
            session.mark_broken();
        }
    }

    /// Removes pooled sessions untouched for longer than the configured
    /// idle TTL. Does not close their sockets forcibly -- dropping the
    /// `BackendSession` closes the outbound queue, which lets the writer
    /// task exit and the socket close naturally. Marks each evicted
    /// session `Broken` first so the live-session gauge reflects the
    /// eviction rather than staying stuck at its last live count.
    pub async fn evict_idle(&self) {
        let now = Instant::now();
        let mut stale = Vec::new();
        for entry in self.slots.iter() {
            if now.duration_since(*entry.value().last_used.lock().await) > self.idle_ttl {
                stale.push(entry.key().clone());
            }
        }
        for endpoint in stale {
            if let Some((_, slot)) = self.slots.remove(&endpoint)
                && let Some(session) = slot.session.lock().await.as_ref()
            {
                session.mark_broken();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
