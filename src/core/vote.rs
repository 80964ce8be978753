// src/core/vote.rs

//! The liveness voter (component H): participates in a coordinator-mediated
//! quorum before declaring a backend group down. Taken almost verbatim from
//! the `VoteConnError` algorithm the original Go proxy ran against its
//! ZooKeeper-backed coordinator, generalized here to the `Coordinator` trait.
//!
//! This component never touches the coordinator from the dispatch hot path:
//! the dispatcher only records a local error count here, and spawns the
//! (possibly slow) coordinator round-trip as a separate task.

use crate::core::coordinator::Coordinator;
use crate::core::errors::ProxyError;
use crate::core::metrics;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::info;

/// Tracks per-group backend error counts and drives the `proxy_err_conn`
/// quorum vote once a group crosses `ConnErrLimit`.
pub struct LivenessVoter {
    coordinator: Arc<dyn Coordinator>,
    proxy_id: String,
    conn_err_limit: u32,
    error_counts: DashMap<u32, AtomicU32>,
}

impl LivenessVoter {
    pub fn new(coordinator: Arc<dyn Coordinator>, proxy_id: String, conn_err_limit: u32) -> Self {
        Self {
            coordinator,
            proxy_id,
            conn_err_limit,
            error_counts: DashMap::new(),
        }
    }

    /// Records a backend failure for `group_id`. Returns `true` exactly once
    /// per ascent past `ConnErrLimit`, i.e. the caller should trigger a vote.
    pub fn record_error(&self, group_id: u32) -> bool {
        let counter = self
            .error_counts
            .entry(group_id)
            .or_insert_with(|| AtomicU32::new(0));
        let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
        count == self.conn_err_limit + 1
    }

    /// Resets the sliding error count for `group_id` after a successful dispatch.
    pub fn record_success(&self, group_id: u32) {
        if let Some(counter) = self.error_counts.get(&group_id) {
            counter.store(0, Ordering::SeqCst);
        }
    }

    /// Drives the vote protocol for `group_id` (§4.H):
    /// 1. Acquire `proxy_err_conn` without blocking; abort if already held.
    /// 2. Record this proxy's id under the group's error-proxy list.
    /// 3. If more than half of all registered proxies have reported the
    ///    group, reset the list and report `vote-passed = true`.
    /// 4. Always release the lock.
    pub async fn vote(&self, group_id: u32) -> Result<bool, ProxyError> {
        let Some(lock) = self.coordinator.try_lock_err_conn().await? else {
            metrics::VOTE_EVENTS.with_label_values(&["lock_contended"]).inc();
            return Ok(false);
        };
        let result = self.vote_locked(group_id).await;
        lock.release().await;
        result
    }

    async fn vote_locked(&self, group_id: u32) -> Result<bool, ProxyError> {
        self.coordinator
            .add_error_proxy(group_id, &self.proxy_id)
            .await?;
        let all = self.coordinator.list_proxies().await?;
        let errored = self.coordinator.list_error_proxies(group_id).await?;

        // Strictly more than half, matching the original's truncating
        // `errLen > listLen/2` integer-division quorum check.
        if errored.len() * 2 > all.len() {
            self.coordinator.reset_error_proxies(group_id).await?;
            info!(
                group_id,
                errored = errored.len(),
                total = all.len(),
                "liveness vote passed for group"
            );
            metrics::VOTE_EVENTS.with_label_values(&["passed"]).inc();
            Ok(true)
        } else {
            metrics::VOTE_EVENTS.with_label_values(&["pending"]).inc();
            Ok(false)
        }
    }
}
