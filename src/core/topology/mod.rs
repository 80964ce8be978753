// src/core/topology/mod.rs

//! The topology watcher (component G): consumes the coordinator's action
//! queue and applies each action to the routing table (E) and backend pool
//! (D) strictly in increasing sequence order, ACKing only after the local
//! state reflects it. Scoped to its own coordinator connection; never on
//! the dispatch hot path.

use crate::core::backend::BackendPool;
use crate::core::cluster::action::{Action, ActionKind};
use crate::core::cluster::slot::DEFAULT_SLOT_COUNT;
use crate::core::coordinator::Coordinator;
use crate::core::errors::ProxyError;
use crate::core::metrics;
use crate::core::protocol::RespFrame;
use crate::core::routing::RoutingTable;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};

/// The `MasterOp.Rdb` / `MasterOp.Aof` promotion hooks (§1.2, supplemented
/// from `original_source/pkg/utils/redis_utils.go`).
#[derive(Debug, Clone, Copy, Default)]
pub struct MasterOpConfig {
    pub rdb: bool,
    pub aof: bool,
}

/// Applies coordinator actions to the routing table and notifies the
/// backend pool of stale sessions. One instance per proxy process; driven
/// by a single long-lived task (`run`).
pub struct TopologyWatcher {
    coordinator: Arc<dyn Coordinator>,
    routing: Arc<RoutingTable>,
    pool: Arc<BackendPool>,
    proxy_id: String,
    master_op: MasterOpConfig,
    last_applied_seq: Mutex<u64>,
}

impl TopologyWatcher {
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        routing: Arc<RoutingTable>,
        pool: Arc<BackendPool>,
        proxy_id: String,
        master_op: MasterOpConfig,
    ) -> Self {
        Self {
            coordinator,
            routing,
            pool,
            proxy_id,
            master_op,
            last_applied_seq: Mutex::new(0),
        }
    }

    /// Loads the current slot and group state from the coordinator into the
    /// routing table. Called once at startup, before the client listener
    /// accepts its first connection.
    pub async fn bootstrap(&self) -> Result<(), ProxyError> {
        let slot_count = self.routing.slot_count();
        let slots = self.coordinator.read_slots(slot_count).await?;
        for descriptor in &slots {
            if let Err(e) = self.routing.set_slot(
                descriptor.index,
                descriptor.group_id,
                descriptor.status,
                descriptor.migrate_from,
            ) {
                warn!("bootstrap: skipping invalid slot descriptor {}: {e}", descriptor.index);
                continue;
            }
            if self.routing.group(descriptor.group_id).is_none()
                && let Some(group) = self.coordinator.read_group(descriptor.group_id).await?
            {
                self.routing
                    .set_group(group.id, Some(group.master), group.replicas);
            }
        }
        info!(slots = slots.len(), "topology watcher: bootstrapped routing table");
        Ok(())
    }

    /// The watcher's long-lived task: drains any actions already queued,
    /// then waits for the coordinator's children-changed notification and
    /// repeats. Returns only on fatal error or on an explicit shutdown
    /// signal becoming true; session expiry (observed by the caller via
    /// `Coordinator::watch_session_expiry`) is handled one level up, since
    /// it is fatal to the whole process, not just this task.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<(), ProxyError> {
        let mut action_rx = self.coordinator.watch_actions().await?;
        loop {
            self.drain_pending_actions().await?;
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("topology watcher: shutting down");
                        return Ok(());
                    }
                }
                changed = action_rx.changed() => {
                    if changed.is_err() {
                        return Err(ProxyError::Fatal("action watch channel closed".into()));
                    }
                }
            }
        }
    }

    /// Applies every action with a sequence number greater than the last one
    /// applied, strictly in increasing order, ACKing each as it's applied.
    async fn drain_pending_actions(&self) -> Result<(), ProxyError> {
        let mut seqs = self.coordinator.list_action_seqs().await?;
        seqs.sort_unstable();
        let mut last_applied = self.last_applied_seq.lock().await;
        for seq in seqs {
            if seq <= *last_applied {
                continue;
            }
            match self.coordinator.get_action(seq).await {
                Ok(action) => self.apply(&action).await,
                Err(e) => {
                    // Unrecognized action kinds fail to deserialize at the
                    // coordinator boundary; the controller is authoritative,
                    // so this is logged and still ACK'd rather than retried.
                    error!("topology watcher: action {seq} is stale or malformed: {e}");
                }
            }
            self.coordinator.ack_action(seq, &self.proxy_id).await?;
            *last_applied = seq;
            metrics::TOPOLOGY_ACTIONS_APPLIED.inc();
        }
        Ok(())
    }

    async fn apply(&self, action: &Action) {
        match &action.kind {
            ActionKind::SlotChanged(p) => {
                if let Err(e) = self
                    .routing
                    .set_slot(p.slot, p.group_id, p.status, p.migrate_from)
                {
                    warn!("topology: action {} rejected: {e}", action.seq);
                }
            }
            ActionKind::GroupChanged(p) => {
                let previous = self.routing.set_group(
                    p.group_id,
                    Some(p.master.clone()),
                    p.replicas.clone(),
                );
                self.close_stale_master(previous, Some(&p.master)).await;
            }
            ActionKind::Promote(p) => {
                let replicas = self
                    .routing
                    .group(p.group_id)
                    .map(|g| g.replicas)
                    .unwrap_or_default();
                let previous =
                    self.routing
                        .set_group(p.group_id, Some(p.new_master.clone()), replicas);
                self.close_stale_master(previous, Some(&p.new_master)).await;
                self.run_promotion_hooks(&p.new_master).await;
            }
            ActionKind::PrepareMigrate(p) => {
                if let Err(e) = self.routing.set_slot(
                    p.slot,
                    p.to_group,
                    crate::core::cluster::SlotStatus::Migrate,
                    Some(p.from_group),
                ) {
                    warn!("topology: prepare-migrate action {} rejected: {e}", action.seq);
                }
            }
            ActionKind::CommitMigrate(p) => {
                if let Err(e) = self.routing.set_slot(
                    p.slot,
                    p.to_group,
                    crate::core::cluster::SlotStatus::Online,
                    None,
                ) {
                    warn!("topology: commit-migrate action {} rejected: {e}", action.seq);
                }
            }
            ActionKind::Shutdown => {
                info!("topology: received SHUTDOWN action {}", action.seq);
            }
        }
    }

    /// Closes the pool's session to a group's old master once it's replaced
    /// by a new one, so in-flight dispatches don't keep routing to it.
    async fn close_stale_master(&self, previous: Option<String>, new: Option<&str>) {
        if let Some(previous) = previous
            && Some(previous.as_str()) != new
        {
            self.pool.invalidate(&previous).await;
            self.pool.close(&previous).await;
        }
    }

    /// `MasterOp.Rdb` / `MasterOp.Aof`: on promotion, best-effort instruct
    /// the new master to disable RDB snapshots and/or enable AOF. Failures
    /// are logged, not propagated -- the slot table mutation is the action's
    /// primary effect and must not be blocked by this.
    async fn run_promotion_hooks(&self, new_master: &str) {
        if self.master_op.rdb {
            self.send_config_set(new_master, "save", "").await;
        }
        if self.master_op.aof {
            self.send_config_set(new_master, "appendonly", "yes").await;
        }
    }

    async fn send_config_set(&self, endpoint: &str, param: &str, value: &str) {
        let cmd = RespFrame::command(&[b"CONFIG", b"SET", param.as_bytes(), value.as_bytes()]);
        let result = match self.pool.borrow(endpoint).await {
            Ok(session) => {
                session
                    .send_with_timeout(cmd, Duration::from_secs(1))
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("promotion hook: CONFIG SET {param} on {endpoint} failed: {e}");
        }
    }
}

/// Number of routing slots to use when a proxy's configuration doesn't
/// override it.
pub const DEFAULT_TOPOLOGY_SLOT_COUNT: u32 = DEFAULT_SLOT_COUNT;
