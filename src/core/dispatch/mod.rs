// src/core/dispatch/mod.rs

//! The dispatcher (component F): the per-request routing algorithm that
//! turns one parsed client frame into a forwarded backend request, handling
//! cross-slot rejection, migration preflight, and backend-error accounting.
//! Spawned per frame from each client connection's reader task as soon as
//! the frame is decoded; the connection's writer task is what enforces
//! per-client reply ordering, by awaiting dispatches strictly in the order
//! their requests arrived (see `connection::handler`).

use crate::core::backend::BackendPool;
use crate::core::cluster::SlotStatus;
use crate::core::cluster::slot::get_slot;
use crate::core::errors::ProxyError;
use crate::core::metrics;
use crate::core::protocol::{Classification, RespFrame, classify, is_write};
use crate::core::routing::RoutingTable;
use crate::core::vote::LivenessVoter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Per-proxy tunables the dispatcher needs that don't belong to the routing
/// table or the pool themselves.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub backend_request_timeout: Duration,
    pub migrate_preflight_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            backend_request_timeout: Duration::from_secs(3),
            migrate_preflight_timeout: Duration::from_millis(500),
        }
    }
}

/// Ties together the slot table (E) and backend pool (D) so a dispatched
/// request resolves, preflights a migration if needed, and is forwarded.
pub struct Dispatcher {
    routing: Arc<RoutingTable>,
    pool: Arc<BackendPool>,
    config: DispatchConfig,
    voter: Option<Arc<LivenessVoter>>,
}

impl Dispatcher {
    pub fn new(
        routing: Arc<RoutingTable>,
        pool: Arc<BackendPool>,
        config: DispatchConfig,
        voter: Option<Arc<LivenessVoter>>,
    ) -> Self {
        Self {
            routing,
            pool,
            config,
            voter,
        }
    }

    /// Runs the full per-request algorithm against `frame` and returns the
    /// reply to send back to the client verbatim. Never returns `Err` for a
    /// condition the client should see as a protocol-level reply -- those
    /// are encoded as `RespFrame::Error` values inside `Ok`. `Err` is
    /// reserved for conditions the caller (the client connection handler)
    /// must act on itself, such as a fatal protocol error on the client
    /// socket, which this function never produces.
    pub async fn dispatch(&self, frame: RespFrame) -> RespFrame {
        let Some(parts) = frame.as_command_parts() else {
            return RespFrame::error("invalid request: expected an array of bulk strings");
        };
        let verb_upper = parts[0].to_ascii_uppercase();
        let classification = classify(&verb_upper);

        let key = match classification {
            Classification::Unsupported => {
                metrics::COMMANDS_REJECTED.with_label_values(&["unsupported"]).inc();
                return RespFrame::error(format!(
                    "unknown command or command not supported by this proxy: '{}'",
                    String::from_utf8_lossy(parts[0])
                ));
            }
            Classification::Broadcast => {
                // Broadcast commands (PING, HELLO, ...) have no routing key;
                // forward to an arbitrary online slot's backend is wrong in
                // general, so the dispatcher answers PING/ECHO locally and
                // rejects the rest: there is no single backend that "is" the
                // cluster from the client's point of view.
                return handle_broadcast(&verb_upper, &parts);
            }
            Classification::KeySingle => {
                if parts.len() < 2 {
                    return RespFrame::error("wrong number of arguments");
                }
                bytes::Bytes::clone(parts[1])
            }
            Classification::KeyMulti => {
                if parts.len() < 2 {
                    return RespFrame::error("wrong number of arguments");
                }
                let slot_count = self.routing.slot_count();
                let first_slot = get_slot(parts[1], slot_count);
                for k in &parts[2..] {
                    if get_slot(k, slot_count) != first_slot {
                        metrics::COMMANDS_REJECTED.with_label_values(&["crossslot"]).inc();
                        return RespFrame::error(ProxyError::CrossSlot.to_string());
                    }
                }
                bytes::Bytes::clone(parts[1])
            }
        };

        let slot_index = get_slot(&key, self.routing.slot_count());
        let Some(slot) = self.routing.slot(slot_index) else {
            return RespFrame::error(format!("slot {slot_index} out of range"));
        };

        if slot.status == SlotStatus::Offline {
            metrics::COMMANDS_REJECTED.with_label_values(&["slot_offline"]).inc();
            return RespFrame::error(ProxyError::SlotOffline(slot_index).to_string());
        }

        // PRE_MIGRATE: the controller has flagged this slot for an upcoming
        // migration but the destination isn't wired up yet (no `migrate_from`
        // to preflight against). Reads are still served from the current
        // owner; writes are rejected so nothing lands on the source that
        // would need replaying once the migration actually starts.
        if slot.status == SlotStatus::PreMigrate && is_write(&verb_upper) {
            metrics::COMMANDS_REJECTED.with_label_values(&["read_only"]).inc();
            return RespFrame::error(ProxyError::RoutingError(format!(
                "slot {slot_index} is read-only pending migration"
            )).to_string());
        }

        let Some(target_endpoint) = self.routing.master_endpoint(slot.group_id) else {
            return RespFrame::error(format!("group {} has no master endpoint", slot.group_id));
        };

        if slot.status == SlotStatus::Migrate {
            if let Some(from_group) = slot.migrate_from
                && let Some(from_endpoint) = self.routing.master_endpoint(from_group)
            {
                if let Err(e) = self
                    .preflight_migrate(&target_endpoint, &from_endpoint, slot_index, &key)
                    .await
                {
                    return RespFrame::error(e.to_string());
                }
            }
        }

        match self.forward(&target_endpoint, frame.clone()).await {
            Ok(reply) => {
                if slot.status == SlotStatus::Migrate
                    && reply.error_prefix() == Some("MOVED")
                {
                    // Retry exactly once against the same target before
                    // surfacing the backend's error verbatim.
                    return match self.forward(&target_endpoint, frame).await {
                        Ok(retried) => retried,
                        Err(e) => {
                            self.on_backend_error(slot.group_id, &target_endpoint, &e);
                            RespFrame::error(e.to_string())
                        }
                    };
                }
                if let Some(voter) = &self.voter {
                    voter.record_success(slot.group_id);
                }
                metrics::COMMANDS_DISPATCHED.inc();
                reply
            }
            Err(e) => {
                self.on_backend_error(slot.group_id, &target_endpoint, &e);
                RespFrame::error(e.to_string())
            }
        }
    }

    /// Accounts a dispatch failure against the target backend and, if the
    /// group's sliding error count just crossed `ConnErrLimit`, kicks off a
    /// liveness vote on a separate task -- the coordinator round-trip must
    /// never block this request's reply.
    fn on_backend_error(&self, group_id: u32, endpoint: &str, err: &ProxyError) {
        metrics::BACKEND_ERRORS.with_label_values(&[endpoint]).inc();
        let Some(voter) = self.voter.clone() else {
            return;
        };
        if matches!(err, ProxyError::BackendUnreachable | ProxyError::Timeout)
            && voter.record_error(group_id)
        {
            tokio::spawn(async move {
                match voter.vote(group_id).await {
                    Ok(true) => info!(group_id, "liveness vote passed; controller should fail over"),
                    Ok(false) => {}
                    Err(e) => warn!(group_id, "liveness vote failed: {e}"),
                }
            });
        }
    }

    /// Issues a per-key migrate command to the destination naming the
    /// source, so a migrating slot serves read-your-writes without the
    /// client knowing a migration is in flight.
    async fn preflight_migrate(
        &self,
        destination: &str,
        source: &str,
        slot: u32,
        key: &bytes::Bytes,
    ) -> Result<(), ProxyError> {
        let (host, port) = source
            .rsplit_once(':')
            .ok_or_else(|| ProxyError::MigrationError(format!("malformed source endpoint {source}")))?;
        let timeout_ms = self.config.migrate_preflight_timeout.as_millis().to_string();
        let slot_str = slot.to_string();
        let migrate_cmd = RespFrame::command(&[
            b"SLOTSMGRT-TAGSLOT",
            host.as_bytes(),
            port.as_bytes(),
            timeout_ms.as_bytes(),
            slot_str.as_bytes(),
            key,
        ]);

        let session = self.pool.borrow(destination).await?;
        let reply = session
            .send_with_timeout(migrate_cmd, self.config.migrate_preflight_timeout)
            .await?;

        match reply {
            RespFrame::Error(ref msg) if !msg.contains("key did not exist") => {
                Err(ProxyError::MigrationError(msg.clone()))
            }
            _ => Ok(()),
        }
    }

    async fn forward(&self, endpoint: &str, frame: RespFrame) -> Result<RespFrame, ProxyError> {
        let session = self.pool.borrow(endpoint).await.inspect_err(|_| {
            warn!("dispatch: backend {endpoint} unreachable");
        })?;
        session
            .send_with_timeout(frame, self.config.backend_request_timeout)
            .await
    }
}

fn handle_broadcast(verb_upper: &[u8], parts: &[&bytes::Bytes]) -> RespFrame {
    match verb_upper {
        b"PING" => {
            if parts.len() > 1 {
                RespFrame::BulkString(bytes::Bytes::clone(parts[1]))
            } else {
                RespFrame::SimpleString("PONG".into())
            }
        }
        b"ECHO" if parts.len() == 2 => RespFrame::BulkString(bytes::Bytes::clone(parts[1])),
        b"SELECT" | b"HELLO" | b"AUTH" | b"COMMAND" | b"CLIENT" | b"ASKING" => {
            RespFrame::SimpleString("OK".into())
        }
        _ => RespFrame::error("unsupported broadcast command"),
    }
}
