// src/core/coordinator/mod.rs

//! The coordinator client abstraction.
//!
//! The coordinator itself -- a consensus-backed configuration store exposing
//! a hierarchical namespace with watches, ephemeral nodes and locks -- is an
//! external collaborator out of scope for this crate. This module defines
//! the capability set the topology watcher (G) and the liveness voter (H)
//! need from it, modeled on the ZooKeeper-backed `zkhelper.Conn` abstraction
//! the original proxy was built against, so that any concrete coordinator
//! client can be plugged in behind the `Coordinator` trait.

mod memory;

pub use memory::InMemoryCoordinator;

use crate::core::cluster::{Action, SlotStatus};
use crate::core::errors::ProxyError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Marshaled proxy registration record, written under
/// `proxy/<product>/proxies/<proxy_id>` as an ephemeral node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyInfo {
    pub id: String,
    pub addr: String,
    pub state: String,
}

/// A slot descriptor as read from `proxy/<product>/slots/slot_<i>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotDescriptor {
    pub index: u32,
    pub group_id: u32,
    pub status: SlotStatus,
    #[serde(default)]
    pub migrate_from: Option<u32>,
}

/// A group descriptor as read from `proxy/<product>/servers/group_<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDescriptor {
    pub id: u32,
    pub master: String,
    #[serde(default)]
    pub replicas: Vec<String>,
}

/// Held while a proxy drives a liveness vote; releases the `proxy_err_conn`
/// lock on drop so a panicking or cancelled voter can never wedge it.
#[async_trait]
pub trait LockGuard: Send {
    async fn release(self: Box<Self>);
}

/// The capability set the topology watcher and liveness voter require from
/// the coordinator. Not used anywhere on the client request hot path.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Creates the ephemeral proxy registration node. Re-entrant: re-registering
    /// under the same id replaces the previous record.
    async fn register_proxy(&self, info: &ProxyInfo) -> Result<(), ProxyError>;

    /// Removes the ephemeral proxy registration node (clean shutdown path).
    async fn deregister_proxy(&self, proxy_id: &str) -> Result<(), ProxyError>;

    /// Lists the ids of every proxy currently registered for this product.
    async fn list_proxies(&self) -> Result<Vec<String>, ProxyError>;

    /// Reads the current full slot table from the coordinator (startup only).
    async fn read_slots(&self, slot_count: u32) -> Result<Vec<SlotDescriptor>, ProxyError>;

    /// Reads a single group descriptor.
    async fn read_group(&self, group_id: u32) -> Result<Option<GroupDescriptor>, ProxyError>;

    /// Lists the sequence numbers of all actions currently in the queue.
    async fn list_action_seqs(&self) -> Result<Vec<u64>, ProxyError>;

    /// Fetches and deserializes the body of one action.
    async fn get_action(&self, seq: u64) -> Result<Action, ProxyError>;

    /// Creates the response child node `actions/action_<seq>/<proxy_id>` to ACK.
    async fn ack_action(&self, seq: u64, proxy_id: &str) -> Result<(), ProxyError>;

    /// Returns a channel that's notified whenever the action queue's children
    /// change (a new action was posted). The watcher re-subscribes after
    /// every fire, matching ZooKeeper one-shot watch semantics.
    async fn watch_actions(&self) -> Result<watch::Receiver<u64>, ProxyError>;

    /// Fires when the coordinator session expires; this is always fatal.
    async fn watch_session_expiry(&self) -> watch::Receiver<bool>;

    /// Acquires the `proxy_err_conn` lock without blocking; `None` if already held.
    async fn try_lock_err_conn(&self) -> Result<Option<Box<dyn LockGuard>>, ProxyError>;

    /// Appends this proxy's id to the error-proxy list for `group_id`.
    async fn add_error_proxy(&self, group_id: u32, proxy_id: &str) -> Result<(), ProxyError>;

    /// Lists the proxy ids that have reported `group_id` as erroring.
    async fn list_error_proxies(&self, group_id: u32) -> Result<Vec<String>, ProxyError>;

    /// Clears the error-proxy list for `group_id` (post-quorum reset).
    async fn reset_error_proxies(&self, group_id: u32) -> Result<(), ProxyError>;
}
