// src/core/coordinator/memory.rs

//! An in-process `Coordinator` used by tests and as a default for running
//! a single proxy without a real consensus store wired in. It is not a
//! substitute for a production coordinator: there is no persistence and no
//! cross-process visibility, but it implements the exact capability
//! contract the topology watcher and voter rely on.

use super::{Coordinator, GroupDescriptor, LockGuard, ProxyInfo, SlotDescriptor};
use crate::core::cluster::{Action, SlotStatus};
use crate::core::errors::ProxyError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, watch};

struct ErrConnLock {
    held: Arc<AtomicBool>,
}

#[async_trait]
impl LockGuard for ErrConnLock {
    async fn release(self: Box<Self>) {
        self.held.store(false, Ordering::SeqCst);
    }
}

pub struct InMemoryCoordinator {
    proxies: DashMap<String, ProxyInfo>,
    groups: DashMap<u32, GroupDescriptor>,
    slots: SyncMutex<Vec<SlotDescriptor>>,
    actions: Mutex<Vec<Action>>,
    acks: DashMap<u64, Vec<String>>,
    action_notify: watch::Sender<u64>,
    action_watch_rx: watch::Receiver<u64>,
    session_expiry: watch::Sender<bool>,
    session_expiry_rx: watch::Receiver<bool>,
    err_conn_lock_held: Arc<AtomicBool>,
    error_proxies: DashMap<u32, Vec<String>>,
}

impl Default for InMemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCoordinator {
    pub fn new() -> Self {
        let (action_notify, action_watch_rx) = watch::channel(0u64);
        let (session_expiry, session_expiry_rx) = watch::channel(false);
        Self {
            proxies: DashMap::new(),
            groups: DashMap::new(),
            slots: SyncMutex::new(Vec::new()),
            actions: Mutex::new(Vec::new()),
            acks: DashMap::new(),
            action_notify,
            action_watch_rx,
            session_expiry,
            session_expiry_rx,
            err_conn_lock_held: Arc::new(AtomicBool::new(false)),
            error_proxies: DashMap::new(),
        }
    }

    /// Seeds the initial slot table, as if read from the coordinator at
    /// proxy startup. Test/bootstrap helper, not part of the trait contract.
    pub fn seed_slots(&self, slots: Vec<SlotDescriptor>) {
        *self.slots.lock() = slots;
    }

    pub fn seed_group(&self, group: GroupDescriptor) {
        self.groups.insert(group.id, group);
    }

    /// Publishes a new action, bumping the watch channel so the watcher wakes.
    pub async fn publish_action(&self, action: Action) {
        let seq = action.seq;
        self.actions.lock().await.push(action);
        let _ = self.action_notify.send(seq);
    }

    pub fn trigger_session_expiry(&self) {
        let _ = self.session_expiry.send(true);
    }
}

#[async_trait]
impl Coordinator for InMemoryCoordinator {
    async fn register_proxy(&self, info: &ProxyInfo) -> Result<(), ProxyError> {
        self.proxies.insert(info.id.clone(), info.clone());
        Ok(())
    }

    async fn deregister_proxy(&self, proxy_id: &str) -> Result<(), ProxyError> {
        self.proxies.remove(proxy_id);
        Ok(())
    }

    async fn list_proxies(&self) -> Result<Vec<String>, ProxyError> {
        Ok(self.proxies.iter().map(|e| e.key().clone()).collect())
    }

    async fn read_slots(&self, slot_count: u32) -> Result<Vec<SlotDescriptor>, ProxyError> {
        let guard = self.slots.lock();
        if guard.is_empty() {
            return Ok((0..slot_count)
                .map(|i| SlotDescriptor {
                    index: i,
                    group_id: 0,
                    status: SlotStatus::Offline,
                    migrate_from: None,
                })
                .collect());
        }
        Ok(guard.clone())
    }

    async fn read_group(&self, group_id: u32) -> Result<Option<GroupDescriptor>, ProxyError> {
        Ok(self.groups.get(&group_id).map(|e| e.clone()))
    }

    async fn list_action_seqs(&self) -> Result<Vec<u64>, ProxyError> {
        Ok(self.actions.lock().await.iter().map(|a| a.seq).collect())
    }

    async fn get_action(&self, seq: u64) -> Result<Action, ProxyError> {
        self.actions
            .lock()
            .await
            .iter()
            .find(|a| a.seq == seq)
            .cloned()
            .ok_or_else(|| ProxyError::TopologyStale(format!("unknown action seq {seq}")))
    }

    async fn ack_action(&self, seq: u64, proxy_id: &str) -> Result<(), ProxyError> {
        self.acks.entry(seq).or_default().push(proxy_id.to_string());
        Ok(())
    }

    async fn watch_actions(&self) -> Result<watch::Receiver<u64>, ProxyError> {
        Ok(self.action_watch_rx.clone())
    }

    async fn watch_session_expiry(&self) -> watch::Receiver<bool> {
        self.session_expiry_rx.clone()
    }

    async fn try_lock_err_conn(&self) -> Result<Option<Box<dyn LockGuard>>, ProxyError> {
        if self
            .err_conn_lock_held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Ok(Some(Box::new(ErrConnLock {
                held: self.err_conn_lock_held.clone(),
            })))
        } else {
            Ok(None)
        }
    }

    async fn add_error_proxy(&self, group_id: u32, proxy_id: &str) -> Result<(), ProxyError> {
        let mut entry = self.error_proxies.entry(group_id).or_default();
        if !entry.contains(&proxy_id.to_string()) {
            entry.push(proxy_id.to_string());
        }
        Ok(())
    }

    async fn list_error_proxies(&self, group_id: u32) -> Result<Vec<String>, ProxyError> {
        Ok(self
            .error_proxies
            .get(&group_id)
            .map(|e| e.clone())
            .unwrap_or_default())
    }

    async fn reset_error_proxies(&self, group_id: u32) -> Result<(), ProxyError> {
        self.error_proxies.remove(&group_id);
        Ok(())
    }
}
