// src/server/context.rs

use crate::config::Config;
use crate::core::backend::BackendPool;
use crate::core::coordinator::Coordinator;
use crate::core::dispatch::Dispatcher;
use crate::core::topology::TopologyWatcher;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast, watch};
use tokio::task::JoinSet;
use tracing_subscriber::{filter::EnvFilter, reload};

/// Holds every initialized component required to run the proxy's main loop.
pub struct ServerContext {
    pub config: Config,
    pub dispatcher: Arc<Dispatcher>,
    pub coordinator: Arc<dyn Coordinator>,
    pub topology: Arc<TopologyWatcher>,
    pub pool: Arc<BackendPool>,
    pub listener: TcpListener,
    pub whitelist: Option<HashSet<IpAddr>>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub topology_shutdown_tx: watch::Sender<bool>,
    pub topology_shutdown_rx: watch::Receiver<bool>,
    pub background_tasks: JoinSet<anyhow::Result<()>>,
    pub conn_semaphore: Arc<Semaphore>,
    pub log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
}
