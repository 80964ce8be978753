// src/server/initialization.rs

//! Builds every component the proxy needs before the accept loop starts:
//! the coordinator client, routing table, backend pool, dispatcher,
//! topology watcher and liveness voter, plus the client and diagnostics
//! listeners.

use super::context::ServerContext;
use crate::config::{self, Config};
use crate::core::backend::BackendPool;
use crate::core::coordinator::{Coordinator, InMemoryCoordinator, ProxyInfo};
use crate::core::dispatch::{DispatchConfig, Dispatcher};
use crate::core::metrics;
use crate::core::routing::RoutingTable;
use crate::core::topology::{MasterOpConfig, TopologyWatcher};
use crate::core::vote::LivenessVoter;
use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast, watch};
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, reload};

/// Raises the process's file-descriptor soft limit toward its hard cap (or
/// a minimum of 1024, whichever is higher), matching `router.CheckUlimit`
/// in the original proxy. Best-effort: a failure here is logged, not fatal,
/// since the proxy may simply be running unprivileged in a container whose
/// hard cap already covers the target.
#[cfg(unix)]
fn raise_fd_limit(target: u64) {
    use std::mem::MaybeUninit;

    let mut limits = MaybeUninit::<libc::rlimit>::uninit();
    // SAFETY: `limits` is a valid pointer to an appropriately sized buffer.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, limits.as_mut_ptr()) };
    if rc != 0 {
        warn!("getrlimit(RLIMIT_NOFILE) failed: {}", std::io::Error::last_os_error());
        return;
    }
    // SAFETY: `getrlimit` succeeded, so `limits` is now initialized.
    let mut limits = unsafe { limits.assume_init() };
    let desired = target.max(limits.rlim_cur).min(limits.rlim_max);
    if desired <= limits.rlim_cur {
        return;
    }
    limits.rlim_cur = desired;
    // SAFETY: `limits` is a valid, fully-initialized rlimit.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limits) };
    if rc != 0 {
        warn!("setrlimit(RLIMIT_NOFILE, {desired}) failed: {}", std::io::Error::last_os_error());
    } else {
        info!("raised file-descriptor soft limit to {desired}");
    }
}

#[cfg(not(unix))]
fn raise_fd_limit(_target: u64) {}

pub async fn setup(
    config: Config,
    log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<ServerContext> {
    raise_fd_limit(1024);
    metrics::init();

    let whitelist = match &config.whitelist_file {
        Some(path) => Some(config::read_whitelist(path)?),
        None => None,
    };

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("proxy listening for clients on {}", config.listen_addr);

    let coordinator: Arc<dyn Coordinator> = Arc::new(InMemoryCoordinator::new());
    let routing = Arc::new(RoutingTable::new(config.slot_count));
    let pool = Arc::new(BackendPool::new(config.idle_session_ttl));
    let voter = Arc::new(LivenessVoter::new(
        coordinator.clone(),
        config.proxy_id.clone(),
        config.conn_err_limit,
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        routing.clone(),
        pool.clone(),
        DispatchConfig {
            backend_request_timeout: config.backend_request_timeout,
            migrate_preflight_timeout: config.migrate_preflight_timeout,
        },
        Some(voter),
    ));

    let topology = Arc::new(TopologyWatcher::new(
        coordinator.clone(),
        routing,
        pool.clone(),
        config.proxy_id.clone(),
        MasterOpConfig {
            rdb: config.master_op.rdb,
            aof: config.master_op.aof,
        },
    ));
    topology.bootstrap().await?;

    coordinator
        .register_proxy(&ProxyInfo {
            id: config.proxy_id.clone(),
            addr: config.listen_addr.clone(),
            state: "online".to_string(),
        })
        .await?;
    info!(proxy_id = %config.proxy_id, "registered with coordinator");

    let (shutdown_tx, _) = broadcast::channel(16);
    let (topology_shutdown_tx, topology_shutdown_rx) = watch::channel(false);
    let conn_semaphore = Arc::new(Semaphore::new(config.concurrent_limit));

    Ok(ServerContext {
        config,
        dispatcher,
        coordinator,
        topology,
        pool,
        listener,
        whitelist,
        shutdown_tx,
        topology_shutdown_tx,
        topology_shutdown_rx,
        background_tasks: JoinSet::new(),
        conn_semaphore,
        log_reload_handle,
    })
}
