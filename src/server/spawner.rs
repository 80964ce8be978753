// src/server/spawner.rs

//! Spawns the proxy's long-running background tasks: the topology watcher,
//! the liveness-relevant session-expiry monitor, idle backend-session
//! eviction, and the diagnostics HTTP listener.

use super::context::ServerContext;
use super::metrics_server;
use anyhow::{Result, anyhow};
use std::time::Duration;
use tracing::{error, info};

const IDLE_EVICTION_INTERVAL: Duration = Duration::from_secs(30);

pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let background_tasks = &mut ctx.background_tasks;

    // Topology watcher: applies coordinator actions to the routing table.
    let topology = ctx.topology.clone();
    let topology_shutdown_rx = ctx.topology_shutdown_rx.clone();
    background_tasks.spawn(async move {
        topology
            .run(topology_shutdown_rx)
            .await
            .map_err(|e| anyhow!("topology watcher failed: {e}"))
    });

    // Session-expiry monitor: a lost coordinator session is fatal, so this
    // task's only job is to notice and trigger shutdown.
    let coordinator = ctx.coordinator.clone();
    let shutdown_tx = ctx.shutdown_tx.clone();
    let topology_shutdown_tx = ctx.topology_shutdown_tx.clone();
    background_tasks.spawn(async move {
        let mut expiry_rx = coordinator.watch_session_expiry().await;
        loop {
            if expiry_rx.changed().await.is_err() {
                return Ok(());
            }
            if *expiry_rx.borrow() {
                error!("coordinator session expired; this proxy's registration is no longer valid");
                let _ = shutdown_tx.send(());
                let _ = topology_shutdown_tx.send(true);
                return Err(anyhow!("coordinator session expired"));
            }
        }
    });

    // Idle backend session eviction.
    let pool = ctx.pool.clone();
    let mut shutdown_rx = ctx.shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        let mut ticker = tokio::time::interval(IDLE_EVICTION_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => pool.evict_idle().await,
                _ = shutdown_rx.recv() => return Ok(()),
            }
        }
    });

    // Diagnostics HTTP listener.
    let http_addr = ctx.config.http_addr.clone();
    let log_reload_handle = ctx.log_reload_handle.clone();
    let shutdown_rx = ctx.shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        metrics_server::run(&http_addr, log_reload_handle, shutdown_rx).await
    });

    info!("all background tasks spawned");
    Ok(())
}
