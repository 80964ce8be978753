// src/server/connection_loop.rs

//! The main accept loop: enforces the IP allow-list and the concurrent
//! connection limit, spawns one `ConnectionHandler` task per client, and
//! drives the graceful shutdown sequence on SIGINT/SIGTERM.

use super::context::ServerContext;
use crate::connection::ConnectionHandler;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[cfg(windows)]
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received, shutting down"),
            _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
        }
    }
    #[cfg(windows)]
    {
        signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
    }
}

pub async fn run(mut ctx: ServerContext) {
    let mut client_tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = await_shutdown_signal() => break,

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => info!("a background task exited"),
                    Ok(Err(e)) => { error!("background task failed: {e}; shutting down"); break; }
                    Err(e) => { error!("background task panicked: {e:?}; shutting down"); break; }
                }
            }

            res = ctx.listener.accept() => {
                let (socket, addr) = match res {
                    Ok(pair) => pair,
                    Err(e) => { error!("failed to accept connection: {e}"); continue; }
                };

                if let Some(whitelist) = &ctx.whitelist
                    && !whitelist.contains(&addr.ip())
                {
                    warn!("rejecting connection from {addr}: not in IP allow-list");
                    continue;
                }

                let Ok(permit) = ctx.conn_semaphore.clone().try_acquire_owned() else {
                    warn!("rejecting connection from {addr}: concurrent connection limit reached");
                    continue;
                };

                info!("accepted connection from {addr}");
                let dispatcher = ctx.dispatcher.clone();
                let shutdown_rx = ctx.shutdown_tx.subscribe();
                client_tasks.spawn(async move {
                    let _permit = permit;
                    let handler = ConnectionHandler::new(socket, addr, dispatcher, shutdown_rx);
                    handler.run().await;
                });
            }

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("a client handler panicked: {e:?}");
                }
            }
        }
    }

    info!("shutting down: notifying connections and background tasks");
    let _ = ctx.shutdown_tx.send(());
    let _ = ctx.topology_shutdown_tx.send(true);

    client_tasks.shutdown().await;
    info!("all client connections closed");

    if let Err(e) = ctx.coordinator.deregister_proxy(&ctx.config.proxy_id).await {
        warn!("failed to deregister proxy from coordinator: {e}");
    } else {
        info!("deregistered from coordinator");
    }

    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("timed out waiting for background tasks to finish cleanly");
    }
    info!("shutdown complete");
}
