// src/server/metrics_server.rs

//! The diagnostics HTTP listener: Prometheus `/metrics`, plus the
//! `/setloglevel` and `/changelogname` endpoints carried over from the
//! original proxy's debug HTTP server.

use crate::core::metrics;
use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, reload};

type ReloadHandle = Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>;

#[derive(Clone)]
struct DiagnosticsState {
    log_reload_handle: ReloadHandle,
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; version=0.0.4")],
            format!("failed to gather metrics: {e}"),
        ),
    }
}

#[derive(Deserialize)]
struct SetLogLevelParams {
    level: String,
}

/// `POST /setloglevel?level=debug` reloads the tracing `EnvFilter` in place,
/// without restarting the process.
async fn set_log_level_handler(
    State(state): State<DiagnosticsState>,
    Query(params): Query<SetLogLevelParams>,
) -> impl IntoResponse {
    match EnvFilter::builder().parse(&params.level) {
        Ok(filter) => match state.log_reload_handle.reload(filter) {
            Ok(()) => {
                info!("log level changed to '{}'", params.level);
                (StatusCode::OK, format!("log level set to {}\n", params.level))
            }
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to reload log filter: {e}\n"),
            ),
        },
        Err(e) => (
            StatusCode::BAD_REQUEST,
            format!("invalid log level '{}': {e}\n", params.level),
        ),
    }
}

#[derive(Deserialize)]
struct ChangeLogNameParams {
    name: String,
}

/// `POST /changelogname?name=...` is a carry-over of the original proxy's
/// log-output-retargeting endpoint. This crate logs to a single configured
/// sink rather than switching writers live, so the handler only records the
/// requested target for operator visibility.
async fn change_log_name_handler(Query(params): Query<ChangeLogNameParams>) -> impl IntoResponse {
    info!(requested_target = %params.name, "changelogname requested (log sink is fixed at startup in this build)");
    (StatusCode::OK, format!("noted: {}\n", params.name))
}

pub async fn run(
    http_addr: &str,
    log_reload_handle: ReloadHandle,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let state = DiagnosticsState { log_reload_handle };
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/setloglevel", post(set_log_level_handler))
        .route("/changelogname", post(change_log_name_handler))
        .with_state(state);

    let addr: SocketAddr = http_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("diagnostics HTTP listener on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("diagnostics HTTP listener shutting down");
        })
        .await?;
    Ok(())
}
