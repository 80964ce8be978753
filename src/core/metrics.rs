// src/core/metrics.rs

//! Prometheus metrics exposed over the diagnostics HTTP listener's
//! `/metrics` endpoint, defined with the same `lazy_static!` +
//! `register_*!` pattern this codebase uses for its own server metrics.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, TextEncoder,
    register_int_counter, register_int_counter_vec, register_int_gauge, register_int_gauge_vec,
};

lazy_static! {
    pub static ref CLIENT_CONNECTIONS: IntGauge = register_int_gauge!(
        Opts::new("client_connections", "Currently connected client sockets")
    )
    .unwrap();

    pub static ref COMMANDS_DISPATCHED: IntCounter = register_int_counter!(
        Opts::new("commands_dispatched_total", "Commands forwarded to a backend")
    )
    .unwrap();

    pub static ref COMMANDS_REJECTED: IntCounterVec = register_int_counter_vec!(
        Opts::new("commands_rejected_total", "Commands rejected without reaching a backend"),
        &["reason"]
    )
    .unwrap();

    pub static ref BACKEND_ERRORS: IntCounterVec = register_int_counter_vec!(
        Opts::new("backend_errors_total", "Backend-session failures, by endpoint"),
        &["endpoint"]
    )
    .unwrap();

    pub static ref BACKEND_SESSIONS: IntGaugeVec = register_int_gauge_vec!(
        Opts::new("backend_sessions", "Live backend sessions, by endpoint"),
        &["endpoint"]
    )
    .unwrap();

    pub static ref TOPOLOGY_ACTIONS_APPLIED: IntCounter = register_int_counter!(
        Opts::new("topology_actions_applied_total", "Coordinator actions applied to the routing table")
    )
    .unwrap();

    pub static ref VOTE_EVENTS: IntCounterVec = register_int_counter_vec!(
        Opts::new("vote_events_total", "Liveness vote outcomes, by result"),
        &["result"]
    )
    .unwrap();
}

/// Renders the current metric snapshot in Prometheus text exposition format.
pub fn render() -> Result<String, prometheus::Error> {
    let metric_families = prometheus::gather();
    let mut buf = Vec::new();
    TextEncoder::new().encode(&metric_families, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Forces every metric above to register with the default registry at a
/// known point during startup, rather than lazily on first use.
pub fn init() {
    lazy_static::initialize(&CLIENT_CONNECTIONS);
    lazy_static::initialize(&COMMANDS_DISPATCHED);
    lazy_static::initialize(&COMMANDS_REJECTED);
    lazy_static::initialize(&BACKEND_ERRORS);
    lazy_static::initialize(&BACKEND_SESSIONS);
    lazy_static::initialize(&TOPOLOGY_ACTIONS_APPLIED);
    lazy_static::initialize(&VOTE_EVENTS);
}
