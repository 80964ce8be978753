// src/main.rs

//! The main entry point for the shard proxy.

use anyhow::Result;
use shardproxy::config::Config;
use shardproxy::server;
use std::env;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("shardproxy version {VERSION}");
        return Ok(());
    }

    // -c/--config: path to the TOML config file, default "config.toml".
    let config_path = flag_value(&args, &["-c", "--config"]).unwrap_or("config.toml");

    let mut config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    // -w/--whitelist: overrides the configured IP allow-list file path.
    if let Some(path) = flag_value(&args, &["-w", "--whitelist"]) {
        config.whitelist_file = Some(path.to_string());
    }

    // --addr / --http-addr: override the listen addresses.
    if let Some(addr) = flag_value(&args, &["--addr"]) {
        config.listen_addr = addr.to_string();
    }
    if let Some(addr) = flag_value(&args, &["--http-addr"]) {
        config.http_addr = addr.to_string();
    }
    // --log-level overrides the configured level; -L/--log-file is accepted
    // for compatibility with the original proxy's CLI but this build always
    // logs to stdout (see server::metrics_server::change_log_name_handler).
    if let Some(level) = flag_value(&args, &["--log-level"]) {
        config.log_level = level.to_string();
    }
    if flag_value(&args, &["-L", "--log-file"]).is_some() {
        eprintln!("note: -L/--log-file is accepted but ignored; this build logs to stdout");
    }

    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    let reload_handle = Arc::new(reload_handle);

    if let Err(e) = server::run(config, reload_handle).await {
        error!("server runtime error: {e}");
        return Err(e);
    }

    Ok(())
}

/// Returns the value following the first occurrence of any of `names` in
/// `args`, e.g. `flag_value(&args, &["-c", "--config"])`.
fn flag_value<'a>(args: &'a [String], names: &[&str]) -> Option<&'a str> {
    args.iter()
        .position(|arg| names.contains(&arg.as_str()))
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}
