// src/config.rs

//! Manages proxy configuration: loading, resolving, and validation.
//!
//! Follows the raw-then-validate split this codebase uses elsewhere: a
//! `RawConfig` mirrors the TOML file shape with `serde` defaults, and is
//! resolved into an immutable `Config` that's threaded through component
//! constructors rather than kept as process-wide mutable state.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{info, warn};

use crate::core::cluster::slot::DEFAULT_SLOT_COUNT;

/// Whether to disable RDB snapshots and/or enable AOF on a newly promoted
/// master, named directly after `original_source/config/config.go`'s
/// `MasterOp.Rdb` / `MasterOp.Aof` fields.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct MasterOpConfig {
    #[serde(default)]
    pub rdb: bool,
    #[serde(default)]
    pub aof: bool,
}

/// A raw representation of the config file before validation and resolution.
#[derive(Deserialize)]
struct RawConfig {
    proxy_id: String,
    #[serde(default = "default_product_name")]
    product_name: String,
    zk_addr: String,
    #[serde(default = "default_listen_addr")]
    listen_addr: String,
    #[serde(default = "default_http_addr")]
    http_addr: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_slot_count")]
    slot_count: u32,
    #[serde(default = "default_conn_err_limit")]
    conn_err_limit: u32,
    #[serde(default = "default_concurrent_limit")]
    concurrent_limit: usize,
    #[serde(default, with = "humantime_serde")]
    idle_session_ttl: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    backend_request_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    migrate_preflight_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    reconnect_min_backoff: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    reconnect_max_backoff: Option<Duration>,
    #[serde(default)]
    master_op: MasterOpConfig,
    #[serde(default)]
    whitelist_file: Option<String>,
}

fn default_product_name() -> String {
    "shardproxy".to_string()
}
fn default_listen_addr() -> String {
    "0.0.0.0:9000".to_string()
}
fn default_http_addr() -> String {
    "0.0.0.0:9001".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_slot_count() -> u32 {
    DEFAULT_SLOT_COUNT
}
fn default_conn_err_limit() -> u32 {
    10
}
fn default_concurrent_limit() -> usize {
    10_000
}
fn default_idle_session_ttl() -> Duration {
    Duration::from_secs(300)
}
fn default_backend_request_timeout() -> Duration {
    Duration::from_secs(3)
}
fn default_migrate_preflight_timeout() -> Duration {
    Duration::from_millis(500)
}
fn default_reconnect_min_backoff() -> Duration {
    Duration::from_millis(50)
}
fn default_reconnect_max_backoff() -> Duration {
    Duration::from_secs(2)
}

/// The final, validated, and resolved proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Unique identity registered under the coordinator's proxy namespace.
    /// Must not collide with any other running proxy of the same product.
    pub proxy_id: String,
    /// Coordinator namespace prefix (`proxy/<product_name>/...`).
    pub product_name: String,
    /// Coordinator endpoint(s), e.g. a comma-separated ZooKeeper ensemble.
    pub zk_addr: String,
    /// Client-facing RESP listener address.
    pub listen_addr: String,
    /// Diagnostics HTTP listener address (metrics, log level, log rotation).
    pub http_addr: String,
    pub log_level: String,
    /// Number of routing slots; must match the backend's own slot count.
    pub slot_count: u32,
    /// Per-group backend error count that triggers a liveness vote.
    pub conn_err_limit: u32,
    /// Hard ceiling of concurrently active client connections (per-proxy).
    pub concurrent_limit: usize,
    pub idle_session_ttl: Duration,
    pub backend_request_timeout: Duration,
    pub migrate_preflight_timeout: Duration,
    pub reconnect_min_backoff: Duration,
    pub reconnect_max_backoff: Duration,
    pub master_op: MasterOpConfig,
    /// Path to the IP allow-list file (one address per line, `#` comments).
    /// `None` or an empty file means all peers are accepted.
    pub whitelist_file: Option<String>,
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;

        let config = Config {
            proxy_id: raw.proxy_id,
            product_name: raw.product_name,
            zk_addr: raw.zk_addr,
            listen_addr: raw.listen_addr,
            http_addr: raw.http_addr,
            log_level: raw.log_level,
            slot_count: raw.slot_count,
            conn_err_limit: raw.conn_err_limit,
            concurrent_limit: raw.concurrent_limit,
            idle_session_ttl: raw.idle_session_ttl.unwrap_or_else(default_idle_session_ttl),
            backend_request_timeout: raw
                .backend_request_timeout
                .unwrap_or_else(default_backend_request_timeout),
            migrate_preflight_timeout: raw
                .migrate_preflight_timeout
                .unwrap_or_else(default_migrate_preflight_timeout),
            reconnect_min_backoff: raw
                .reconnect_min_backoff
                .unwrap_or_else(default_reconnect_min_backoff),
            reconnect_max_backoff: raw
                .reconnect_max_backoff
                .unwrap_or_else(default_reconnect_max_backoff),
            master_op: raw.master_op,
            whitelist_file: raw.whitelist_file,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    fn validate(&self) -> Result<()> {
        if self.proxy_id.trim().is_empty() {
            return Err(anyhow!("proxy_id cannot be empty"));
        }
        if self.zk_addr.trim().is_empty() {
            return Err(anyhow!("zk_addr cannot be empty"));
        }
        if self.slot_count == 0 {
            return Err(anyhow!("slot_count cannot be 0"));
        }
        if self.concurrent_limit == 0 {
            return Err(anyhow!("concurrent_limit cannot be 0"));
        }
        if self.reconnect_min_backoff > self.reconnect_max_backoff {
            return Err(anyhow!(
                "reconnect_min_backoff cannot exceed reconnect_max_backoff"
            ));
        }
        if self.listen_addr == self.http_addr {
            return Err(anyhow!(
                "listen_addr and http_addr cannot be the same address"
            ));
        }
        if self.conn_err_limit == 0 {
            warn!("conn_err_limit is 0: every backend failure will immediately trigger a liveness vote");
        }
        Ok(())
    }
}

/// Reads the IP allow-list file: one address per line, blank lines and
/// `#`-prefixed lines ignored. A missing `path` (the config field is unset)
/// means all peers are accepted; an empty or all-comment file means no
/// peers are accepted, matching `original_source/cmd/proxy/main.go:
/// readWhiteList`'s literal behavior.
pub fn read_whitelist(path: &str) -> Result<HashSet<IpAddr>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read whitelist file at '{path}'"))?;
    let mut addrs = HashSet::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let addr: IpAddr = line
            .parse()
            .with_context(|| format!("invalid address '{line}' in whitelist file '{path}'"))?;
        addrs.insert(addr);
    }
    info!(count = addrs.len(), path, "loaded IP allow-list");
    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_resolves_with_defaults() {
        let f = write_temp(
            r#"
            proxy_id = "proxy-1"
            zk_addr = "127.0.0.1:2181"
            "#,
        );
        let config = Config::from_file(f.path().to_str().unwrap()).unwrap();
        assert_eq!(config.slot_count, DEFAULT_SLOT_COUNT);
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.http_addr, "0.0.0.0:9001");
        assert_eq!(config.conn_err_limit, 10);
    }

    #[test]
    fn empty_proxy_id_is_rejected() {
        let f = write_temp(
            r#"
            proxy_id = ""
            zk_addr = "127.0.0.1:2181"
            "#,
        );
        assert!(Config::from_file(f.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn colliding_listen_and_http_addr_is_rejected() {
        let f = write_temp(
            r#"
            proxy_id = "proxy-1"
            zk_addr = "127.0.0.1:2181"
            listen_addr = "0.0.0.0:9000"
            http_addr = "0.0.0.0:9000"
            "#,
        );
        assert!(Config::from_file(f.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn whitelist_skips_blank_lines_and_comments() {
        let f = write_temp("# comment\n\n127.0.0.1\n10.0.0.5\n");
        let set = read_whitelist(f.path().to_str().unwrap()).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&"127.0.0.1".parse::<IpAddr>().unwrap()));
    }
}
