//! Configuration module for Vigil.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "vigil.db")
    pub db_path: String,
    /// Whether this node acts on SLA failures (default: false)
    pub coordinator: bool,
    /// Peer addresses seeded into the node table, in node ID order
    pub nodes: Vec<String>,
    /// Port assumed for peers listed without one (default: 8080)
    pub peer_port: u16,
    /// Per-peer coordinator poll timeout (default: 2s)
    pub peer_timeout: Duration,
    /// Interval between alert sweeps (default: 30s)
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "vigil.db".to_string(),
            coordinator: false,
            nodes: Vec::new(),
            peer_port: 8080,
            peer_timeout: Duration::from_millis(2000),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `VIGIL_HTTP_PORT`: HTTP port (default: 8080)
    /// - `VIGIL_DB_PATH`: Database file path (default: "vigil.db")
    /// - `VIGIL_COORDINATOR`: true/false, 1/0 or yes/no (default: false)
    /// - `VIGIL_NODES`: comma-separated peer addresses (default: none)
    /// - `VIGIL_PEER_PORT`: port for peers listed without one (default: 8080)
    /// - `VIGIL_PEER_TIMEOUT_MS`: coordinator poll timeout (default: 2000)
    /// - `VIGIL_SWEEP_INTERVAL_SECS`: alert sweep interval (default: 30)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let mut cfg = Self::default();

        if let Some(port) = lookup("VIGIL_HTTP_PORT").and_then(|s| s.parse().ok()) {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("VIGIL_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(flag) = lookup("VIGIL_COORDINATOR").and_then(|s| parse_bool(&s)) {
            cfg.coordinator = flag;
        }

        if let Some(nodes) = lookup("VIGIL_NODES") {
            cfg.nodes = nodes
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(port) = lookup("VIGIL_PEER_PORT").and_then(|s| s.parse().ok()) {
            cfg.peer_port = port;
        }

        if let Some(ms) = lookup("VIGIL_PEER_TIMEOUT_MS").and_then(|s| s.parse::<u64>().ok()) {
            if ms > 0 {
                cfg.peer_timeout = Duration::from_millis(ms);
            }
        }

        if let Some(secs) = lookup("VIGIL_SWEEP_INTERVAL_SECS").and_then(|s| s.parse::<u64>().ok()) {
            if secs > 0 {
                cfg.sweep_interval = Duration::from_secs(secs);
            }
        }

        cfg
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
