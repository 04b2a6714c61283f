//! Server settings, read once from `ROOMBOOK_*` environment variables.
//! Unparseable values fall back to their defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::model::Minute;
use crate::slots::DEFAULT_STEP_MINUTES;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    /// Prometheus exporter port; `None` disables the exporter.
    pub metrics_port: Option<u16>,
    /// Default step for `slots` queries that do not name one.
    pub slot_step: Minute,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "roombook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
            slot_step: DEFAULT_STEP_MINUTES,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parsed(&lookup, "ROOMBOOK_PORT").unwrap_or(defaults.port),
            bind: lookup("ROOMBOOK_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("ROOMBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: lookup("ROOMBOOK_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&lookup, "ROOMBOOK_MAX_CONNECTIONS")
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "ROOMBOOK_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            tls_cert: lookup("ROOMBOOK_TLS_CERT"),
            tls_key: lookup("ROOMBOOK_TLS_KEY"),
            metrics_port: parsed(&lookup, "ROOMBOOK_METRICS_PORT"),
            slot_step: parsed(&lookup, "ROOMBOOK_SLOT_STEP")
                .filter(|&s: &Minute| s > 0)
                .unwrap_or(defaults.slot_step),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        let port = self.metrics_port?;
        format!("{}:{port}", self.bind).parse().ok()
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}
