//! Server settings read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use envwatch_heatmap::config::parse_var;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 3001;

/// Server and data-loading settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind (`BIND_ADDR`, default `127.0.0.1`).
    pub bind_addr: String,
    /// Port to bind (`PORT`, default 3001).
    pub port: u16,
    /// Snapshot database (`ENVWATCH_DB_PATH`, default `data/envwatch.duckdb`
    /// under the project root).
    pub db_path: PathBuf,
    /// Snapshot reload interval (`SNAPSHOT_REFRESH_SECS`), disabled when
    /// unset.
    pub refresh_interval: Option<Duration>,
}

impl ServerConfig {
    /// Reads the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_var(&lookup, "PORT").unwrap_or(DEFAULT_PORT),
            db_path: lookup("ENVWATCH_DB_PATH")
                .map_or_else(envwatch_database::paths::snapshot_db_path, PathBuf::from),
            refresh_interval: parse_var(&lookup, "SNAPSHOT_REFRESH_SECS")
                .filter(|&secs: &u64| secs > 0)
                .map(Duration::from_secs),
        }
    }
}
