//! Heatmap tuning read from the environment.

use std::str::FromStr;
use std::time::Duration;

/// Default serving TTL of a cached heatmap (30 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Default TTL of the entry installed by the startup preload (5 minutes).
pub const DEFAULT_WARM_TTL: Duration = Duration::from_secs(5 * 60);

/// Default number of per-stop queries in flight at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 32;

/// Cache and fan-out settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeatmapConfig {
    /// How long a computed heatmap is served before recomputation.
    pub ttl: Duration,
    /// How long the startup-preloaded unfiltered heatmap is served.
    pub warm_ttl: Duration,
    /// How many filtered signatures are kept cached. With 0, filtered
    /// heatmaps are recomputed on every request.
    pub filtered_capacity: usize,
    /// Upper bound on concurrent per-stop queries.
    pub max_concurrency: usize,
    /// Optional bound on the whole fan-out.
    pub compute_timeout: Option<Duration>,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            warm_ttl: DEFAULT_WARM_TTL,
            filtered_capacity: 0,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            compute_timeout: None,
        }
    }
}

impl HeatmapConfig {
    /// Reads the configuration from the process environment.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `HEATMAP_TTL_SECS` | 1800 |
    /// | `HEATMAP_WARM_TTL_SECS` | 300 |
    /// | `HEATMAP_FILTERED_CAPACITY` | 0 |
    /// | `HEATMAP_MAX_CONCURRENCY` | 32 |
    /// | `HEATMAP_COMPUTE_TIMEOUT_SECS` | unset |
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            ttl: parse_var(&lookup, "HEATMAP_TTL_SECS")
                .map_or(defaults.ttl, Duration::from_secs),
            warm_ttl: parse_var(&lookup, "HEATMAP_WARM_TTL_SECS")
                .map_or(defaults.warm_ttl, Duration::from_secs),
            filtered_capacity: parse_var(&lookup, "HEATMAP_FILTERED_CAPACITY")
                .unwrap_or(defaults.filtered_capacity),
            max_concurrency: parse_var(&lookup, "HEATMAP_MAX_CONCURRENCY")
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.max_concurrency),
            compute_timeout: parse_var(&lookup, "HEATMAP_COMPUTE_TIMEOUT_SECS")
                .filter(|&secs: &u64| secs > 0)
                .map(Duration::from_secs),
        }
    }
}

/// Parses a variable, logging and ignoring malformed values.
pub fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring malformed {name}={raw:?}, using default");
            None
        }
    }
}
