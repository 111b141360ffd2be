#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Stop proximity aggregation and heatmap cache.
//!
//! For every transit stop, counts the incidents within
//! [`PROXIMITY_RADIUS_M`] of it, optionally restricted to a time-of-day
//! bucket and/or a category, and serves the resulting weighted point list
//! with bounded staleness.
//!
//! - [`aggregator::ProximityAggregator`] fans one radius query per stop
//!   out over a bounded task set and merges the counts in stop order.
//! - [`cache::CacheLayer`] keys results by [`FilterSignature`], enforces a
//!   TTL, and runs at most one computation per signature at a time.
//! - [`HeatmapService`] is the request surface the server calls.

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod service;

#[cfg(test)]
mod testing;

use std::time::Duration;

use envwatch_database::StoreError;
use envwatch_incident_models::UnrecognizedTimeBucket;

pub use config::HeatmapConfig;
pub use envwatch_heatmap_models::{
    HeatmapFilter, PROXIMITY_RADIUS_M, ProximityResult, StopSummary,
};
pub use envwatch_incident_models::FilterSignature;
pub use service::HeatmapService;

/// Errors surfaced by heatmap operations.
///
/// `Clone` so that one failed computation can be handed to every caller
/// that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeatmapError {
    /// The requested stop is not in the stop set.
    #[error("Stop not found: {stop_id}")]
    NotFound {
        /// The identifier that was looked up.
        stop_id: String,
    },

    /// The time-of-day token did not translate to a bucket.
    #[error("Invalid filter: unrecognized time bucket {token:?}")]
    InvalidFilter {
        /// The rejected token.
        token: String,
    },

    /// The backing store could not be reached.
    #[error("Upstream unavailable: {message}")]
    UpstreamUnavailable {
        /// Underlying cause.
        message: String,
    },

    /// The per-stop fan-out did not finish in time.
    #[error("Heatmap computation timed out after {after:?}")]
    ComputeTimeout {
        /// The time bound that was exceeded.
        after: Duration,
    },
}

impl From<StoreError> for HeatmapError {
    fn from(value: StoreError) -> Self {
        Self::UpstreamUnavailable {
            message: value.to_string(),
        }
    }
}

impl From<UnrecognizedTimeBucket> for HeatmapError {
    fn from(value: UnrecognizedTimeBucket) -> Self {
        Self::InvalidFilter { token: value.token }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_become_upstream_unavailable() {
        let err: HeatmapError = StoreError::unavailable("no snapshot loaded").into();
        assert_eq!(
            err,
            HeatmapError::UpstreamUnavailable {
                message: "Store unavailable: no snapshot loaded".to_string()
            }
        );
    }

    #[test]
    fn unknown_bucket_becomes_invalid_filter() {
        let err: HeatmapError = envwatch_incident_models::translate("noon").unwrap_err().into();
        assert_eq!(
            err,
            HeatmapError::InvalidFilter {
                token: "noon".to_string()
            }
        );
    }
}
