#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Heatmap result types and filter parameters.

use envwatch_incident_models::{FilterSignature, UnrecognizedTimeBucket};
use envwatch_transit_models::{Stop, StopFrequency};
use serde::{Deserialize, Serialize};

/// Radius around each stop within which incidents are counted.
pub const PROXIMITY_RADIUS_M: f64 = 500.0;

/// Incident count around one stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProximityResult {
    /// The stop this weight belongs to.
    pub stop_id: String,
    /// Stop latitude.
    pub lat: f64,
    /// Stop longitude.
    pub lon: f64,
    /// Number of matching incidents within [`PROXIMITY_RADIUS_M`].
    pub weight: u64,
}

impl ProximityResult {
    /// Builds the result for `stop` with the given weight.
    #[must_use]
    pub fn for_stop(stop: &Stop, weight: u64) -> Self {
        Self {
            stop_id: stop.stop_id.clone(),
            lat: stop.location.lat,
            lon: stop.location.lon,
            weight,
        }
    }
}

/// Heatmap filter as supplied by a caller, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapFilter {
    /// External time-of-day token (`morning`, `day`, `evening`).
    pub bucket: Option<String>,
    /// Incident category, matched exactly.
    pub category: Option<String>,
}

impl HeatmapFilter {
    /// Normalizes this filter into a [`FilterSignature`].
    ///
    /// # Errors
    ///
    /// Returns [`UnrecognizedTimeBucket`] if the bucket token is unknown.
    pub fn signature(&self) -> Result<FilterSignature, UnrecognizedTimeBucket> {
        FilterSignature::from_tokens(self.bucket.as_deref(), self.category.as_deref())
    }
}

/// Per-stop aggregate: schedule frequency and nearby incident count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopSummary {
    /// The stop.
    pub stop: Stop,
    /// Scheduled arrivals per bucket, `None` when no schedule data exists.
    pub frequency: Option<StopFrequency>,
    /// Incidents within [`PROXIMITY_RADIUS_M`], unfiltered.
    pub incident_count: u64,
}
