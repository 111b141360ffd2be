#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Transit stop and stop frequency types.
//!
//! Stops come from the agency's GTFS `stops.txt` and are loaded once per
//! snapshot. Their order in the snapshot is the canonical order of every
//! per-stop result the heatmap produces.

use envwatch_geography_models::Coordinate;
use serde::{Deserialize, Serialize};

/// A transit stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    /// GTFS `stop_id`, unique and stable across feed versions.
    pub stop_id: String,
    /// Rider-facing stop code, if the agency publishes one.
    pub stop_code: Option<String>,
    /// Human-readable stop name.
    pub stop_name: Option<String>,
    /// Stop position.
    pub location: Coordinate,
}

impl Stop {
    /// Creates a stop with only an identifier and a position.
    #[must_use]
    pub fn new(stop_id: impl Into<String>, location: Coordinate) -> Self {
        Self {
            stop_id: stop_id.into(),
            stop_code: None,
            stop_name: None,
            location,
        }
    }
}

/// Number of scheduled arrivals at a stop per time-of-day bucket.
///
/// Derived from GTFS `stop_times.txt` by bucketing each arrival hour:
/// `[0, 8)` morning, `[8, 16)` day, `[16, 24)` evening.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopFrequency {
    /// Arrivals between 00:00 and 08:00.
    pub morning: u32,
    /// Arrivals between 08:00 and 16:00.
    pub day: u32,
    /// Arrivals between 16:00 and 24:00.
    pub evening: u32,
}
