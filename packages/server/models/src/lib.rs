#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! API request and response types for the EnvWatch server.
//!
//! Heatmap points, stops and incidents are serialized with their model
//! types directly. The types here cover query parameters and the response
//! envelopes that have no model counterpart.

use chrono::{DateTime, Utc};
use envwatch_heatmap_models::HeatmapFilter;
use envwatch_incident_models::Incident;
use envwatch_transit_models::Stop;
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the server is up.
    pub healthy: bool,
    /// Server version.
    pub version: String,
    /// Whether a data snapshot has been loaded.
    pub snapshot_loaded: bool,
    /// When the served snapshot was built.
    pub snapshot_loaded_at: Option<DateTime<Utc>>,
}

/// Query parameters shared by the heatmap and incident filter endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterQueryParams {
    /// Time-of-day token (`morning`, `day`, `evening`). Also accepted as
    /// `quart`.
    #[serde(alias = "quart")]
    pub bucket: Option<String>,
    /// Incident category, matched exactly.
    pub category: Option<String>,
}

impl From<FilterQueryParams> for HeatmapFilter {
    fn from(params: FilterQueryParams) -> Self {
        Self {
            bucket: params.bucket,
            category: params.category,
        }
    }
}

/// Response of the incidents-near-stop endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearStopResponse {
    /// The requested stop.
    pub stop: Stop,
    /// Incidents within the proximity radius, nearest first.
    pub crimes: Vec<Incident>,
}

/// JSON error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Human-readable message.
    pub error: String,
}

impl ApiError {
    /// Creates an error body.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
