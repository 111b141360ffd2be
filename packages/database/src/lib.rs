#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Incident store interface and its implementations.
//!
//! The heatmap core talks to its backing data only through
//! [`IncidentStore`]. The production implementation is [`SnapshotStore`],
//! an in-memory snapshot of stops, incidents and stop frequencies that is
//! loaded from a `DuckDB` file by [`duckdb_snapshot`] and swapped wholesale
//! when a refreshed file is available. Until a snapshot is installed the
//! store reports itself unreachable.

pub mod duckdb_snapshot;
pub mod paths;
pub mod snapshot;

use async_trait::async_trait;
use envwatch_geography_models::Coordinate;
use envwatch_incident_models::{FilterSignature, Incident};
use envwatch_transit_models::{Stop, StopFrequency};

pub use snapshot::{Snapshot, SnapshotStore};

/// Errors that can occur while reading from a store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store cannot currently answer queries.
    #[error("Store unavailable: {message}")]
    Unavailable {
        /// Why the store is unavailable.
        message: String,
    },

    /// `DuckDB` error.
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

impl StoreError {
    /// Shorthand for [`StoreError::Unavailable`].
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Read-only access to stops, incidents and stop schedules.
///
/// Every query is independent and may be issued concurrently.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Checks that the store can answer queries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] when the store is unreachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Identifies the data version queries are currently answered from.
    ///
    /// Two reads that return the same generation saw the same data.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] when the store is unreachable.
    async fn generation(&self) -> Result<u64, StoreError>;

    /// Returns all stops in canonical order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    async fn load_stops(&self) -> Result<Vec<Stop>, StoreError>;

    /// Counts incidents matching `filter` within `radius_m` meters of
    /// `center` (great-circle distance, inclusive boundary).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    async fn count_within(
        &self,
        center: Coordinate,
        radius_m: f64,
        filter: &FilterSignature,
    ) -> Result<u64, StoreError>;

    /// Returns incidents matching `filter` within `radius_m` meters of
    /// `center`, nearest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    async fn incidents_within(
        &self,
        center: Coordinate,
        radius_m: f64,
        filter: &FilterSignature,
    ) -> Result<Vec<Incident>, StoreError>;

    /// Returns all incidents matching `filter`, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    async fn query_incidents(&self, filter: &FilterSignature) -> Result<Vec<Incident>, StoreError>;

    /// Returns the scheduled arrival frequency for a stop, if known.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    async fn stop_frequency(&self, stop_id: &str) -> Result<Option<StopFrequency>, StoreError>;
}
