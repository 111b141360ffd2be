//! In-memory store backed by an immutable snapshot.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use envwatch_geography_models::Coordinate;
use envwatch_incident_models::{FilterSignature, Incident};
use envwatch_spatial::SpatialIndex;
use envwatch_transit_models::{Stop, StopFrequency};

use crate::{IncidentStore, StoreError};

/// A consistent view of stops, incidents and stop frequencies.
pub struct Snapshot {
    stops: Vec<Stop>,
    incidents: SpatialIndex,
    frequencies: BTreeMap<String, StopFrequency>,
    loaded_at: DateTime<Utc>,
}

impl Snapshot {
    /// Builds a snapshot, indexing the incidents.
    ///
    /// Stop order is preserved. A repeated `stop_id` keeps its first
    /// occurrence.
    #[must_use]
    pub fn new(
        stops: Vec<Stop>,
        incidents: Vec<Incident>,
        frequencies: BTreeMap<String, StopFrequency>,
    ) -> Self {
        let mut seen = std::collections::BTreeSet::new();
        let total = stops.len();
        let stops: Vec<Stop> = stops
            .into_iter()
            .filter(|stop| seen.insert(stop.stop_id.clone()))
            .collect();

        if stops.len() < total {
            log::warn!(
                "Dropped {} stops with duplicate stop_id ({total} -> {})",
                total - stops.len(),
                stops.len()
            );
        }

        let invalid_stops = stops.iter().filter(|s| !s.location.is_valid()).count();
        if invalid_stops > 0 {
            log::warn!(
                "{invalid_stops} stops have invalid coordinates and will report no nearby incidents"
            );
        }

        Self {
            stops,
            incidents: SpatialIndex::build(incidents),
            frequencies,
            loaded_at: Utc::now(),
        }
    }

    /// Stops in canonical order.
    #[must_use]
    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    /// The incident index.
    #[must_use]
    pub const fn incidents(&self) -> &SpatialIndex {
        &self.incidents
    }

    /// When this snapshot was built.
    #[must_use]
    pub const fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

#[derive(Default)]
struct Installed {
    snapshot: Option<Arc<Snapshot>>,
    generation: u64,
}

/// [`IncidentStore`] over the currently installed [`Snapshot`].
///
/// Readers take a reference-counted handle to the current snapshot, so
/// installing a new one never disturbs a single query already running
/// against the old one. Every install bumps the store's generation.
#[derive(Default)]
pub struct SnapshotStore {
    current: RwLock<Installed>,
}

impl SnapshotStore {
    /// Creates a store with no snapshot. It is unreachable until
    /// [`Self::install`] is called.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store serving `snapshot`.
    #[must_use]
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            current: RwLock::new(Installed {
                snapshot: Some(Arc::new(snapshot)),
                generation: 1,
            }),
        }
    }

    /// Replaces the served snapshot and bumps the generation.
    pub fn install(&self, snapshot: Snapshot) {
        log::info!(
            "Installing snapshot: {} stops, {} incidents ({} excluded), {} stop frequencies",
            snapshot.stops.len(),
            snapshot.incidents.len(),
            snapshot.incidents.excluded(),
            snapshot.frequencies.len()
        );
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        current.snapshot = Some(Arc::new(snapshot));
        current.generation += 1;
    }

    /// Returns the served snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if no snapshot is installed.
    pub fn current(&self) -> Result<Arc<Snapshot>, StoreError> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot
            .clone()
            .ok_or_else(|| StoreError::unavailable("no snapshot loaded"))
    }

    /// Number of snapshots installed so far.
    #[must_use]
    pub fn installed_generation(&self) -> u64 {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }
}

#[async_trait]
impl IncidentStore for SnapshotStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.current().map(|_| ())
    }

    async fn generation(&self) -> Result<u64, StoreError> {
        self.current()?;
        Ok(self.installed_generation())
    }

    async fn load_stops(&self) -> Result<Vec<Stop>, StoreError> {
        Ok(self.current()?.stops.clone())
    }

    async fn count_within(
        &self,
        center: Coordinate,
        radius_m: f64,
        filter: &FilterSignature,
    ) -> Result<u64, StoreError> {
        let snapshot = self.current()?;
        Ok(snapshot
            .incidents
            .count_within(center, radius_m, |incident| filter.matches(incident)))
    }

    async fn incidents_within(
        &self,
        center: Coordinate,
        radius_m: f64,
        filter: &FilterSignature,
    ) -> Result<Vec<Incident>, StoreError> {
        let snapshot = self.current()?;
        Ok(snapshot
            .incidents
            .within(center, radius_m, |incident| filter.matches(incident))
            .into_iter()
            .map(|(incident, _)| incident.clone())
            .collect())
    }

    async fn query_incidents(&self, filter: &FilterSignature) -> Result<Vec<Incident>, StoreError> {
        let snapshot = self.current()?;
        let mut incidents: Vec<Incident> = snapshot
            .incidents
            .iter()
            .filter(|incident| filter.matches(incident))
            .cloned()
            .collect();

        incidents.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| a.category.cmp(&b.category))
                .then_with(|| a.location.lat.total_cmp(&b.location.lat))
                .then_with(|| a.location.lon.total_cmp(&b.location.lon))
        });
        Ok(incidents)
    }

    async fn stop_frequency(&self, stop_id: &str) -> Result<Option<StopFrequency>, StoreError> {
        Ok(self.current()?.frequencies.get(stop_id).copied())
    }
}
