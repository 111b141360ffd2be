#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! In-memory spatial index for great-circle radius queries.
//!
//! Incidents are bulk-loaded into an R-tree keyed by `[lon, lat]`. A radius
//! query first narrows candidates with a degree-space bounding box that
//! fully contains the search circle, then applies the caller's attribute
//! predicate, and finally the exact haversine distance test. The boundary
//! is inclusive: an incident at exactly `radius_m` is counted, up to
//! [`BOUNDARY_TOLERANCE_M`] of floating-point error.
//!
//! The index is immutable. A refreshed incident set means a new index.

use envwatch_geography_models::{Coordinate, EARTH_MEAN_RADIUS_M};
use envwatch_incident_models::Incident;
use rstar::{AABB, RTree, RTreeObject};

/// Relative slack added to the search box so rounding never clips a point
/// that lies exactly on the circle.
const ENVELOPE_SLACK: f64 = 1.0 + 1e-6;

/// Distance error tolerated on the radius boundary, in meters.
pub const BOUNDARY_TOLERANCE_M: f64 = 1e-6;

/// An incident stored in the R-tree.
struct IncidentEntry {
    position: [f64; 2],
    incident: Incident,
}

impl RTreeObject for IncidentEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

/// Pre-built R-tree over a snapshot of incidents.
pub struct SpatialIndex {
    tree: RTree<IncidentEntry>,
    excluded: usize,
}

impl SpatialIndex {
    /// Builds the index from an incident snapshot.
    ///
    /// Incidents with non-finite or out-of-range coordinates are left out
    /// of the index, so they never match any radius query. The exclusion is
    /// reported as a data-quality warning.
    #[must_use]
    pub fn build(incidents: impl IntoIterator<Item = Incident>) -> Self {
        let mut entries = Vec::new();
        let mut excluded = 0usize;

        for incident in incidents {
            if !incident.location.is_valid() {
                log::debug!(
                    "Skipping incident with invalid coordinates ({}, {}), category {:?}",
                    incident.location.lat,
                    incident.location.lon,
                    incident.category
                );
                excluded += 1;
                continue;
            }

            entries.push(IncidentEntry {
                position: [incident.location.lon, incident.location.lat],
                incident,
            });
        }

        if excluded > 0 {
            log::warn!("Excluded {excluded} incidents with invalid coordinates from spatial index");
        }
        log::info!("Loaded {} incidents into spatial index", entries.len());

        Self {
            tree: RTree::bulk_load(entries),
            excluded,
        }
    }

    /// Number of indexed incidents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Whether the index holds no incidents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Number of incidents dropped at build time for invalid coordinates.
    #[must_use]
    pub const fn excluded(&self) -> usize {
        self.excluded
    }

    /// Iterates over every indexed incident (unspecified order).
    pub fn iter(&self) -> impl Iterator<Item = &Incident> {
        self.tree.iter().map(|entry| &entry.incident)
    }

    /// Counts incidents within `radius_m` meters of `center` that satisfy
    /// `predicate`.
    ///
    /// Returns 0 when `center` is not a valid coordinate or the radius is
    /// negative or not finite.
    #[must_use]
    pub fn count_within<P>(&self, center: Coordinate, radius_m: f64, predicate: P) -> u64
    where
        P: Fn(&Incident) -> bool,
    {
        let Some(envelope) = search_envelope(center, radius_m) else {
            return 0;
        };

        self.tree
            .locate_in_envelope(&envelope)
            .filter(|entry| predicate(&entry.incident))
            .filter(|entry| {
                center.distance_m(&entry.incident.location) <= radius_m + BOUNDARY_TOLERANCE_M
            })
            .count() as u64
    }

    /// Returns incidents within `radius_m` meters of `center` that satisfy
    /// `predicate`, nearest first, paired with their distance in meters.
    #[must_use]
    pub fn within<P>(&self, center: Coordinate, radius_m: f64, predicate: P) -> Vec<(&Incident, f64)>
    where
        P: Fn(&Incident) -> bool,
    {
        let Some(envelope) = search_envelope(center, radius_m) else {
            return Vec::new();
        };

        let mut hits: Vec<(&Incident, f64)> = self
            .tree
            .locate_in_envelope(&envelope)
            .filter(|entry| predicate(&entry.incident))
            .map(|entry| {
                let d = center.distance_m(&entry.incident.location);
                (&entry.incident, d)
            })
            .filter(|(_, d)| *d <= radius_m + BOUNDARY_TOLERANCE_M)
            .collect();

        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits
    }
}

/// Degree-space `[lon, lat]` box that contains every point within
/// `radius_m` meters of `center`.
///
/// Falls back to the full longitude range near the poles and when the
/// circle crosses the antimeridian. Returns `None` for an invalid center or
/// a negative or non-finite radius.
fn search_envelope(center: Coordinate, radius_m: f64) -> Option<AABB<[f64; 2]>> {
    if !center.is_valid() || !radius_m.is_finite() || radius_m < 0.0 {
        return None;
    }

    let d_lat = (radius_m / EARTH_MEAN_RADIUS_M).to_degrees() * ENVELOPE_SLACK;
    let min_lat = (center.lat - d_lat).max(-90.0);
    let max_lat = (center.lat + d_lat).min(90.0);

    // Longitude span widens with latitude; size it for the widest edge.
    let widest = min_lat.abs().max(max_lat.abs()).to_radians().cos();
    let d_lon = if widest > 1e-9 {
        d_lat / widest
    } else {
        f64::INFINITY
    };

    let (min_lon, max_lon) = if center.lon - d_lon < -180.0 || center.lon + d_lon > 180.0 {
        (-180.0, 180.0)
    } else {
        (center.lon - d_lon, center.lon + d_lon)
    };

    Some(AABB::from_corners([min_lon, min_lat], [max_lon, max_lat]))
}
