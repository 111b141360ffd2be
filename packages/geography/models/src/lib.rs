#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geographic coordinate types and great-circle distance helpers.
//!
//! Stops and incidents are located by WGS84 latitude/longitude in degrees.
//! Distances are computed on a sphere of Earth's mean radius, which is
//! accurate to well under a meter at the few-hundred-meter scale used for
//! stop proximity.

use geo::{Destination, Distance, HaversineMeasure, Point};
use serde::{Deserialize, Serialize};

/// Earth's mean radius in meters.
pub const EARTH_MEAN_RADIUS_M: f64 = 6_371_000.0;

/// Haversine metric space on a sphere of [`EARTH_MEAN_RADIUS_M`].
pub const EARTH: HaversineMeasure = HaversineMeasure::new(EARTH_MEAN_RADIUS_M);

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude, `-90.0..=90.0`.
    pub lat: f64,
    /// Longitude, `-180.0..=180.0`.
    pub lon: f64,
}

impl Coordinate {
    /// Creates a new coordinate from latitude and longitude.
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Whether both components are finite and inside the WGS84 range.
    ///
    /// Invalid coordinates come from bad source rows (missing values parsed
    /// as `NaN`, swapped columns, sentinel zeros outside the range) and are
    /// excluded from every distance computation.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Great-circle distance to `other` in meters.
    #[must_use]
    pub fn distance_m(&self, other: &Self) -> f64 {
        EARTH.distance(Point::from(*self), Point::from(*other))
    }

    /// Returns the coordinate `meters` due north (negative = south) along
    /// the meridian.
    #[must_use]
    pub fn offset_north(&self, meters: f64) -> Self {
        let bearing = if meters < 0.0 { 180.0 } else { 0.0 };
        EARTH
            .destination(Point::from(*self), bearing, meters.abs())
            .into()
    }
}

impl From<Coordinate> for Point<f64> {
    fn from(value: Coordinate) -> Self {
        Self::new(value.lon, value.lat)
    }
}

impl From<Point<f64>> for Coordinate {
    fn from(value: Point<f64>) -> Self {
        Self::new(value.y(), value.x())
    }
}
