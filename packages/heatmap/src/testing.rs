//! Store doubles and fixtures shared by the heatmap tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use envwatch_database::{IncidentStore, Snapshot, SnapshotStore, StoreError};
use envwatch_geography_models::Coordinate;
use envwatch_incident_models::{FilterSignature, Incident, TimeBucket};
use envwatch_transit_models::{Stop, StopFrequency};

type DelayFn = Box<dyn Fn(Coordinate) -> Duration + Send + Sync>;

/// [`SnapshotStore`] wrapper that counts calls and can inject latency and
/// failures into `count_within`.
pub struct TestStore {
    inner: SnapshotStore,
    delay: Option<DelayFn>,
    fail_at: Option<Coordinate>,
    unavailable: AtomicBool,
    load_stops_calls: AtomicUsize,
    count_calls: AtomicUsize,
    completed_counts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl TestStore {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            inner: SnapshotStore::with_snapshot(snapshot),
            delay: None,
            fail_at: None,
            unavailable: AtomicBool::new(false),
            load_stops_calls: AtomicUsize::new(0),
            count_calls: AtomicUsize::new(0),
            completed_counts: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Sleeps for `delay(center)` before answering each `count_within`.
    pub fn with_delay(
        mut self,
        delay: impl Fn(Coordinate) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.delay = Some(Box::new(delay));
        self
    }

    /// Fails the `count_within` query centered on `center`.
    pub const fn failing_at(mut self, center: Coordinate) -> Self {
        self.fail_at = Some(center);
        self
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn install(&self, snapshot: Snapshot) {
        self.inner.install(snapshot);
    }

    pub fn load_stops_calls(&self) -> usize {
        self.load_stops_calls.load(Ordering::SeqCst)
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    pub fn completed_counts(&self) -> usize {
        self.completed_counts.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("connection refused"));
        }
        Ok(())
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl IncidentStore for TestStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check()?;
        self.inner.ping().await
    }

    async fn generation(&self) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.generation().await
    }

    async fn load_stops(&self) -> Result<Vec<Stop>, StoreError> {
        self.load_stops_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.load_stops().await
    }

    async fn count_within(
        &self,
        center: Coordinate,
        radius_m: f64,
        filter: &FilterSignature,
    ) -> Result<u64, StoreError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(center)).await;
        }
        if self.fail_at == Some(center) {
            return Err(StoreError::unavailable("connection reset"));
        }
        self.check()?;

        let count = self.inner.count_within(center, radius_m, filter).await?;
        self.completed_counts.fetch_add(1, Ordering::SeqCst);
        Ok(count)
    }

    async fn incidents_within(
        &self,
        center: Coordinate,
        radius_m: f64,
        filter: &FilterSignature,
    ) -> Result<Vec<Incident>, StoreError> {
        self.check()?;
        self.inner.incidents_within(center, radius_m, filter).await
    }

    async fn query_incidents(&self, filter: &FilterSignature) -> Result<Vec<Incident>, StoreError> {
        self.check()?;
        self.inner.query_incidents(filter).await
    }

    async fn stop_frequency(&self, stop_id: &str) -> Result<Option<StopFrequency>, StoreError> {
        self.check()?;
        self.inner.stop_frequency(stop_id).await
    }
}

/// Position of a scenario stop.
pub fn scenario_stop(stop_id: &str) -> Coordinate {
    match stop_id {
        "A" => Coordinate::new(45.5000, -73.6000),
        "B" => Coordinate::new(45.5200, -73.6000),
        _ => Coordinate::new(45.5400, -73.6000),
    }
}

fn incident(location: Coordinate, category: &str, bucket: TimeBucket, ts: i64) -> Incident {
    Incident {
        category: category.to_string(),
        occurred_at: DateTime::<Utc>::from_timestamp(ts, 0).unwrap(),
        time_bucket: bucket,
        location,
    }
}

/// Three stops about 2.2 km apart and five incidents.
///
/// Within 500 m: A has two (100 m north, 300 m south), B none, C one
/// (200 m north, the only morning incident). The other two are 1.1 km and
/// 700 m from the nearest stop. Expected weights are `[2, 0, 1]`
/// unfiltered and `[0, 0, 1]` for the morning bucket.
pub fn scenario_snapshot() -> Snapshot {
    let a = scenario_stop("A");
    let b = scenario_stop("B");
    let c = scenario_stop("C");

    let stops = vec![Stop::new("A", a), Stop::new("B", b), Stop::new("C", c)];
    let incidents = vec![
        incident(a.offset_north(100.0), "Vol", TimeBucket::Day, 1_700_000_000),
        incident(a.offset_north(-300.0), "Méfait", TimeBucket::Evening, 1_700_100_000),
        incident(c.offset_north(200.0), "Vol", TimeBucket::Morning, 1_700_200_000),
        incident(Coordinate::new(45.5100, -73.6000), "Vol", TimeBucket::Day, 1_700_300_000),
        incident(c.offset_north(700.0), "Méfait", TimeBucket::Evening, 1_700_400_000),
    ];

    let mut frequencies = BTreeMap::new();
    frequencies.insert(
        "A".to_string(),
        StopFrequency {
            morning: 12,
            day: 40,
            evening: 25,
        },
    );

    Snapshot::new(stops, incidents, frequencies)
}
