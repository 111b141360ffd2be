//! TTL cache of computed heatmaps with per-signature single-flight.
//!
//! Entries are keyed by [`FilterSignature`]. A miss starts one computation
//! on a spawned task and records it as in flight; every caller that misses
//! on the same signature while it runs awaits the same shared future. The
//! spawned task installs the result, so it lands in the cache even when
//! every waiting caller has gone away.
//!
//! The state lock is never held across an `.await`, and unrelated
//! signatures never wait on each other's computations.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use envwatch_heatmap_models::ProximityResult;
use envwatch_incident_models::FilterSignature;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::time::Instant;

use crate::aggregator::ProximityAggregator;
use crate::{HeatmapConfig, HeatmapError};

type SharedComputation = Shared<BoxFuture<'static, Result<Computed, HeatmapError>>>;

#[derive(Debug, Clone)]
struct Computed {
    results: Arc<[ProximityResult]>,
    computed_at: DateTime<Utc>,
}

/// One cached heatmap.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Signature the results were computed for.
    pub signature: FilterSignature,
    /// Weighted points in stop order.
    pub results: Arc<[ProximityResult]>,
    /// Wall-clock time the computation finished.
    pub computed_at: DateTime<Utc>,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    /// Whether this entry may still be served at `now`.
    #[must_use]
    pub fn is_live(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }

    /// The TTL this entry was installed with.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// A heatmap as returned by [`CacheLayer::get`].
#[derive(Debug, Clone)]
pub struct CachedHeatmap {
    /// Weighted points in stop order.
    pub results: Arc<[ProximityResult]>,
    /// `true` when served from a live entry without computing.
    pub from_cache: bool,
    /// When the results were computed.
    pub computed_at: DateTime<Utc>,
}

struct InFlight {
    computation: SharedComputation,
    epoch: u64,
}

#[derive(Default)]
struct CacheState {
    entries: BTreeMap<FilterSignature, CacheEntry>,
    in_flight: BTreeMap<FilterSignature, InFlight>,
    epoch: u64,
}

impl CacheState {
    fn filtered_len(&self) -> usize {
        self.entries.keys().filter(|s| !s.is_unfiltered()).count()
    }

    fn insert(
        &mut self,
        signature: FilterSignature,
        computed: &Computed,
        ttl: Duration,
        filtered_capacity: usize,
    ) {
        if !signature.is_unfiltered() {
            if filtered_capacity == 0 {
                return;
            }
            if !self.entries.contains_key(&signature) {
                while self.filtered_len() >= filtered_capacity {
                    let oldest = self
                        .entries
                        .iter()
                        .filter(|(s, _)| !s.is_unfiltered())
                        .min_by_key(|(_, e)| e.stored_at)
                        .map(|(s, _)| s.clone());
                    let Some(oldest) = oldest else {
                        break;
                    };
                    log::debug!("Evicting cached heatmap for {oldest}");
                    self.entries.remove(&oldest);
                }
            }
        }

        self.entries.insert(
            signature.clone(),
            CacheEntry {
                signature,
                results: Arc::clone(&computed.results),
                computed_at: computed.computed_at,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }
}

/// Heatmap cache in front of a [`ProximityAggregator`].
///
/// The unfiltered heatmap is always cacheable. Filtered heatmaps are kept
/// only when a filtered capacity is configured, oldest evicted first.
pub struct CacheLayer {
    aggregator: Arc<ProximityAggregator>,
    ttl: Duration,
    warm_ttl: Duration,
    filtered_capacity: usize,
    state: Arc<Mutex<CacheState>>,
}

impl CacheLayer {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(aggregator: Arc<ProximityAggregator>, config: &HeatmapConfig) -> Self {
        Self {
            aggregator,
            ttl: config.ttl,
            warm_ttl: config.warm_ttl,
            filtered_capacity: config.filtered_capacity,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    /// Returns the heatmap for `signature`, computing it if no live entry
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns the computation's [`HeatmapError`]. A failed computation
    /// leaves the cache as it was.
    pub async fn get(&self, signature: &FilterSignature) -> Result<CachedHeatmap, HeatmapError> {
        self.fetch(signature, self.ttl).await
    }

    /// Computes and installs the unfiltered heatmap with the warm-up TTL.
    ///
    /// Failures are logged and reported as `false`; the next request for
    /// the unfiltered heatmap computes it again.
    pub async fn preload(&self) -> bool {
        let signature = FilterSignature::unfiltered();
        log::info!("Preloading unfiltered heatmap");

        match self.fetch(&signature, self.warm_ttl).await {
            Ok(heatmap) => {
                log::info!(
                    "Preloaded unfiltered heatmap: {} stops",
                    heatmap.results.len()
                );
                true
            }
            Err(e) => {
                log::error!("Heatmap preload failed: {e}");
                false
            }
        }
    }

    /// Drops every entry and detaches running computations.
    ///
    /// Callers already waiting on a computation still receive its result,
    /// but that result is not installed.
    pub fn invalidate_all(&self) {
        let mut state = self.lock();
        state.epoch = state.epoch.wrapping_add(1);
        let dropped = state.entries.len();
        let detached = state.in_flight.len();
        state.entries.clear();
        state.in_flight.clear();
        log::info!(
            "Invalidated heatmap cache: {dropped} entries dropped, {detached} computations detached"
        );
    }

    /// Returns the entry for `signature` whether or not it is still live.
    #[must_use]
    pub fn peek(&self, signature: &FilterSignature) -> Option<CacheEntry> {
        self.lock().entries.get(signature).cloned()
    }

    /// Number of stored entries, live or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether no entry is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        lock_state(&self.state)
    }

    async fn fetch(
        &self,
        signature: &FilterSignature,
        ttl: Duration,
    ) -> Result<CachedHeatmap, HeatmapError> {
        let computation = {
            let mut state = self.lock();

            if let Some(entry) = state
                .entries
                .get(signature)
                .filter(|e| e.is_live(Instant::now()))
            {
                log::debug!("Heatmap cache hit for {signature}");
                return Ok(CachedHeatmap {
                    results: Arc::clone(&entry.results),
                    from_cache: true,
                    computed_at: entry.computed_at,
                });
            }

            if let Some(in_flight) = state.in_flight.get(signature) {
                log::debug!("Joining in-flight heatmap computation for {signature}");
                in_flight.computation.clone()
            } else {
                log::debug!("Heatmap cache miss for {signature}");
                let epoch = state.epoch;
                let computation = self.start(signature.clone(), ttl, epoch);
                state.in_flight.insert(
                    signature.clone(),
                    InFlight {
                        computation: computation.clone(),
                        epoch,
                    },
                );
                computation
            }
        };

        let computed = computation.await?;
        Ok(CachedHeatmap {
            results: computed.results,
            from_cache: false,
            computed_at: computed.computed_at,
        })
    }

    fn start(&self, signature: FilterSignature, ttl: Duration, epoch: u64) -> SharedComputation {
        let aggregator = Arc::clone(&self.aggregator);
        let state = Arc::clone(&self.state);
        let cleanup_state = Arc::clone(&self.state);
        let cleanup_signature = signature.clone();
        let filtered_capacity = self.filtered_capacity;

        let handle = tokio::spawn(async move {
            let outcome = aggregator
                .compute(&signature)
                .await
                .map(|results| Computed {
                    results: results.into(),
                    computed_at: Utc::now(),
                });

            let mut state = lock_state(&state);
            if state.epoch == epoch {
                state.in_flight.remove(&signature);
                if let Ok(computed) = &outcome {
                    state.insert(signature, computed, ttl, filtered_capacity);
                }
            } else {
                log::debug!("Discarding heatmap for {signature} computed before invalidation");
            }
            drop(state);

            outcome
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                log::error!("Heatmap computation task for {cleanup_signature} failed: {e}");
                let mut state = lock_state(&cleanup_state);
                if state
                    .in_flight
                    .get(&cleanup_signature)
                    .is_some_and(|f| f.epoch == epoch)
                {
                    state.in_flight.remove(&cleanup_signature);
                }
                Err(HeatmapError::UpstreamUnavailable {
                    message: format!("heatmap computation task failed: {e}"),
                })
            })
        }
        .boxed()
        .shared()
    }
}

fn lock_state(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
