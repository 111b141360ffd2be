//! Per-stop proximity fan-out.
//!
//! One `count_within` query is issued per stop on a [`JoinSet`], bounded
//! by a [`Semaphore`]. Each task reports its stop index, so the merged
//! result follows the canonical stop order no matter which query finishes
//! first. The first failing query aborts every task still running.
//!
//! The store's generation is read before and after the fan-out. If a new
//! snapshot was installed in between, the per-stop counts may mix two
//! snapshots, so the fan-out is discarded and run once more.

use std::sync::Arc;
use std::time::{Duration, Instant};

use envwatch_database::{IncidentStore, StoreError};
use envwatch_heatmap_models::{HeatmapFilter, PROXIMITY_RADIUS_M, ProximityResult};
use envwatch_incident_models::FilterSignature;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::{HeatmapConfig, HeatmapError};

/// Fan-outs attempted before a computation that keeps straddling snapshot
/// installs gives up.
const SNAPSHOT_ATTEMPTS: usize = 2;

/// Computes complete heatmaps against an [`IncidentStore`].
pub struct ProximityAggregator {
    store: Arc<dyn IncidentStore>,
    max_concurrency: usize,
    compute_timeout: Option<Duration>,
}

impl ProximityAggregator {
    /// Creates an aggregator with the fan-out settings from `config`.
    #[must_use]
    pub fn new(store: Arc<dyn IncidentStore>, config: &HeatmapConfig) -> Self {
        Self {
            store,
            max_concurrency: config.max_concurrency.max(1),
            compute_timeout: config.compute_timeout,
        }
    }

    /// Translates `filter` and computes its heatmap.
    ///
    /// # Errors
    ///
    /// * [`HeatmapError::InvalidFilter`] if the bucket token is unknown.
    ///   No store query is issued in that case.
    /// * Any error from [`Self::compute`].
    pub async fn aggregate(
        &self,
        filter: &HeatmapFilter,
    ) -> Result<Vec<ProximityResult>, HeatmapError> {
        let signature = filter.signature()?;
        self.compute(&signature).await
    }

    /// Computes one weight per stop for an already normalized signature.
    ///
    /// The result has exactly one entry per stop, in stop order.
    ///
    /// # Errors
    ///
    /// * [`HeatmapError::UpstreamUnavailable`] if the store is unreachable,
    ///   any per-stop query fails, or the store's snapshot changed under
    ///   every attempt.
    /// * [`HeatmapError::ComputeTimeout`] if a compute timeout is set and
    ///   the fan-out does not finish within it.
    pub async fn compute(
        &self,
        signature: &FilterSignature,
    ) -> Result<Vec<ProximityResult>, HeatmapError> {
        let Some(after) = self.compute_timeout else {
            return self.consistent_fan_out(signature).await;
        };

        tokio::time::timeout(after, self.consistent_fan_out(signature))
            .await
            .unwrap_or_else(|_| {
                log::error!("Heatmap computation for {signature} timed out after {after:?}");
                Err(HeatmapError::ComputeTimeout { after })
            })
    }

    async fn consistent_fan_out(
        &self,
        signature: &FilterSignature,
    ) -> Result<Vec<ProximityResult>, HeatmapError> {
        self.store.ping().await?;

        for attempt in 1..=SNAPSHOT_ATTEMPTS {
            let before = self.store.generation().await?;
            let results = self.fan_out(signature).await?;
            let after = self.store.generation().await?;

            if before == after {
                return Ok(results);
            }
            log::warn!(
                "Snapshot changed ({before} -> {after}) while computing heatmap for {signature} \
                 (attempt {attempt}/{SNAPSHOT_ATTEMPTS})"
            );
        }

        Err(HeatmapError::UpstreamUnavailable {
            message: "snapshot changed during computation".to_string(),
        })
    }

    async fn fan_out(
        &self,
        signature: &FilterSignature,
    ) -> Result<Vec<ProximityResult>, HeatmapError> {
        let start = Instant::now();

        let stops = self.store.load_stops().await?;

        log::debug!(
            "Computing heatmap for {signature} over {} stops (concurrency {})",
            stops.len(),
            self.max_concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();

        for (idx, stop) in stops.iter().enumerate() {
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&semaphore);
            let signature = signature.clone();
            let center = stop.location;

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| StoreError::unavailable(e.to_string()))?;
                let count = store
                    .count_within(center, PROXIMITY_RADIUS_M, &signature)
                    .await?;
                Ok::<_, StoreError>((idx, count))
            });
        }

        let mut weights: Vec<Option<u64>> = vec![None; stops.len()];

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((idx, count))) => {
                    if let Some(slot) = weights.get_mut(idx) {
                        *slot = Some(count);
                    }
                }
                Ok(Err(e)) => {
                    tasks.abort_all();
                    log::error!("Heatmap computation for {signature} failed: {e}");
                    return Err(e.into());
                }
                Err(e) => {
                    tasks.abort_all();
                    log::error!("Heatmap query task for {signature} did not complete: {e}");
                    return Err(HeatmapError::UpstreamUnavailable {
                        message: format!("stop query task failed: {e}"),
                    });
                }
            }
        }

        let results = stops
            .iter()
            .zip(weights)
            .map(|(stop, weight)| {
                weight
                    .map(|w| ProximityResult::for_stop(stop, w))
                    .ok_or_else(|| HeatmapError::UpstreamUnavailable {
                        message: format!("no count for stop {}", stop.stop_id),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::info!(
            "Computed heatmap for {signature}: {} stops in {:.2?}",
            results.len(),
            start.elapsed()
        );

        Ok(results)
    }
}
