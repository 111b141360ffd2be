//! Request surface over the store, aggregator and cache.

use std::sync::Arc;

use envwatch_database::IncidentStore;
use envwatch_heatmap_models::{HeatmapFilter, PROXIMITY_RADIUS_M, StopSummary};
use envwatch_incident_models::{FilterSignature, Incident};
use envwatch_transit_models::Stop;

use crate::aggregator::ProximityAggregator;
use crate::cache::{CacheLayer, CachedHeatmap};
use crate::{HeatmapConfig, HeatmapError};

/// Heatmap and per-stop queries, constructed once per process.
pub struct HeatmapService {
    store: Arc<dyn IncidentStore>,
    cache: CacheLayer,
}

impl HeatmapService {
    /// Wires an aggregator and cache over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn IncidentStore>, config: &HeatmapConfig) -> Self {
        let aggregator = Arc::new(ProximityAggregator::new(Arc::clone(&store), config));
        Self {
            store,
            cache: CacheLayer::new(aggregator, config),
        }
    }

    /// The heatmap cache.
    #[must_use]
    pub const fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    /// Returns the cached or freshly computed heatmap for `filter`.
    ///
    /// # Errors
    ///
    /// * [`HeatmapError::InvalidFilter`] for an unknown bucket token.
    /// * [`HeatmapError::UpstreamUnavailable`] or
    ///   [`HeatmapError::ComputeTimeout`] if the computation fails.
    pub async fn get_heatmap(&self, filter: &HeatmapFilter) -> Result<CachedHeatmap, HeatmapError> {
        let signature = filter.signature()?;
        self.cache.get(&signature).await
    }

    /// Warms the unfiltered heatmap once the store answers.
    ///
    /// Returns whether the heatmap was installed.
    pub async fn preload(&self) -> bool {
        if let Err(e) = self.store.ping().await {
            log::warn!("Skipping heatmap preload, store unreachable: {e}");
            return false;
        }
        self.cache.preload().await
    }

    /// Drops all cached heatmaps. Called after the store's data changes.
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }

    /// All stops in canonical order.
    ///
    /// # Errors
    ///
    /// Returns [`HeatmapError::UpstreamUnavailable`] if the store is
    /// unreachable.
    pub async fn stops(&self) -> Result<Vec<Stop>, HeatmapError> {
        Ok(self.store.load_stops().await?)
    }

    /// Schedule frequency and unfiltered nearby incident count of a stop.
    ///
    /// # Errors
    ///
    /// * [`HeatmapError::NotFound`] if no stop has this identifier.
    /// * [`HeatmapError::UpstreamUnavailable`] if the store is unreachable.
    pub async fn stop_summary(&self, stop_id: &str) -> Result<StopSummary, HeatmapError> {
        let stop = self.find_stop(stop_id).await?;
        let frequency = self.store.stop_frequency(stop_id).await?;
        let incident_count = self
            .store
            .count_within(stop.location, PROXIMITY_RADIUS_M, &FilterSignature::unfiltered())
            .await?;

        Ok(StopSummary {
            stop,
            frequency,
            incident_count,
        })
    }

    /// Incidents within the proximity radius of a stop, nearest first.
    ///
    /// # Errors
    ///
    /// * [`HeatmapError::NotFound`] if no stop has this identifier.
    /// * [`HeatmapError::UpstreamUnavailable`] if the store is unreachable.
    pub async fn incidents_near_stop(
        &self,
        stop_id: &str,
    ) -> Result<(Stop, Vec<Incident>), HeatmapError> {
        let stop = self.find_stop(stop_id).await?;
        let incidents = self
            .store
            .incidents_within(stop.location, PROXIMITY_RADIUS_M, &FilterSignature::unfiltered())
            .await?;
        Ok((stop, incidents))
    }

    /// All incidents matching `filter`, most recent first.
    ///
    /// # Errors
    ///
    /// * [`HeatmapError::InvalidFilter`] for an unknown bucket token.
    /// * [`HeatmapError::UpstreamUnavailable`] if the store is unreachable.
    pub async fn filter_incidents(
        &self,
        filter: &HeatmapFilter,
    ) -> Result<Vec<Incident>, HeatmapError> {
        let signature = filter.signature()?;
        Ok(self.store.query_incidents(&signature).await?)
    }

    async fn find_stop(&self, stop_id: &str) -> Result<Stop, HeatmapError> {
        self.store
            .load_stops()
            .await?
            .into_iter()
            .find(|s| s.stop_id == stop_id)
            .ok_or_else(|| HeatmapError::NotFound {
                stop_id: stop_id.to_string(),
            })
    }
}
