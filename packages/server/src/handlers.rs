//! HTTP handler functions for the EnvWatch API.

use actix_web::http::header;
use actix_web::{HttpResponse, web};
use envwatch_heatmap::HeatmapError;
use envwatch_heatmap_models::HeatmapFilter;
use envwatch_server_models::{ApiError, ApiHealth, FilterQueryParams, NearStopResponse};

use crate::AppState;

/// Response header reporting whether a heatmap came from the cache.
pub const CACHE_HEADER: &str = "X-Cache";

/// `GET /`
///
/// Redirects to the heatmap.
pub async fn index() -> HttpResponse {
    HttpResponse::Found()
        .insert_header((header::LOCATION, "/api/heatmap"))
        .finish()
}

/// `GET /api/health`
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let loaded_at = state.store.current().ok().map(|s| s.loaded_at());

    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        snapshot_loaded: loaded_at.is_some(),
        snapshot_loaded_at: loaded_at,
    })
}

/// `GET /api/stops`
///
/// Lists every stop in canonical order.
pub async fn stops(state: web::Data<AppState>) -> HttpResponse {
    match state.service.stops().await {
        Ok(stops) => HttpResponse::Ok().json(stops),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/heatmap`
///
/// Returns one weighted point per stop. Accepts `bucket` (or `quart`) and
/// `category` filters.
pub async fn heatmap(
    state: web::Data<AppState>,
    params: web::Query<FilterQueryParams>,
) -> HttpResponse {
    let filter = HeatmapFilter::from(params.into_inner());

    match state.service.get_heatmap(&filter).await {
        Ok(heatmap) => HttpResponse::Ok()
            .insert_header((CACHE_HEADER, if heatmap.from_cache { "HIT" } else { "MISS" }))
            .json(&*heatmap.results),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/stops/frequency/{stop_id}`
///
/// Returns the stop's schedule frequency and nearby incident count.
pub async fn stop_frequency(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    match state.service.stop_summary(&path).await {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/crimes/near-stop/{stop_id}`
///
/// Returns the incidents within the proximity radius of a stop, nearest
/// first.
pub async fn crimes_near_stop(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    match state.service.incidents_near_stop(&path).await {
        Ok((stop, crimes)) => HttpResponse::Ok().json(NearStopResponse { stop, crimes }),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/crimes/filter`
///
/// Returns incidents matching `bucket` (or `quart`) and `category`, most
/// recent first.
pub async fn crimes_filter(
    state: web::Data<AppState>,
    params: web::Query<FilterQueryParams>,
) -> HttpResponse {
    let filter = HeatmapFilter::from(params.into_inner());

    match state.service.filter_incidents(&filter).await {
        Ok(incidents) => HttpResponse::Ok().json(incidents),
        Err(e) => error_response(&e),
    }
}

/// Maps a [`HeatmapError`] to its HTTP status with a JSON error body.
fn error_response(e: &HeatmapError) -> HttpResponse {
    let body = ApiError::new(e.to_string());

    match e {
        HeatmapError::NotFound { .. } => HttpResponse::NotFound().json(body),
        HeatmapError::InvalidFilter { .. } => HttpResponse::BadRequest().json(body),
        HeatmapError::UpstreamUnavailable { .. } | HeatmapError::ComputeTimeout { .. } => {
            log::error!("Request failed: {e}");
            HttpResponse::ServiceUnavailable().json(body)
        }
    }
}
