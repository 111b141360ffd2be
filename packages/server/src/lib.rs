#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Actix-Web API server for the EnvWatch stop proximity heatmap.
//!
//! Serves the heatmap, stop and incident endpoints over an in-memory
//! snapshot loaded from a `DuckDB` file. The HTTP server binds before the
//! snapshot is available; a background task loads it, warms the heatmap
//! cache, and optionally reloads it on an interval.

pub mod config;
mod handlers;
pub mod loader;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use envwatch_database::{IncidentStore, SnapshotStore};
use envwatch_heatmap::{HeatmapConfig, HeatmapService};

pub use config::ServerConfig;

/// Shared application state.
pub struct AppState {
    /// Heatmap and per-stop queries.
    pub service: Arc<HeatmapService>,
    /// The snapshot store the service reads from.
    pub store: Arc<SnapshotStore>,
}

impl AppState {
    /// Builds the service over `store`.
    #[must_use]
    pub fn new(store: Arc<SnapshotStore>, config: &HeatmapConfig) -> Self {
        let service = Arc::new(HeatmapService::new(
            Arc::clone(&store) as Arc<dyn IncidentStore>,
            config,
        ));
        Self { service, store }
    }
}

/// Registers the API routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(handlers::index)).service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/stops", web::get().to(handlers::stops))
            .route(
                "/stops/frequency/{stop_id}",
                web::get().to(handlers::stop_frequency),
            )
            .route("/heatmap", web::get().to(handlers::heatmap))
            .route(
                "/crimes/near-stop/{stop_id}",
                web::get().to(handlers::crimes_near_stop),
            )
            .route("/crimes/filter", web::get().to(handlers::crimes_filter)),
    );
}

/// Starts the EnvWatch API server.
///
/// Reads [`ServerConfig`] and [`HeatmapConfig`] from the environment,
/// spawns the snapshot loader, and runs the Actix-Web HTTP server until it
/// stops. The caller provides the async runtime (e.g. via
/// `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the HTTP server fails to bind or
/// encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let config = ServerConfig::from_env();
    let heatmap_config = HeatmapConfig::from_env();
    log::debug!("Server config: {config:?}, heatmap config: {heatmap_config:?}");

    let store = Arc::new(SnapshotStore::new());
    let state = web::Data::new(AppState::new(Arc::clone(&store), &heatmap_config));

    actix_rt::spawn(loader::run(
        store,
        Arc::clone(&state.service),
        config.db_path.clone(),
        config.refresh_interval,
    ));

    log::info!("Starting server on {}:{}", config.bind_addr, config.port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((config.bind_addr, config.port))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::test;
    use chrono::{DateTime, Utc};
    use envwatch_database::Snapshot;
    use envwatch_geography_models::Coordinate;
    use envwatch_incident_models::{Incident, TimeBucket};
    use envwatch_transit_models::{Stop, StopFrequency};
    use std::collections::BTreeMap;

    fn incident(location: Coordinate, category: &str, bucket: TimeBucket, ts: i64) -> Incident {
        Incident {
            category: category.to_string(),
            occurred_at: DateTime::<Utc>::from_timestamp(ts, 0).unwrap(),
            time_bucket: bucket,
            location,
        }
    }

    fn snapshot() -> Snapshot {
        let a = Coordinate::new(45.5000, -73.6000);
        let b = Coordinate::new(45.5200, -73.6000);
        let c = Coordinate::new(45.5400, -73.6000);
        let mut frequencies = BTreeMap::new();
        frequencies.insert(
            "A".to_string(),
            StopFrequency {
                morning: 3,
                day: 9,
                evening: 6,
            },
        );
        Snapshot::new(
            vec![Stop::new("A", a), Stop::new("B", b), Stop::new("C", c)],
            vec![
                incident(a.offset_north(100.0), "Vol", TimeBucket::Day, 100),
                incident(a.offset_north(-300.0), "Méfait", TimeBucket::Evening, 200),
                incident(c.offset_north(200.0), "Vol", TimeBucket::Morning, 300),
                incident(Coordinate::new(45.5100, -73.6000), "Vol", TimeBucket::Day, 400),
                incident(c.offset_north(700.0), "Méfait", TimeBucket::Evening, 500),
            ],
            frequencies,
        )
    }

    fn loaded_state() -> web::Data<AppState> {
        web::Data::new(AppState::new(
            Arc::new(SnapshotStore::with_snapshot(snapshot())),
            &HeatmapConfig::default(),
        ))
    }

    fn weights(body: &serde_json::Value) -> Vec<u64> {
        body.as_array()
            .unwrap()
            .iter()
            .map(|p| p["weight"].as_u64().unwrap())
            .collect()
    }

    #[actix_web::test]
    async fn heatmap_miss_then_hit() {
        let app =
            test::init_service(App::new().app_data(loaded_state()).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/heatmap").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(handlers::CACHE_HEADER).unwrap(), "MISS");
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(weights(&body), vec![2, 0, 1]);
        assert_eq!(body[0]["stopId"], "A");

        let req = test::TestRequest::get().uri("/api/heatmap").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.headers().get(handlers::CACHE_HEADER).unwrap(), "HIT");
    }

    #[actix_web::test]
    async fn heatmap_accepts_quart_alias() {
        let app =
            test::init_service(App::new().app_data(loaded_state()).configure(configure)).await;

        let req = test::TestRequest::get()
            .uri("/api/heatmap?quart=morning")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(weights(&body), vec![0, 0, 1]);
    }

    #[actix_web::test]
    async fn unknown_bucket_is_bad_request() {
        let app =
            test::init_service(App::new().app_data(loaded_state()).configure(configure)).await;

        let req = test::TestRequest::get()
            .uri("/api/heatmap?bucket=noon")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("noon"));
    }

    #[actix_web::test]
    async fn requests_before_snapshot_are_unavailable() {
        let state = web::Data::new(AppState::new(
            Arc::new(SnapshotStore::new()),
            &HeatmapConfig::default(),
        ));
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/heatmap").to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["healthy"], true);
        assert_eq!(body["snapshotLoaded"], false);
        assert!(body["snapshotLoadedAt"].is_null());
    }

    #[actix_web::test]
    async fn health_reports_snapshot_load_time() {
        let app =
            test::init_service(App::new().app_data(loaded_state()).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["snapshotLoaded"], true);
        let loaded_at = body["snapshotLoadedAt"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(loaded_at).is_ok());
    }

    #[actix_web::test]
    async fn stop_frequency_and_not_found() {
        let app =
            test::init_service(App::new().app_data(loaded_state()).configure(configure)).await;

        let req = test::TestRequest::get()
            .uri("/api/stops/frequency/A")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["stop"]["stopId"], "A");
        assert_eq!(body["frequency"]["day"], 9);
        assert_eq!(body["incidentCount"], 2);

        let req = test::TestRequest::get()
            .uri("/api/stops/frequency/nope")
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[actix_web::test]
    async fn crimes_near_stop_and_filter() {
        let app =
            test::init_service(App::new().app_data(loaded_state()).configure(configure)).await;

        let req = test::TestRequest::get()
            .uri("/api/crimes/near-stop/A")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["stop"]["stopId"], "A");
        assert_eq!(body["crimes"].as_array().unwrap().len(), 2);
        assert_eq!(body["crimes"][0]["category"], "Vol");

        let req = test::TestRequest::get()
            .uri("/api/crimes/filter?quart=evening&category=M%C3%A9fait")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let crimes = body.as_array().unwrap();
        assert_eq!(crimes.len(), 2);
        assert_eq!(crimes[0]["timeBucket"], "evening");
    }

    #[actix_web::test]
    async fn stops_and_index_redirect() {
        let app =
            test::init_service(App::new().app_data(loaded_state()).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/stops").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.as_array().unwrap().len(), 3);

        let req = test::TestRequest::get().uri("/").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers().get(actix_web::http::header::LOCATION).unwrap(),
            "/api/heatmap"
        );
    }
}
