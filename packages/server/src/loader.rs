//! Background snapshot loading and refresh.
//!
//! The server starts with an empty [`SnapshotStore`] and answers 503 until
//! the first snapshot is installed. Loading retries with exponential
//! backoff until the database file can be read, then warms the heatmap
//! cache. With a refresh interval, the file is reloaded periodically and
//! the cache is invalidated after every successful reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use envwatch_database::{Snapshot, SnapshotStore, StoreError, duckdb_snapshot};
use envwatch_heatmap::HeatmapService;

/// Delay before the second load attempt.
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);

/// Upper bound on the delay between load attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Loads the snapshot at `path`, retrying until it succeeds.
pub async fn load_with_backoff(path: &Path) -> Snapshot {
    retry_with_backoff(path, || duckdb_snapshot::load(path.to_path_buf())).await
}

/// Calls `load` until it succeeds, sleeping [`INITIAL_BACKOFF`] after the
/// first failure and doubling up to [`MAX_BACKOFF`].
async fn retry_with_backoff<F, Fut>(path: &Path, mut load: F) -> Snapshot
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Snapshot, StoreError>>,
{
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt: u32 = 1;

    loop {
        match load().await {
            Ok(snapshot) => {
                if attempt > 1 {
                    log::info!("Snapshot loaded after {attempt} attempts");
                }
                return snapshot;
            }
            Err(e) => {
                log::warn!(
                    "Snapshot load attempt {attempt} from {} failed: {e}, retrying in {backoff:?}",
                    path.display()
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

/// Installs the first snapshot, preloads the cache, then keeps the
/// snapshot fresh if `refresh_interval` is set.
pub async fn run(
    store: Arc<SnapshotStore>,
    service: Arc<HeatmapService>,
    path: PathBuf,
    refresh_interval: Option<Duration>,
) {
    log::info!("Loading snapshot from {}", path.display());
    store.install(load_with_backoff(&path).await);
    service.preload().await;

    let Some(every) = refresh_interval else {
        return;
    };

    log::info!("Refreshing snapshot every {every:?}");
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        match duckdb_snapshot::load(path.clone()).await {
            Ok(snapshot) => {
                store.install(snapshot);
                service.invalidate();
                service.preload().await;
            }
            Err(e) => {
                log::error!("Snapshot refresh failed, keeping current snapshot: {e}");
            }
        }
    }
}
