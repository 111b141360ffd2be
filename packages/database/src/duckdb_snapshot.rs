//! Loads a [`Snapshot`] from a `DuckDB` file.
//!
//! The file is written by the ingestion step and contains three tables:
//!
//! - `stops(stop_id, stop_code, stop_name, lat, lon)`, canonical order is
//!   insertion order
//! - `incidents(category, occurred_at, quart, lat, lon)` where `quart` is
//!   the stored time bucket label (`nuit`, `jour`, `soir`)
//! - `stop_frequencies(stop_id, morning, day, evening)` (optional)
//!
//! Rows that cannot be interpreted (unknown `quart`, unparseable timestamp)
//! are skipped and reported as a data-quality warning. Rows with missing or
//! invalid coordinates are kept here and excluded by the spatial index.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use duckdb::Connection;
use envwatch_geography_models::Coordinate;
use envwatch_incident_models::{Incident, TimeBucket};
use envwatch_transit_models::{Stop, StopFrequency};

use crate::{Snapshot, StoreError};

/// Creates the snapshot tables if they don't exist.
///
/// # Errors
///
/// Returns [`StoreError`] if schema creation fails.
pub fn create_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS stops (
            stop_id TEXT NOT NULL,
            stop_code TEXT,
            stop_name TEXT,
            lat DOUBLE,
            lon DOUBLE
        );

        CREATE TABLE IF NOT EXISTS incidents (
            category TEXT NOT NULL,
            occurred_at TIMESTAMP,
            quart TEXT,
            lat DOUBLE,
            lon DOUBLE
        );

        CREATE TABLE IF NOT EXISTS stop_frequencies (
            stop_id TEXT NOT NULL PRIMARY KEY,
            morning INTEGER NOT NULL DEFAULT 0,
            day INTEGER NOT NULL DEFAULT 0,
            evening INTEGER NOT NULL DEFAULT 0
        );",
    )?;
    Ok(())
}

/// Opens the snapshot database read-only.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if the file does not exist, or
/// [`StoreError::Database`] if it cannot be opened.
pub fn open(path: &Path) -> Result<Connection, StoreError> {
    if !path.exists() {
        return Err(StoreError::unavailable(format!(
            "snapshot database {} does not exist",
            path.display()
        )));
    }

    let conn = Connection::open_with_flags(
        path,
        duckdb::Config::default().access_mode(duckdb::AccessMode::ReadOnly)?,
    )?;
    Ok(conn)
}

/// Loads a snapshot from the `DuckDB` file at `path`.
///
/// Runs on the blocking thread pool.
///
/// # Errors
///
/// Returns [`StoreError`] if the file cannot be opened or read.
pub async fn load(path: PathBuf) -> Result<Snapshot, StoreError> {
    tokio::task::spawn_blocking(move || {
        let conn = open(&path)?;
        read_snapshot(&conn)
    })
    .await
    .map_err(|e| StoreError::unavailable(format!("snapshot load task failed: {e}")))?
}

/// Reads every snapshot table from an open connection.
///
/// # Errors
///
/// Returns [`StoreError`] if a query fails.
pub fn read_snapshot(conn: &Connection) -> Result<Snapshot, StoreError> {
    let stops = read_stops(conn)?;
    log::info!("Read {} stops", stops.len());

    let incidents = read_incidents(conn)?;
    log::info!("Read {} incidents", incidents.len());

    let frequencies = if table_exists(conn, "stop_frequencies")? {
        read_frequencies(conn)?
    } else {
        log::warn!("No stop_frequencies table, stop frequencies will be unavailable");
        BTreeMap::new()
    };

    Ok(Snapshot::new(stops, incidents, frequencies))
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn read_stops(conn: &Connection) -> Result<Vec<Stop>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT stop_id, stop_code, stop_name, lat, lon FROM stops ORDER BY rowid")?;
    let mut rows = stmt.query([])?;
    let mut stops = Vec::new();

    while let Some(row) = rows.next()? {
        let stop_id: String = row.get(0)?;
        if stop_id.is_empty() {
            continue;
        }
        let lat: Option<f64> = row.get(3)?;
        let lon: Option<f64> = row.get(4)?;

        stops.push(Stop {
            stop_id,
            stop_code: row.get(1)?,
            stop_name: row.get(2)?,
            location: Coordinate::new(lat.unwrap_or(f64::NAN), lon.unwrap_or(f64::NAN)),
        });
    }

    Ok(stops)
}

fn read_incidents(conn: &Connection) -> Result<Vec<Incident>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT category, occurred_at::TEXT, quart, lat, lon FROM incidents")?;
    let mut rows = stmt.query([])?;
    let mut incidents = Vec::new();
    let mut unknown_bucket = 0usize;
    let mut bad_timestamp = 0usize;

    while let Some(row) = rows.next()? {
        let category: String = row.get(0)?;
        let occurred_at: Option<String> = row.get(1)?;
        let quart: Option<String> = row.get(2)?;
        let lat: Option<f64> = row.get(3)?;
        let lon: Option<f64> = row.get(4)?;

        let Some(time_bucket) = quart
            .as_deref()
            .and_then(|q| TimeBucket::from_stored_label(q).ok())
        else {
            log::debug!("Skipping incident with unknown quart {quart:?}");
            unknown_bucket += 1;
            continue;
        };

        let Some(occurred_at) = occurred_at.as_deref().and_then(parse_timestamp) else {
            bad_timestamp += 1;
            continue;
        };

        incidents.push(Incident {
            category,
            occurred_at,
            time_bucket,
            location: Coordinate::new(lat.unwrap_or(f64::NAN), lon.unwrap_or(f64::NAN)),
        });
    }

    if unknown_bucket > 0 {
        log::warn!("Skipped {unknown_bucket} incidents with an unknown time bucket label");
    }
    if bad_timestamp > 0 {
        log::warn!("Skipped {bad_timestamp} incidents with a missing or unparseable timestamp");
    }

    Ok(incidents)
}

fn read_frequencies(conn: &Connection) -> Result<BTreeMap<String, StopFrequency>, StoreError> {
    let mut stmt = conn.prepare("SELECT stop_id, morning, day, evening FROM stop_frequencies")?;
    let mut rows = stmt.query([])?;
    let mut map = BTreeMap::new();

    while let Some(row) = rows.next()? {
        let stop_id: String = row.get(0)?;
        let morning: i64 = row.get(1)?;
        let day: i64 = row.get(2)?;
        let evening: i64 = row.get(3)?;

        map.insert(
            stop_id,
            StopFrequency {
                morning: to_count(morning),
                day: to_count(day),
                evening: to_count(evening),
            },
        );
    }

    Ok(map)
}

fn to_count(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

/// Parses a `DuckDB` timestamp text representation into a UTC `DateTime`.
///
/// `DuckDB`'s `::TEXT` cast can produce several formats depending on the
/// column type and stored precision:
/// - `2024-01-15` (`DATE` columns)
/// - `2024-01-15 10:30:00` (no fractional seconds)
/// - `2024-01-15 10:30:00.123` (fractional seconds)
/// - `2024-01-15 10:30:00+00` (with timezone)
/// - `2024-01-15 10:30:00.123+00` (both)
///
/// This function tries them in order and returns the first successful parse.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }

    // Fall back to naive (no timezone), assume UTC
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
    }
    if let Some(naive) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
    }

    log::debug!("Failed to parse timestamp: {s:?}");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IncidentStore as _, SnapshotStore};
    use envwatch_incident_models::FilterSignature;

    fn seeded_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO stops VALUES
                ('S2', '52', 'Berri-UQAM', 45.5150, -73.5610),
                ('S1', '51', 'Place-des-Arts', 45.5080, -73.5690),
                ('', NULL, 'blank id', 45.0, -73.0);

             INSERT INTO incidents VALUES
                ('Vol', '2024-01-15 10:30:00', 'jour', 45.5151, -73.5611),
                ('Méfait', '2024-01-16 22:00:00', 'soir', 45.5081, -73.5691),
                ('Vol', '2024-01-17 03:00:00', 'nuit', NULL, NULL),
                ('Vol', '2024-01-18 03:00:00', 'matin', 45.5150, -73.5610),
                ('Vol', NULL, 'jour', 45.5150, -73.5610);

             INSERT INTO stop_frequencies VALUES ('S1', 10, 20, 30);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn parses_duckdb_timestamp_variants() {
        let expected = DateTime::parse_from_rfc3339("2024-01-15T10:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parse_timestamp("2024-01-15 10:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15 10:30:00+00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15 12:30:00+02"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15T10:30:00Z"), Some(expected));
        assert!(parse_timestamp("2024-01-15 10:30:00.123").is_some());
        assert!(parse_timestamp("2024-01-15 10:30:00.123+00").is_some());

        let midnight = parse_timestamp("2024-01-15").unwrap();
        assert_eq!(midnight.to_rfc3339(), "2024-01-15T00:00:00+00:00");

        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn negative_counts_clamp_to_zero() {
        assert_eq!(to_count(-4), 0);
        assert_eq!(to_count(12), 12);
    }

    #[tokio::test]
    async fn reads_snapshot_tables() {
        let conn = seeded_connection();
        let store = SnapshotStore::with_snapshot(read_snapshot(&conn).unwrap());

        let stops = store.load_stops().await.unwrap();
        let ids: Vec<&str> = stops.iter().map(|s| s.stop_id.as_str()).collect();
        assert_eq!(ids, vec!["S2", "S1"]);
        assert_eq!(stops[0].stop_name.as_deref(), Some("Berri-UQAM"));

        let snapshot = store.current().unwrap();
        // unknown quart and NULL timestamp rows are dropped while reading,
        // the NULL coordinate row is dropped by the index
        assert_eq!(snapshot.incidents().len(), 2);
        assert_eq!(snapshot.incidents().excluded(), 1);

        let freq = store.stop_frequency("S1").await.unwrap().unwrap();
        assert_eq!((freq.morning, freq.day, freq.evening), (10, 20, 30));
    }

    #[tokio::test]
    async fn counts_after_loading() {
        let conn = seeded_connection();
        let store = SnapshotStore::with_snapshot(read_snapshot(&conn).unwrap());
        let stops = store.load_stops().await.unwrap();

        let all = FilterSignature::unfiltered();
        let near_berri = store
            .count_within(stops[0].location, 500.0, &all)
            .await
            .unwrap();
        assert_eq!(near_berri, 1);

        let evening = FilterSignature::from_tokens(Some("evening"), None).unwrap();
        let near_pda = store
            .count_within(stops[1].location, 500.0, &evening)
            .await
            .unwrap();
        assert_eq!(near_pda, 1);
    }

    #[test]
    fn missing_frequencies_table_is_tolerated() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE stops (stop_id TEXT, stop_code TEXT, stop_name TEXT, lat DOUBLE, lon DOUBLE);
             CREATE TABLE incidents (category TEXT, occurred_at TIMESTAMP, quart TEXT, lat DOUBLE, lon DOUBLE);
             INSERT INTO stops VALUES ('S1', NULL, NULL, 45.5, -73.5);",
        )
        .unwrap();
        let snapshot = read_snapshot(&conn).unwrap();
        assert_eq!(snapshot.stops().len(), 1);
    }

    #[tokio::test]
    async fn load_missing_file_is_unavailable() {
        let path = std::env::temp_dir().join("envwatch-does-not-exist.duckdb");
        let err = load(path).await.err().unwrap();
        assert!(matches!(err, StoreError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn load_from_file() {
        let path = std::env::temp_dir().join(format!(
            "envwatch-snapshot-test-{}.duckdb",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        {
            let conn = Connection::open(&path).unwrap();
            create_schema(&conn).unwrap();
            conn.execute_batch(
                "INSERT INTO stops VALUES ('S1', NULL, 'Jean-Talon', 45.5390, -73.6140);
                 INSERT INTO incidents VALUES ('Vol', '2024-02-01', 'jour', 45.5391, -73.6141);",
            )
            .unwrap();
        }

        let snapshot = load(path.clone()).await.unwrap();
        assert_eq!(snapshot.stops().len(), 1);
        assert_eq!(snapshot.incidents().len(), 1);
        assert_eq!(snapshot.stops()[0].stop_id, "S1");

        let _ = std::fs::remove_file(&path);
    }
}
