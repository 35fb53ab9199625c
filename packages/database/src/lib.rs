#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! `DuckDB` persistence for the scoring pipeline.
//!
//! One `DuckDB` file (default `data/deso_score.duckdb`, override with
//! `DESO_SCORE_DB`) holds every table the stages hand data through:
//! configuration, raw and normalized indicator values, score versions with
//! their composite scores, the area-to-cell mapping, and projected hex
//! scores. JSON payloads and timestamps are stored as TEXT.

pub mod areas_db;
pub mod config_db;
pub mod hex_db;
pub mod paths;
pub mod runs_db;
pub mod versions_db;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use duckdb::Connection;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// JSON column (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error while preparing the data directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// Opens (or creates) the scoring `DuckDB` and ensures the schema exists.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open(path: &Path) -> Result<Connection, DbError> {
    if let Some(parent) = path.parent() {
        paths::ensure_dir(parent)?;
    }

    let conn = Connection::open(path)?;

    conn.execute_batch(
        "SET threads = 4;
         SET memory_limit = '1GB';",
    )?;

    create_schema(&conn)?;

    log::debug!("Opened {}", path.display());

    Ok(conn)
}

/// Opens the database at [`paths::db_path`].
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open_default() -> Result<Connection, DbError> {
    open(&paths::db_path())
}

/// Opens a throwaway in-memory database with the full schema.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open_in_memory() -> Result<Connection, DbError> {
    let conn = Connection::open_in_memory()?;
    create_schema(&conn)?;
    Ok(conn)
}

#[allow(clippy::too_many_lines)]
fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS areas (
            code TEXT PRIMARY KEY,
            name TEXT,
            population BIGINT,
            urbanity TEXT,
            boundary_geojson TEXT
        );

        CREATE SEQUENCE IF NOT EXISTS indicators_id_seq START 1;

        CREATE TABLE IF NOT EXISTS indicators (
            id BIGINT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            direction TEXT NOT NULL,
            weight DOUBLE NOT NULL,
            normalization TEXT NOT NULL,
            normalization_scope TEXT NOT NULL,
            is_active BOOLEAN NOT NULL
        );

        CREATE TABLE IF NOT EXISTS indicator_values (
            indicator_id BIGINT NOT NULL,
            area_code TEXT NOT NULL,
            year INTEGER NOT NULL,
            raw_value DOUBLE,
            normalized_value DOUBLE,
            PRIMARY KEY (indicator_id, area_code, year)
        );

        CREATE SEQUENCE IF NOT EXISTS score_penalties_id_seq START 1;

        CREATE TABLE IF NOT EXISTS score_penalties (
            id BIGINT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            penalty_type TEXT NOT NULL,
            magnitude DOUBLE NOT NULL,
            tier TEXT NOT NULL,
            display_order INTEGER NOT NULL,
            is_active BOOLEAN NOT NULL
        );

        CREATE TABLE IF NOT EXISTS area_vulnerability_overlaps (
            area_code TEXT NOT NULL,
            tier TEXT NOT NULL,
            overlap_fraction DOUBLE NOT NULL,
            PRIMARY KEY (area_code, tier)
        );

        CREATE TABLE IF NOT EXISTS sentinel_areas (
            area_code TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            expected_score_min DOUBLE NOT NULL,
            expected_score_max DOUBLE NOT NULL,
            expected_tier TEXT,
            is_active BOOLEAN NOT NULL
        );

        CREATE TABLE IF NOT EXISTS smoothing_configs (
            name TEXT PRIMARY KEY,
            self_weight DOUBLE NOT NULL,
            neighbor_weight DOUBLE NOT NULL,
            k_rings INTEGER NOT NULL,
            decay_function TEXT NOT NULL,
            decay_base DOUBLE NOT NULL,
            is_active BOOLEAN NOT NULL
        );

        CREATE SEQUENCE IF NOT EXISTS score_versions_id_seq START 1;

        CREATE TABLE IF NOT EXISTS score_versions (
            id BIGINT PRIMARY KEY,
            year INTEGER NOT NULL,
            status TEXT NOT NULL,
            indicators_used TEXT NOT NULL,
            validation TEXT,
            area_count BIGINT NOT NULL DEFAULT 0,
            mean_score DOUBLE,
            stddev_score DOUBLE,
            computed_by TEXT NOT NULL,
            notes TEXT,
            computed_at TEXT NOT NULL,
            published_at TEXT
        );

        CREATE TABLE IF NOT EXISTS composite_scores (
            score_version_id BIGINT NOT NULL,
            area_code TEXT NOT NULL,
            year INTEGER NOT NULL,
            score DOUBLE,
            raw_score_before_penalties DOUBLE,
            trend_1y DOUBLE,
            factor_scores TEXT NOT NULL,
            top_positive TEXT NOT NULL,
            top_negative TEXT NOT NULL,
            penalties_applied TEXT NOT NULL,
            PRIMARY KEY (score_version_id, area_code)
        );

        CREATE TABLE IF NOT EXISTS area_cells (
            h3_index BIGINT NOT NULL,
            area_code TEXT NOT NULL,
            area_weight DOUBLE NOT NULL
        );

        CREATE TABLE IF NOT EXISTS hex_scores (
            h3_index BIGINT NOT NULL,
            resolution INTEGER NOT NULL,
            year INTEGER NOT NULL,
            score_raw DOUBLE,
            score_smoothed DOUBLE,
            smoothing_factor DOUBLE NOT NULL,
            trend_1y DOUBLE,
            primary_area_code TEXT,
            score_version_id BIGINT NOT NULL,
            center_lng DOUBLE NOT NULL,
            center_lat DOUBLE NOT NULL
        );

        CREATE INDEX IF NOT EXISTS hex_scores_year_res_idx
            ON hex_scores (year, resolution);

        CREATE TABLE IF NOT EXISTS score_runs (
            year INTEGER PRIMARY KEY,
            run_id TEXT NOT NULL,
            started_at TEXT NOT NULL
        );",
    )?;

    Ok(())
}

/// Runs `f` inside `BEGIN TRANSACTION` / `COMMIT`, rolling back if `f` (or
/// the commit) fails.
///
/// # Errors
///
/// Returns whatever `f` returns, or [`DbError`] if the transaction cannot be
/// started or committed.
pub fn with_transaction<T, E, F>(conn: &Connection, f: F) -> Result<T, E>
where
    F: FnOnce(&Connection) -> Result<T, E>,
    E: From<DbError>,
{
    conn.execute_batch("BEGIN TRANSACTION")
        .map_err(|e| E::from(DbError::from(e)))?;

    let result = f(conn).and_then(|value| {
        conn.execute_batch("COMMIT")
            .map_err(|e| E::from(DbError::from(e)))?;
        Ok(value)
    });

    if result.is_err()
        && let Err(e) = conn.execute_batch("ROLLBACK")
    {
        log::debug!("ROLLBACK after failed transaction: {e}");
    }

    result
}

/// Formats a timestamp for a TEXT column.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a timestamp written by [`format_timestamp`].
///
/// # Errors
///
/// Returns [`DbError::Conversion`] if the text is not RFC 3339.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DbError::Conversion {
            message: format!("invalid timestamp {text:?}: {e}"),
        })
}

/// Parses a TEXT enum column.
///
/// # Errors
///
/// Returns [`DbError::Conversion`] if the value is not a known variant.
pub fn parse_enum<T>(column: &str, text: &str) -> Result<T, DbError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    text.parse::<T>().map_err(|e| DbError::Conversion {
        message: format!("invalid {column} {text:?}: {e}"),
    })
}

/// Converts an H3 index to the signed form stored in BIGINT columns.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub const fn h3_to_db(h3_index: u64) -> i64 {
    h3_index as i64
}

/// Converts a stored BIGINT back to an H3 index.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub const fn h3_from_db(value: i64) -> u64 {
    value as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let conn = open_in_memory().unwrap();
        create_schema(&conn).unwrap();
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let conn = open_in_memory().unwrap();

        let result: Result<(), DbError> = with_transaction(&conn, |tx| {
            tx.execute(
                "INSERT INTO score_runs (year, run_id, started_at) VALUES (2024, 'a', 'now')",
                [],
            )?;
            Err(DbError::Conversion {
                message: "boom".to_string(),
            })
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM score_runs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn timestamps_round_trip() {
        let now = Utc::now();
        let parsed = parse_timestamp(&format_timestamp(&now)).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn h3_indexes_survive_signed_storage() {
        let cell = 0x8808_8b4b_6dff_ffff_u64;
        assert_eq!(h3_from_db(h3_to_db(cell)), cell);
    }
}
