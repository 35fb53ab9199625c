//! Areas, indicator values, and tier overlaps.
//!
//! Ingestion owns these rows; the pipeline only attaches normalized values.

use std::collections::BTreeMap;

use deso_score_indicator_models::{
    Area, AreaVulnerabilityOverlap, Indicator, IndicatorObservation, UrbanityClass,
};
use duckdb::Connection;

use crate::{DbError, parse_enum};

/// Inserts or updates an area and its boundary `GeoJSON`.
///
/// # Errors
///
/// Returns [`DbError`] if the upsert fails.
pub fn upsert_area(
    conn: &Connection,
    area: &Area,
    boundary_geojson: Option<&str>,
) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO areas (code, name, population, urbanity, boundary_geojson)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (code) DO UPDATE SET
            name = EXCLUDED.name,
            population = EXCLUDED.population,
            urbanity = EXCLUDED.urbanity,
            boundary_geojson = COALESCE(EXCLUDED.boundary_geojson, boundary_geojson)",
        duckdb::params![
            area.code,
            area.name.as_deref(),
            area.population,
            area.urbanity.as_ref().map(AsRef::<str>::as_ref),
            boundary_geojson,
        ],
    )?;
    Ok(())
}

/// Loads every known area, ordered by code.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or an urbanity class is unknown.
pub fn load_areas(conn: &Connection) -> Result<Vec<Area>, DbError> {
    let mut stmt =
        conn.prepare("SELECT code, name, population, urbanity FROM areas ORDER BY code")?;
    let mut rows = stmt.query([])?;

    let mut areas = Vec::new();
    while let Some(row) = rows.next()? {
        let urbanity: Option<String> = row.get(3)?;
        areas.push(Area {
            code: row.get(0)?,
            name: row.get(1)?,
            population: row.get(2)?,
            urbanity: urbanity
                .map(|u| parse_enum::<UrbanityClass>("urbanity", &u))
                .transpose()?,
        });
    }

    Ok(areas)
}

/// Area code -> urbanity class, for classified areas only.
///
/// # Errors
///
/// Returns [`DbError`] if the areas cannot be loaded.
pub fn urbanity_map(conn: &Connection) -> Result<BTreeMap<String, UrbanityClass>, DbError> {
    Ok(load_areas(conn)?
        .into_iter()
        .filter_map(|a| a.urbanity.map(|u| (a.code, u)))
        .collect())
}

/// Loads `(area_code, boundary_geojson)` for every area with a boundary.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn load_area_boundaries(conn: &Connection) -> Result<Vec<(String, String)>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT code, boundary_geojson FROM areas
         WHERE boundary_geojson IS NOT NULL
         ORDER BY code",
    )?;
    let mut rows = stmt.query([])?;

    let mut boundaries = Vec::new();
    while let Some(row) = rows.next()? {
        boundaries.push((row.get(0)?, row.get(1)?));
    }

    Ok(boundaries)
}

/// Upserts raw observations. A changed raw value clears any stale
/// normalized value.
///
/// # Errors
///
/// Returns [`DbError`] if any insert fails.
pub fn upsert_raw_values(
    conn: &Connection,
    observations: &[IndicatorObservation],
) -> Result<u64, DbError> {
    let mut stmt = conn.prepare(
        "INSERT INTO indicator_values (indicator_id, area_code, year, raw_value)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (indicator_id, area_code, year) DO UPDATE SET
            raw_value = EXCLUDED.raw_value,
            normalized_value = NULL",
    )?;

    let mut total = 0u64;
    for obs in observations {
        let rows = stmt.execute(duckdb::params![
            obs.indicator_id,
            obs.area_code,
            obs.year,
            obs.raw_value,
        ])?;
        total += u64::try_from(rows).unwrap_or(0);
    }

    Ok(total)
}

/// Loads all observations of one indicator for one year, ordered by area.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn load_observations(
    conn: &Connection,
    indicator_id: i64,
    year: i32,
) -> Result<Vec<IndicatorObservation>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT indicator_id, area_code, year, raw_value, normalized_value
         FROM indicator_values
         WHERE indicator_id = ? AND year = ?
         ORDER BY area_code",
    )?;
    let mut rows = stmt.query(duckdb::params![indicator_id, year])?;

    let mut observations = Vec::new();
    while let Some(row) = rows.next()? {
        observations.push(IndicatorObservation {
            indicator_id: row.get(0)?,
            area_code: row.get(1)?,
            year: row.get(2)?,
            raw_value: row.get(3)?,
            normalized_value: row.get(4)?,
        });
    }

    Ok(observations)
}

/// Writes normalized values back onto their observations.
///
/// # Errors
///
/// Returns [`DbError`] if any update fails.
pub fn write_normalized_values(
    conn: &Connection,
    observations: &[IndicatorObservation],
) -> Result<u64, DbError> {
    let mut stmt = conn.prepare(
        "UPDATE indicator_values SET normalized_value = ?
         WHERE indicator_id = ? AND area_code = ? AND year = ?",
    )?;

    let mut total = 0u64;
    for obs in observations {
        let rows = stmt.execute(duckdb::params![
            obs.normalized_value,
            obs.indicator_id,
            obs.area_code,
            obs.year,
        ])?;
        total += u64::try_from(rows).unwrap_or(0);
    }

    Ok(total)
}

/// The year in `available` closest to `target`; ties go to the earlier
/// year.
#[must_use]
pub fn closest_year(available: &[i32], target: i32) -> Option<i32> {
    available
        .iter()
        .copied()
        .min_by_key(|&y| ((i64::from(y) - i64::from(target)).abs(), y))
}

fn observed_years(conn: &Connection, indicator_id: i64) -> Result<Vec<i32>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT year FROM indicator_values
         WHERE indicator_id = ? AND raw_value IS NOT NULL
         ORDER BY year",
    )?;
    let mut rows = stmt.query([indicator_id])?;

    let mut years = Vec::new();
    while let Some(row) = rows.next()? {
        years.push(row.get(0)?);
    }
    Ok(years)
}

/// The year whose observations of `indicator_id` stand in for `year`: the
/// closest year with at least one raw value.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn source_year(
    conn: &Connection,
    indicator_id: i64,
    year: i32,
) -> Result<Option<i32>, DbError> {
    Ok(closest_year(&observed_years(conn, indicator_id)?, year))
}

/// Area code -> (indicator id -> normalized value) for scoring `year`.
///
/// Indicators with no raw values in `year` fall back to [`source_year`].
/// The values are only current if that year was normalized under the
/// present configuration first. Inactive indicators are skipped.
///
/// # Errors
///
/// Returns [`DbError`] if a query fails.
pub fn normalized_values_for_year(
    conn: &Connection,
    indicators: &[Indicator],
    year: i32,
) -> Result<BTreeMap<String, BTreeMap<i64, f64>>, DbError> {
    let mut values: BTreeMap<String, BTreeMap<i64, f64>> = BTreeMap::new();

    let mut stmt = conn.prepare(
        "SELECT area_code, normalized_value FROM indicator_values
         WHERE indicator_id = ? AND year = ? AND normalized_value IS NOT NULL",
    )?;

    for indicator in indicators.iter().filter(|i| i.is_scoreable()) {
        let Some(used_year) = source_year(conn, indicator.id, year)? else {
            log::debug!("No observations for {}", indicator.slug);
            continue;
        };
        if used_year != year {
            log::info!(
                "{}: no data for {year}, using closest year {used_year}",
                indicator.slug
            );
        }

        let mut rows = stmt.query(duckdb::params![indicator.id, used_year])?;
        while let Some(row) = rows.next()? {
            let area_code: String = row.get(0)?;
            let value: f64 = row.get(1)?;
            values.entry(area_code).or_default().insert(indicator.id, value);
        }
    }

    Ok(values)
}

/// Inserts or replaces tier overlap facts.
///
/// # Errors
///
/// Returns [`DbError`] if any insert fails.
pub fn upsert_overlaps(
    conn: &Connection,
    overlaps: &[AreaVulnerabilityOverlap],
) -> Result<(), DbError> {
    let mut stmt = conn.prepare(
        "INSERT INTO area_vulnerability_overlaps (area_code, tier, overlap_fraction)
         VALUES (?, ?, ?)
         ON CONFLICT (area_code, tier) DO UPDATE SET
            overlap_fraction = EXCLUDED.overlap_fraction",
    )?;
    for o in overlaps {
        stmt.execute(duckdb::params![o.area_code, o.tier, o.overlap_fraction])?;
    }
    Ok(())
}

/// Area code -> overlaps.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn load_overlaps(
    conn: &Connection,
) -> Result<BTreeMap<String, Vec<AreaVulnerabilityOverlap>>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT area_code, tier, overlap_fraction
         FROM area_vulnerability_overlaps
         ORDER BY area_code, tier",
    )?;
    let mut rows = stmt.query([])?;

    let mut overlaps: BTreeMap<String, Vec<AreaVulnerabilityOverlap>> = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let overlap = AreaVulnerabilityOverlap {
            area_code: row.get(0)?,
            tier: row.get(1)?,
            overlap_fraction: row.get(2)?,
        };
        overlaps
            .entry(overlap.area_code.clone())
            .or_default()
            .push(overlap);
    }

    Ok(overlaps)
}
