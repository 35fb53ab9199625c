//! Area-to-cell mapping and projected hex scores.

use deso_score_spatial_models::{AreaCell, BoundingBox, HexCellScore, HexScoreValue, ScoreField};
use duckdb::Connection;

use crate::{DbError, h3_from_db, h3_to_db, with_transaction};

/// Replaces the whole area-to-cell mapping.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails; the old mapping is kept then.
pub fn replace_area_cells(conn: &Connection, cells: &[AreaCell]) -> Result<u64, DbError> {
    with_transaction(conn, |tx| {
        tx.execute("DELETE FROM area_cells", [])?;

        let mut stmt = tx.prepare(
            "INSERT INTO area_cells (h3_index, area_code, area_weight) VALUES (?, ?, ?)",
        )?;
        let mut total = 0u64;
        for cell in cells {
            let rows = stmt.execute(duckdb::params![
                h3_to_db(cell.h3_index),
                cell.area_code,
                cell.area_weight,
            ])?;
            total += u64::try_from(rows).unwrap_or(0);
        }

        log::info!("Stored {total} area-cell rows");
        Ok(total)
    })
}

/// Loads the area-to-cell mapping, ordered by cell then area.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn load_area_cells(conn: &Connection) -> Result<Vec<AreaCell>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT h3_index, area_code, area_weight FROM area_cells
         ORDER BY h3_index, area_code",
    )?;
    let mut rows = stmt.query([])?;

    let mut cells = Vec::new();
    while let Some(row) = rows.next()? {
        let h3: i64 = row.get(0)?;
        cells.push(AreaCell {
            h3_index: h3_from_db(h3),
            area_code: row.get(1)?,
            area_weight: row.get(2)?,
        });
    }
    Ok(cells)
}

/// Replaces every hex row of `year` in one transaction, so readers see
/// either the old projection or the new one.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails; the old rows are kept then.
pub fn replace_hex_scores(
    conn: &Connection,
    year: i32,
    scores: &[HexCellScore],
) -> Result<u64, DbError> {
    with_transaction(conn, |tx| {
        tx.execute("DELETE FROM hex_scores WHERE year = ?", [year])?;

        let mut stmt = tx.prepare(
            "INSERT INTO hex_scores (
                h3_index, resolution, year, score_raw, score_smoothed,
                smoothing_factor, trend_1y, primary_area_code, score_version_id,
                center_lng, center_lat
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;

        let mut total = 0u64;
        for s in scores {
            if s.year != year {
                return Err(DbError::Conversion {
                    message: format!("hex row for {} in a {year} projection", s.year),
                });
            }
            let rows = stmt.execute(duckdb::params![
                h3_to_db(s.h3_index),
                i32::from(s.resolution),
                s.year,
                s.score_raw,
                s.score_smoothed,
                s.smoothing_factor,
                s.trend_1y,
                s.primary_area_code.as_deref(),
                s.score_version_id,
                s.center_lng,
                s.center_lat,
            ])?;
            total += u64::try_from(rows).unwrap_or(0);
        }

        Ok(total)
    })
}

/// Loads every hex row of a year at one resolution, ordered by cell.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn load_hex_scores(
    conn: &Connection,
    year: i32,
    resolution: u8,
) -> Result<Vec<HexCellScore>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT h3_index, resolution, year, score_raw, score_smoothed,
                smoothing_factor, trend_1y, primary_area_code, score_version_id,
                center_lng, center_lat
         FROM hex_scores
         WHERE year = ? AND resolution = ?
         ORDER BY h3_index",
    )?;
    let mut rows = stmt.query(duckdb::params![year, i32::from(resolution)])?;

    let mut scores = Vec::new();
    while let Some(row) = rows.next()? {
        let h3: i64 = row.get(0)?;
        let res: i32 = row.get(1)?;
        scores.push(HexCellScore {
            h3_index: h3_from_db(h3),
            resolution: u8::try_from(res).map_err(|_| DbError::Conversion {
                message: format!("invalid resolution {res}"),
            })?,
            year: row.get(2)?,
            score_raw: row.get(3)?,
            score_smoothed: row.get(4)?,
            smoothing_factor: row.get(5)?,
            trend_1y: row.get(6)?,
            primary_area_code: row.get(7)?,
            score_version_id: row.get(8)?,
            center_lng: row.get(9)?,
            center_lat: row.get(10)?,
        });
    }
    Ok(scores)
}

/// Viewport query: cells of one year and resolution whose center lies in
/// `bbox`, with the requested score column. Cells without a value for that
/// column are left out.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn hex_scores_in_bbox(
    conn: &Connection,
    year: i32,
    resolution: u8,
    bbox: &BoundingBox,
    field: ScoreField,
) -> Result<Vec<HexScoreValue>, DbError> {
    let column = field.column();
    let mut stmt = conn.prepare(&format!(
        "SELECT h3_index, {column}, trend_1y
         FROM hex_scores
         WHERE year = ? AND resolution = ?
           AND center_lng BETWEEN ? AND ?
           AND center_lat BETWEEN ? AND ?
           AND {column} IS NOT NULL
         ORDER BY h3_index"
    ))?;
    let mut rows = stmt.query(duckdb::params![
        year,
        i32::from(resolution),
        bbox.west,
        bbox.east,
        bbox.south,
        bbox.north,
    ])?;

    let mut values = Vec::new();
    while let Some(row) = rows.next()? {
        let h3: i64 = row.get(0)?;
        values.push(HexScoreValue {
            h3_index: h3_from_db(h3),
            score: row.get(1)?,
            trend_1y: row.get(2)?,
        });
    }
    Ok(values)
}
