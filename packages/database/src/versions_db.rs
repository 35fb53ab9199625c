//! Score versions and their composite scores.
//!
//! Composite score rows are insert-only. Version rows only change status,
//! validation, stats, notes, and `published_at`; status changes are decided
//! by the version manager and merely recorded here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use deso_score_scoring_models::CompositeScore;
use deso_score_version_models::{
    IndicatorSnapshot, ScoreVersion, ValidationReport, VersionStats, VersionStatus,
};
use duckdb::Connection;

use crate::{DbError, format_timestamp, parse_enum, parse_timestamp};

const VERSION_COLUMNS: &str = "id, year, status, indicators_used, validation, area_count,
    mean_score, stddev_score, computed_by, notes, computed_at, published_at";

/// Allocates the next version id without inserting a row.
///
/// # Errors
///
/// Returns [`DbError`] if the sequence cannot be read.
pub fn next_version_id(conn: &Connection) -> Result<i64, DbError> {
    Ok(conn.query_row("SELECT nextval('score_versions_id_seq')", [], |row| {
        row.get(0)
    })?)
}

/// Inserts a new `pending` version and returns its id.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub fn insert_version(
    conn: &Connection,
    year: i32,
    indicators_used: &[IndicatorSnapshot],
    computed_by: &str,
    computed_at: &DateTime<Utc>,
) -> Result<i64, DbError> {
    let id = next_version_id(conn)?;
    insert_version_with_id(conn, id, year, indicators_used, computed_by, computed_at)?;
    Ok(id)
}

/// Inserts a `pending` version under an id from [`next_version_id`].
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub fn insert_version_with_id(
    conn: &Connection,
    id: i64,
    year: i32,
    indicators_used: &[IndicatorSnapshot],
    computed_by: &str,
    computed_at: &DateTime<Utc>,
) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO score_versions (
            id, year, status, indicators_used, computed_by, computed_at
         ) VALUES (?, ?, ?, ?, ?, ?)",
        duckdb::params![
            id,
            year,
            VersionStatus::Pending.as_ref(),
            serde_json::to_string(indicators_used)?,
            computed_by,
            format_timestamp(computed_at),
        ],
    )?;

    Ok(())
}

fn version_from_row(row: &duckdb::Row<'_>) -> Result<ScoreVersion, DbError> {
    let status: String = row.get(2)?;
    let indicators_used: String = row.get(3)?;
    let validation: Option<String> = row.get(4)?;
    let area_count: i64 = row.get(5)?;
    let computed_at: String = row.get(10)?;
    let published_at: Option<String> = row.get(11)?;

    Ok(ScoreVersion {
        id: row.get(0)?,
        year: row.get(1)?,
        status: parse_enum("status", &status)?,
        indicators_used: serde_json::from_str(&indicators_used)?,
        validation: validation
            .map(|v| serde_json::from_str::<ValidationReport>(&v))
            .transpose()?,
        stats: VersionStats {
            area_count: u64::try_from(area_count).unwrap_or(0),
            mean_score: row.get(6)?,
            stddev_score: row.get(7)?,
        },
        computed_by: row.get(8)?,
        notes: row.get(9)?,
        computed_at: parse_timestamp(&computed_at)?,
        published_at: published_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn query_versions(
    conn: &Connection,
    filter: &str,
    params: &[&dyn duckdb::ToSql],
) -> Result<Vec<ScoreVersion>, DbError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {VERSION_COLUMNS} FROM score_versions WHERE {filter} ORDER BY id DESC"
    ))?;
    let mut rows = stmt.query(params)?;

    let mut versions = Vec::new();
    while let Some(row) = rows.next()? {
        versions.push(version_from_row(row)?);
    }
    Ok(versions)
}

/// Loads one version.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or the row is malformed.
pub fn get_version(conn: &Connection, id: i64) -> Result<Option<ScoreVersion>, DbError> {
    Ok(query_versions(conn, "id = ?", &[&id])?.into_iter().next())
}

/// All versions of a year, newest first.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a row is malformed.
pub fn list_versions(conn: &Connection, year: i32) -> Result<Vec<ScoreVersion>, DbError> {
    query_versions(conn, "year = ?", &[&year])
}

/// Versions of a year in the given status, newest first.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a row is malformed.
pub fn versions_with_status(
    conn: &Connection,
    year: i32,
    status: VersionStatus,
) -> Result<Vec<ScoreVersion>, DbError> {
    query_versions(conn, "year = ? AND status = ?", &[&year, &status.as_ref()])
}

/// Records a status change. `published_at` is only overwritten when given.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails or the version does not exist.
pub fn set_status(
    conn: &Connection,
    id: i64,
    status: VersionStatus,
    published_at: Option<&DateTime<Utc>>,
) -> Result<(), DbError> {
    let rows = conn.execute(
        "UPDATE score_versions
         SET status = ?, published_at = COALESCE(?, published_at)
         WHERE id = ?",
        duckdb::params![status.as_ref(), published_at.map(format_timestamp), id],
    )?;

    if rows == 0 {
        return Err(DbError::Conversion {
            message: format!("score version {id} does not exist"),
        });
    }
    Ok(())
}

/// Stores a validation report on a version.
///
/// # Errors
///
/// Returns [`DbError`] if serialization or the update fails.
pub fn set_validation(
    conn: &Connection,
    id: i64,
    report: &ValidationReport,
) -> Result<(), DbError> {
    conn.execute(
        "UPDATE score_versions SET validation = ? WHERE id = ?",
        duckdb::params![serde_json::to_string(report)?, id],
    )?;
    Ok(())
}

/// Stores summary statistics on a version.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub fn set_stats(conn: &Connection, id: i64, stats: &VersionStats) -> Result<(), DbError> {
    conn.execute(
        "UPDATE score_versions
         SET area_count = ?, mean_score = ?, stddev_score = ?
         WHERE id = ?",
        duckdb::params![
            i64::try_from(stats.area_count).unwrap_or(i64::MAX),
            stats.mean_score,
            stats.stddev_score,
            id,
        ],
    )?;
    Ok(())
}

/// Appends a line to a version's notes.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub fn append_note(conn: &Connection, id: i64, note: &str) -> Result<(), DbError> {
    conn.execute(
        "UPDATE score_versions
         SET notes = CASE WHEN notes IS NULL THEN ? ELSE notes || chr(10) || ? END
         WHERE id = ?",
        duckdb::params![note, note, id],
    )?;
    Ok(())
}

/// Inserts composite score rows.
///
/// # Errors
///
/// Returns [`DbError`] if serialization or any insert fails.
pub fn insert_composite_scores(
    conn: &Connection,
    scores: &[CompositeScore],
) -> Result<u64, DbError> {
    let mut stmt = conn.prepare(
        "INSERT INTO composite_scores (
            score_version_id, area_code, year, score, raw_score_before_penalties,
            trend_1y, factor_scores, top_positive, top_negative, penalties_applied
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )?;

    let mut total = 0u64;
    for score in scores {
        let rows = stmt.execute(duckdb::params![
            score.score_version_id,
            score.area_code,
            score.year,
            score.score,
            score.raw_score_before_penalties,
            score.trend_1y,
            serde_json::to_string(&score.factor_scores)?,
            serde_json::to_string(&score.top_positive)?,
            serde_json::to_string(&score.top_negative)?,
            serde_json::to_string(&score.penalties_applied)?,
        ])?;
        total += u64::try_from(rows).unwrap_or(0);
    }

    Ok(total)
}

/// Loads every composite score of a version, ordered by area code.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a JSON column is malformed.
pub fn load_composite_scores(
    conn: &Connection,
    version_id: i64,
) -> Result<Vec<CompositeScore>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT score_version_id, area_code, year, score, raw_score_before_penalties,
                trend_1y, factor_scores, top_positive, top_negative, penalties_applied
         FROM composite_scores
         WHERE score_version_id = ?
         ORDER BY area_code",
    )?;
    let mut rows = stmt.query([version_id])?;

    let mut scores = Vec::new();
    while let Some(row) = rows.next()? {
        let factor_scores: String = row.get(6)?;
        let top_positive: String = row.get(7)?;
        let top_negative: String = row.get(8)?;
        let penalties: String = row.get(9)?;
        scores.push(CompositeScore {
            score_version_id: row.get(0)?,
            area_code: row.get(1)?,
            year: row.get(2)?,
            score: row.get(3)?,
            raw_score_before_penalties: row.get(4)?,
            trend_1y: row.get(5)?,
            factor_scores: serde_json::from_str(&factor_scores)?,
            top_positive: serde_json::from_str(&top_positive)?,
            top_negative: serde_json::from_str(&top_negative)?,
            penalties_applied: serde_json::from_str(&penalties)?,
        });
    }

    Ok(scores)
}

/// Area code -> non-null score for one version.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn version_scores(
    conn: &Connection,
    version_id: i64,
) -> Result<BTreeMap<String, f64>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT area_code, score FROM composite_scores
         WHERE score_version_id = ? AND score IS NOT NULL",
    )?;
    let mut rows = stmt.query([version_id])?;

    let mut scores = BTreeMap::new();
    while let Some(row) = rows.next()? {
        scores.insert(row.get(0)?, row.get(1)?);
    }
    Ok(scores)
}

/// Area code -> score in the published version of `year`; empty when the
/// year has no published version.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn published_scores(conn: &Connection, year: i32) -> Result<BTreeMap<String, f64>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT cs.area_code, cs.score
         FROM composite_scores cs
         JOIN score_versions sv ON sv.id = cs.score_version_id
         WHERE sv.year = ? AND sv.status = ? AND cs.score IS NOT NULL",
    )?;
    let mut rows = stmt.query(duckdb::params![year, VersionStatus::Published.as_ref()])?;

    let mut scores = BTreeMap::new();
    while let Some(row) = rows.next()? {
        scores.insert(row.get(0)?, row.get(1)?);
    }
    Ok(scores)
}

/// One area's published score for a year.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn published_score(
    conn: &Connection,
    area_code: &str,
    year: i32,
) -> Result<Option<f64>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT cs.score
         FROM composite_scores cs
         JOIN score_versions sv ON sv.id = cs.score_version_id
         WHERE cs.area_code = ? AND sv.year = ? AND sv.status = ?",
    )?;
    let mut rows = stmt.query(duckdb::params![
        area_code,
        year,
        VersionStatus::Published.as_ref()
    ])?;

    Ok(match rows.next()? {
        Some(row) => row.get(0)?,
        None => None,
    })
}

#[cfg(test)]
mod tests {
    use deso_score_scoring_models::{AppliedPenalty, AreaScore};

    use super::*;
    use crate::open_in_memory;

    fn score(version_id: i64, area: &str, value: Option<f64>) -> CompositeScore {
        let mut area_score = AreaScore::unscored(area.to_string());
        area_score.score = value;
        area_score.factor_scores.insert("median_income".to_string(), 0.8);
        area_score.top_positive = vec!["median_income".to_string()];
        area_score.penalties_applied = vec![AppliedPenalty {
            slug: "vuln_utsatt".to_string(),
            name: "Utsatt".to_string(),
            amount: -8.0,
        }];
        CompositeScore::from_area_score(area_score, 2024, version_id, None)
    }

    #[test]
    fn version_round_trip() {
        let conn = open_in_memory().unwrap();
        let now = Utc::now();
        let id = insert_version(&conn, 2024, &[], "test", &now).unwrap();

        let version = get_version(&conn, id).unwrap().unwrap();
        assert_eq!(version.status, VersionStatus::Pending);
        assert_eq!(version.computed_by, "test");
        assert!(version.published_at.is_none());

        set_status(&conn, id, VersionStatus::Published, Some(&now)).unwrap();
        set_status(&conn, id, VersionStatus::Superseded, None).unwrap();
        let version = get_version(&conn, id).unwrap().unwrap();
        assert_eq!(version.status, VersionStatus::Superseded);
        assert!(version.published_at.is_some());
    }

    #[test]
    fn unknown_version_status_update_fails() {
        let conn = open_in_memory().unwrap();
        assert!(set_status(&conn, 99, VersionStatus::Published, None).is_err());
    }

    #[test]
    fn notes_accumulate() {
        let conn = open_in_memory().unwrap();
        let id = insert_version(&conn, 2024, &[], "test", &Utc::now()).unwrap();
        append_note(&conn, id, "first").unwrap();
        append_note(&conn, id, "second").unwrap();

        let notes = get_version(&conn, id).unwrap().unwrap().notes.unwrap();
        assert_eq!(notes, "first\nsecond");
    }

    #[test]
    fn composite_scores_round_trip() {
        let conn = open_in_memory().unwrap();
        let id = insert_version(&conn, 2024, &[], "test", &Utc::now()).unwrap();
        let rows = vec![score(id, "A", Some(56.0)), score(id, "B", None)];
        insert_composite_scores(&conn, &rows).unwrap();

        assert_eq!(load_composite_scores(&conn, id).unwrap(), rows);
        assert_eq!(version_scores(&conn, id).unwrap().len(), 1);
    }

    #[test]
    fn published_scores_only_come_from_published_versions() {
        let conn = open_in_memory().unwrap();
        let now = Utc::now();
        let pending = insert_version(&conn, 2024, &[], "test", &now).unwrap();
        insert_composite_scores(&conn, &[score(pending, "A", Some(40.0))]).unwrap();

        assert!(published_scores(&conn, 2024).unwrap().is_empty());
        assert_eq!(published_score(&conn, "A", 2024).unwrap(), None);

        set_status(&conn, pending, VersionStatus::Published, Some(&now)).unwrap();
        assert_eq!(published_score(&conn, "A", 2024).unwrap(), Some(40.0));
        assert_eq!(
            versions_with_status(&conn, 2024, VersionStatus::Published)
                .unwrap()
                .len(),
            1
        );
    }
}
