//! Pipeline stages that read from and write to the database: normalizing a
//! year and scoring it into a version.

use std::collections::BTreeSet;
use std::sync::Arc;

use deso_score_database::{areas_db, config_db, versions_db, with_transaction};
use deso_score_indicator_models::Indicator;
use deso_score_normalize::normalize_indicator;
use deso_score_progress::ProgressCallback;
use deso_score_scoring::{ScoringInput, ScoringOptions, score_areas};
use deso_score_scoring_models::{CompositeScore, round2};
use deso_score_version_models::VersionStats;
use duckdb::Connection;

use crate::VersionError;

/// Normalizes every active indicator for `year` and stores the values.
///
/// An indicator without observations in `year` has its closest observed
/// year normalized instead, so the fallback values scoring reads always
/// follow the current configuration.
///
/// Returns the number of observations that received a normalized value.
///
/// # Errors
///
/// Returns [`VersionError`] if loading or writing fails, or a stored
/// indicator has an invalid configuration.
pub fn normalize_year(
    conn: &Connection,
    year: i32,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<u64, VersionError> {
    let indicators = active_indicators(conn)?;
    let urbanity = areas_db::urbanity_map(conn)?;

    progress.set_total(indicators.len() as u64);

    let mut normalized = Vec::new();
    for indicator in &indicators {
        progress.set_message(indicator.slug.clone());
        match areas_db::source_year(conn, indicator.id, year)? {
            Some(source) => {
                if source != year {
                    log::info!(
                        "{}: no observations for {year}, normalizing {source}",
                        indicator.slug
                    );
                }
                let observations = areas_db::load_observations(conn, indicator.id, source)?;
                normalized.extend(normalize_indicator(indicator, &observations, &urbanity));
            }
            None => log::debug!("{}: no observations", indicator.slug),
        }
        progress.inc(1);
    }

    let count = normalized
        .iter()
        .filter(|o| o.normalized_value.is_some())
        .count() as u64;

    with_transaction(conn, |tx| {
        areas_db::write_normalized_values(tx, &normalized)?;
        Ok::<_, VersionError>(())
    })?;

    progress.finish(format!("Normalized {count} values for {year}"));
    log::info!(
        "Normalized {count} values across {} indicators for {year}",
        indicators.len()
    );

    Ok(count)
}

/// Loads active indicators, rejecting invalid configuration.
///
/// # Errors
///
/// Returns [`VersionError`] if loading fails or an indicator is invalid.
pub fn active_indicators(conn: &Connection) -> Result<Vec<Indicator>, VersionError> {
    let indicators: Vec<Indicator> = config_db::load_indicators(conn)?
        .into_iter()
        .filter(|i| i.is_active)
        .collect();
    for indicator in &indicators {
        indicator.validate()?;
    }
    Ok(indicators)
}

/// Scores `year` from stored normalized values into composite rows for
/// `version_id`, with trends against the published version of `year - 1`.
///
/// Every known area gets a row; areas without data have a `None` score.
///
/// # Errors
///
/// Returns [`VersionError`] if loading fails or a stored rule is invalid.
pub fn score_year(
    conn: &Connection,
    year: i32,
    version_id: i64,
    indicators: &[Indicator],
    options: &ScoringOptions,
) -> Result<Vec<CompositeScore>, VersionError> {
    let values = areas_db::normalized_values_for_year(conn, indicators, year)?;
    let overlaps = areas_db::load_overlaps(conn)?;
    let penalties = config_db::load_penalty_rules(conn)?;
    for rule in &penalties {
        rule.validate()?;
    }

    let area_codes: Vec<String> = areas_db::load_areas(conn)?
        .into_iter()
        .map(|a| a.code)
        .chain(values.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let input = ScoringInput {
        indicators,
        values: &values,
        overlaps: &overlaps,
        penalties: &penalties,
    };
    let scores = score_areas(&area_codes, &input, options);

    let previous = versions_db::published_scores(conn, year - 1)?;
    if previous.is_empty() {
        log::debug!("No published scores for {}; trends left empty", year - 1);
    }

    Ok(scores
        .into_iter()
        .map(|score| {
            let prev = previous.get(&score.area_code).copied();
            CompositeScore::from_area_score(score, year, version_id, prev)
        })
        .collect())
}

/// Summary statistics over the non-null scores, rounded for display.
#[must_use]
pub fn summarize(scores: &[CompositeScore]) -> VersionStats {
    let values: Vec<f64> = scores.iter().filter_map(|s| s.score).collect();
    let stats = VersionStats::from_scores(&values);
    VersionStats {
        area_count: stats.area_count,
        mean_score: stats.mean_score.map(round2),
        stddev_score: stats.stddev_score.map(round2),
    }
}
