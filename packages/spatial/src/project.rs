//! Projects a year's published scores onto the hex grid.

use std::collections::BTreeMap;
use std::sync::Arc;

use deso_score_database::{hex_db, versions_db};
use deso_score_indicator_models::SmoothingConfig;
use deso_score_progress::ProgressCallback;
use deso_score_scoring_models::round2;
use deso_score_spatial_models::{AreaCell, COARSE_RESOLUTIONS, FINEST_RESOLUTION, HexCellScore};
use deso_score_version_models::VersionStatus;
use duckdb::Connection;

use crate::aggregate::aggregate_to_parent;
use crate::smoothing::smooth_cells;
use crate::{SpatialError, cell, cell_center, resolution};

/// What a projection stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionSummary {
    /// Projected year.
    pub year: i32,
    /// Published version the scores came from.
    pub score_version_id: i64,
    /// Rows written per resolution.
    pub cells_by_resolution: BTreeMap<u8, u64>,
}

/// Area score and trend as read from the published version.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AreaScoreSnapshot {
    /// Composite score.
    pub score: Option<f64>,
    /// Year-over-year change.
    pub trend_1y: Option<f64>,
}

/// Cell -> primary area: the mapping row with the largest weight, ties
/// going to the lowest area code.
#[must_use]
pub fn primary_areas(cells: &[AreaCell]) -> BTreeMap<u64, &str> {
    let mut best: BTreeMap<u64, &AreaCell> = BTreeMap::new();
    for candidate in cells {
        best.entry(candidate.h3_index)
            .and_modify(|current| {
                let wins = candidate
                    .area_weight
                    .total_cmp(&current.area_weight)
                    .then_with(|| current.area_code.cmp(&candidate.area_code))
                    .is_gt();
                if wins {
                    *current = candidate;
                }
            })
            .or_insert(candidate);
    }

    best.into_iter()
        .map(|(h3, cell)| (h3, cell.area_code.as_str()))
        .collect()
}

/// Builds hex rows for every mapped cell at the finest resolution and the
/// coarser resolutions above it.
///
/// # Errors
///
/// Returns [`SpatialError`] if a cell is invalid or the preset is rejected.
pub fn project_cells(
    year: i32,
    score_version_id: i64,
    scores: &BTreeMap<String, AreaScoreSnapshot>,
    primaries: &BTreeMap<u64, &str>,
    smoothing: &SmoothingConfig,
) -> Result<Vec<HexCellScore>, SpatialError> {
    smoothing.validate()?;

    let lookup = |h3: u64| {
        primaries
            .get(&h3)
            .and_then(|code| scores.get(*code))
            .copied()
            .unwrap_or_default()
    };

    let raw: BTreeMap<u64, Option<f64>> = primaries
        .keys()
        .map(|&h3| (h3, lookup(h3).score))
        .collect();
    let smoothed = smooth_cells(&raw, smoothing)?;

    let smoothing_factor = if smoothing.is_passthrough() {
        0.0
    } else {
        smoothing.neighbor_weight
    };

    let mut finest = Vec::with_capacity(raw.len());
    for (&h3_index, &score_raw) in &raw {
        let (center_lng, center_lat) = cell_center(cell(h3_index)?);
        finest.push(HexCellScore {
            h3_index,
            resolution: FINEST_RESOLUTION,
            year,
            score_raw,
            score_smoothed: smoothed.get(&h3_index).copied().flatten().map(round2),
            smoothing_factor,
            trend_1y: lookup(h3_index).trend_1y,
            primary_area_code: primaries.get(&h3_index).map(|code| (*code).to_string()),
            score_version_id,
            center_lng,
            center_lat,
        });
    }

    let mut rows = Vec::new();
    for &coarse in COARSE_RESOLUTIONS {
        rows.extend(aggregate_to_parent(&finest, resolution(coarse)?)?);
    }
    rows.extend(finest);

    Ok(rows)
}

/// Replaces the hex rows of `year` with a projection of its published
/// version.
///
/// # Errors
///
/// Returns [`SpatialError::NoPublishedVersion`] if the year has no live
/// version, [`SpatialError::NoCellMapping`] if the mapping was never built,
/// or any load/store error. On error the previous rows are kept.
pub fn project_year(
    conn: &Connection,
    year: i32,
    smoothing: &SmoothingConfig,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<ProjectionSummary, SpatialError> {
    let version = versions_db::versions_with_status(conn, year, VersionStatus::Published)?
        .into_iter()
        .next()
        .ok_or(SpatialError::NoPublishedVersion { year })?;

    let area_cells = hex_db::load_area_cells(conn)?;
    if area_cells.is_empty() {
        return Err(SpatialError::NoCellMapping);
    }

    progress.set_total(3);
    progress.set_message(format!("Projecting version {} for {year}", version.id));

    let scores: BTreeMap<String, AreaScoreSnapshot> =
        versions_db::load_composite_scores(conn, version.id)?
            .into_iter()
            .map(|s| {
                (
                    s.area_code,
                    AreaScoreSnapshot {
                        score: s.score,
                        trend_1y: s.trend_1y,
                    },
                )
            })
            .collect();
    let primaries = primary_areas(&area_cells);
    progress.inc(1);

    log::info!(
        "Projecting {} area scores onto {} cells with preset {}",
        scores.len(),
        primaries.len(),
        smoothing.name
    );
    let rows = project_cells(year, version.id, &scores, &primaries, smoothing)?;
    progress.inc(1);

    hex_db::replace_hex_scores(conn, year, &rows)?;
    progress.inc(1);

    let mut cells_by_resolution = BTreeMap::new();
    for row in &rows {
        *cells_by_resolution.entry(row.resolution).or_insert(0u64) += 1;
    }
    for (res, count) in &cells_by_resolution {
        log::info!("{year}: {count} cells at resolution {res}");
    }
    progress.finish(format!("Projected {} hex rows for {year}", rows.len()));

    Ok(ProjectionSummary {
        year,
        score_version_id: version.id,
        cells_by_resolution,
    })
}
