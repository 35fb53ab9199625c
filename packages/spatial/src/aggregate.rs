//! Bottom-up aggregation to coarser resolutions.

use std::collections::BTreeMap;

use deso_score_scoring_models::round2;
use deso_score_spatial_models::HexCellScore;
use h3o::Resolution;

use crate::{SpatialError, cell, cell_center};

/// Groups `cells` by their parent at `resolution` and gives each parent the
/// count-weighted mean of its children's raw score, smoothed score, and
/// trend. Children without a value do not count toward that value's mean.
///
/// # Errors
///
/// Returns [`SpatialError::InvalidCell`] if a child index is invalid, or
/// [`SpatialError::InvalidResolution`] if `resolution` is not coarser than a
/// child.
pub fn aggregate_to_parent(
    cells: &[HexCellScore],
    resolution: Resolution,
) -> Result<Vec<HexCellScore>, SpatialError> {
    let mut groups: BTreeMap<u64, Vec<&HexCellScore>> = BTreeMap::new();
    for child in cells {
        let parent = cell(child.h3_index)?
            .parent(resolution)
            .ok_or(SpatialError::InvalidResolution {
                resolution: u8::from(resolution),
            })?;
        groups.entry(u64::from(parent)).or_default().push(child);
    }

    let mut parents = Vec::with_capacity(groups.len());
    for (h3_index, children) in groups {
        let Some(first) = children.first() else {
            continue;
        };
        let (center_lng, center_lat) = cell_center(cell(h3_index)?);

        parents.push(HexCellScore {
            h3_index,
            resolution: u8::from(resolution),
            year: first.year,
            score_raw: mean(children.iter().map(|c| c.score_raw)),
            score_smoothed: mean(children.iter().map(|c| c.score_smoothed)),
            smoothing_factor: first.smoothing_factor,
            trend_1y: mean(children.iter().map(|c| c.trend_1y)),
            primary_area_code: None,
            score_version_id: first.score_version_id,
            center_lng,
            center_lat,
        });
    }

    Ok(parents)
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, count) = values
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| round2(sum / count as f64))
}
