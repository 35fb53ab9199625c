//! Neighbor blending at the finest resolution.
//!
//! `smoothed = self_weight * raw + neighbor_weight * avg`, where `avg` is
//! the decay-weighted mean over the scored cells within `k_rings`. Cells
//! without a raw score are skipped, never counted as zero. When one of the
//! two terms is missing the other stands in for it, so the result is only
//! `None` when the cell and its whole neighborhood are unscored.

use std::collections::BTreeMap;

use deso_score_indicator_models::SmoothingConfig;
use rayon::prelude::*;

use crate::{SpatialError, cell};

/// Relative weight of each ring, index `r - 1` for ring `r`.
#[must_use]
pub fn ring_weights(config: &SmoothingConfig) -> Vec<f64> {
    (1..=config.k_rings)
        .map(|ring| {
            config
                .decay_function
                .ring_weight(ring, config.k_rings, config.decay_base)
        })
        .collect()
}

/// Blends one cell. `neighbors` holds `(ring, raw score)` for the scored
/// cells around it.
#[must_use]
pub fn blend(
    raw: Option<f64>,
    neighbors: &[(u32, f64)],
    weights: &[f64],
    config: &SmoothingConfig,
) -> Option<f64> {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for &(ring, score) in neighbors {
        let Some(&w) = ring
            .checked_sub(1)
            .and_then(|i| weights.get(usize::try_from(i).ok()?))
        else {
            continue;
        };
        weighted += w * score;
        total += w;
    }
    let average = (total > 0.0).then(|| weighted / total);

    let (own, around) = match (raw, average) {
        (None, None) => return None,
        (Some(own), None) => (own, own),
        (None, Some(around)) => (around, around),
        (Some(own), Some(around)) => (own, around),
    };
    Some(config.self_weight.mul_add(own, config.neighbor_weight * around))
}

/// Smooths every cell of `raw` (cell -> raw score) against its neighbors in
/// the same map.
///
/// # Errors
///
/// Returns [`SpatialError::InvalidCell`] if a key is not a valid H3 cell.
pub fn smooth_cells(
    raw: &BTreeMap<u64, Option<f64>>,
    config: &SmoothingConfig,
) -> Result<BTreeMap<u64, Option<f64>>, SpatialError> {
    if config.is_passthrough() {
        log::debug!("Smoothing preset {} is a pass-through", config.name);
        return Ok(raw.clone());
    }

    let weights = ring_weights(config);

    raw.par_iter()
        .map(|(&h3_index, &own)| {
            let center = cell(h3_index)?;
            let neighbors: Vec<(u32, f64)> = center
                .grid_disk_distances::<Vec<_>>(config.k_rings)
                .into_iter()
                .filter(|&(_, ring)| ring > 0)
                .filter_map(|(neighbor, ring)| {
                    raw.get(&u64::from(neighbor))
                        .copied()
                        .flatten()
                        .map(|score| (ring, score))
                })
                .collect();

            Ok((h3_index, blend(own, &neighbors, &weights, config)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use deso_score_indicator_models::{DEFAULT_DECAY_BASE, DecayFunction};
    use h3o::{CellIndex, Resolution};

    use super::*;
    use crate::cell_at;

    fn config(k_rings: u32, decay_function: DecayFunction) -> SmoothingConfig {
        SmoothingConfig {
            name: "Test".to_string(),
            self_weight: 0.6,
            neighbor_weight: 0.4,
            k_rings,
            decay_function,
            decay_base: DEFAULT_DECAY_BASE,
            is_active: true,
        }
    }

    fn center() -> CellIndex {
        cell_at(18.06, 59.33, Resolution::Eight).unwrap()
    }

    #[test]
    fn one_ring_uniform_blend() {
        let c = center();
        let mut raw = BTreeMap::new();
        for neighbor in c.grid_disk::<Vec<_>>(1) {
            raw.insert(u64::from(neighbor), Some(50.0));
        }
        raw.insert(u64::from(c), Some(70.0));

        let smoothed = smooth_cells(&raw, &config(1, DecayFunction::Uniform)).unwrap();
        let value = smoothed[&u64::from(c)].unwrap();
        assert!((value - 62.0).abs() < 1e-9);
    }

    #[test]
    fn unscored_neighbors_are_excluded_not_zeroed() {
        let c = center();
        let mut raw = BTreeMap::new();
        for (i, neighbor) in c.grid_disk::<Vec<_>>(1).into_iter().enumerate() {
            let score = if i % 2 == 0 { Some(50.0) } else { None };
            raw.insert(u64::from(neighbor), score);
        }
        raw.insert(u64::from(c), Some(70.0));

        let smoothed = smooth_cells(&raw, &config(1, DecayFunction::Uniform)).unwrap();
        let value = smoothed[&u64::from(c)].unwrap();
        assert!((value - 62.0).abs() < 1e-9);
    }

    #[test]
    fn missing_terms_stand_in_for_each_other() {
        let cfg = config(1, DecayFunction::Uniform);
        let weights = ring_weights(&cfg);

        let no_neighbors = blend(Some(70.0), &[], &weights, &cfg).unwrap();
        assert!((no_neighbors - 70.0).abs() < 1e-9);

        let no_self = blend(None, &[(1, 50.0), (1, 40.0)], &weights, &cfg).unwrap();
        assert!((no_self - 45.0).abs() < 1e-9);

        assert_eq!(blend(None, &[], &weights, &cfg), None);
    }

    #[test]
    fn isolated_unscored_cell_stays_null() {
        let c = center();
        let raw = BTreeMap::from([(u64::from(c), None)]);
        let smoothed = smooth_cells(&raw, &config(2, DecayFunction::Linear)).unwrap();
        assert_eq!(smoothed[&u64::from(c)], None);
    }

    #[test]
    fn linear_decay_favours_closer_rings() {
        let cfg = config(2, DecayFunction::Linear);
        let weights = ring_weights(&cfg);
        assert_eq!(weights, vec![2.0, 1.0]);

        // One ring-1 neighbor at 90, one ring-2 neighbor at 30:
        // avg = (2 * 90 + 1 * 30) / 3 = 70
        let value = blend(Some(70.0), &[(1, 90.0), (2, 30.0)], &weights, &cfg).unwrap();
        assert!((value - 70.0).abs() < 1e-9);
    }

    #[test]
    fn exponential_decay_uses_base() {
        let cfg = config(3, DecayFunction::Exponential);
        let weights = ring_weights(&cfg);
        assert!((weights[0] - 0.5).abs() < 1e-12);
        assert!((weights[2] - 0.125).abs() < 1e-12);
    }

    #[test]
    fn zero_rings_copies_raw() {
        let c = center();
        let raw = BTreeMap::from([(u64::from(c), Some(42.0))]);
        let smoothed = smooth_cells(&raw, &config(0, DecayFunction::Gaussian)).unwrap();
        assert_eq!(smoothed, raw);
    }

    #[test]
    fn invalid_cell_is_an_error() {
        let raw = BTreeMap::from([(0, Some(1.0))]);
        assert!(matches!(
            smooth_cells(&raw, &config(1, DecayFunction::Uniform)),
            Err(SpatialError::InvalidCell { index: 0 })
        ));
    }
}
