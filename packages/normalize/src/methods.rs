//! Numeric normalization methods.
//!
//! Every function maps a slice of finite raw values onto `[0, 1]` and returns
//! the results in input order. None of them know about direction; a
//! normalized value always means "how far up the raw distribution this
//! observation sits".

use deso_score_indicator_models::NormalizationMethod;

/// z-scores are clipped to this many standard deviations before rescaling.
const Z_CLIP: f64 = 3.0;

/// Normalizes `values` with the given method.
#[must_use]
pub fn normalize(method: NormalizationMethod, values: &[f64]) -> Vec<f64> {
    match method {
        NormalizationMethod::RankPercentile => rank_percentile(values),
        NormalizationMethod::MinMax => min_max(values),
        NormalizationMethod::ZScore => z_score(values),
    }
}

/// `(rank - 0.5) / n` over ascending ranks. Tied values share the mean of
/// the rank range they occupy, so nothing jumps past a tie.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rank_percentile(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut out = vec![0.0; n];
    let mut start = 0;
    while start < n {
        let mut end = start;
        while end + 1 < n && values[order[end + 1]] == values[order[start]] {
            end += 1;
        }

        // 1-based ranks start+1 ..= end+1
        let mean_rank = (start + end + 2) as f64 / 2.0;
        let percentile = (mean_rank - 0.5) / n as f64;
        for &idx in &order[start..=end] {
            out[idx] = percentile;
        }

        start = end + 1;
    }

    out
}

/// `(value - min) / (max - min)`. A constant group maps to 0.5.
#[must_use]
pub fn min_max(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    values
        .iter()
        .map(|v| if range > 0.0 { (v - min) / range } else { 0.5 })
        .collect()
}

/// Population z-score clipped to ±3σ and rescaled linearly onto `[0, 1]`.
/// A group with zero spread maps to 0.5.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn z_score(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let stddev = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

    values
        .iter()
        .map(|v| {
            if stddev > 0.0 {
                let z = ((v - mean) / stddev).clamp(-Z_CLIP, Z_CLIP);
                (z + Z_CLIP) / (2.0 * Z_CLIP)
            } else {
                0.5
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-12, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn percentile_of_distinct_values() {
        let out = rank_percentile(&[30.0, 10.0, 20.0, 40.0]);
        assert_close(&out, &[0.625, 0.125, 0.375, 0.875]);
    }

    #[test]
    fn ties_share_mean_rank() {
        // ranks: 10 -> 1, 20/20 -> 2 and 3 (mean 2.5), 30 -> 4
        let out = rank_percentile(&[20.0, 10.0, 20.0, 30.0]);
        assert_close(&out, &[0.5, 0.125, 0.5, 0.875]);
    }

    #[test]
    fn percentile_is_monotonic() {
        let values = [5.0, 1.0, 3.0, 3.0, 9.0, 7.0, 1.0, 8.0];
        let out = rank_percentile(&values);
        for i in 0..values.len() {
            for j in 0..values.len() {
                if values[i] < values[j] {
                    assert!(out[i] < out[j]);
                } else if values[i] == values[j] {
                    assert!((out[i] - out[j]).abs() < f64::EPSILON);
                }
            }
        }
    }

    #[test]
    fn single_value_sits_in_the_middle() {
        assert_close(&rank_percentile(&[42.0]), &[0.5]);
    }

    #[test]
    fn min_max_scales_to_unit_range() {
        assert_close(&min_max(&[10.0, 20.0, 15.0]), &[0.0, 1.0, 0.5]);
    }

    #[test]
    fn constant_group_is_mid_range() {
        assert_close(&min_max(&[7.0, 7.0, 7.0]), &[0.5, 0.5, 0.5]);
        assert_close(&z_score(&[7.0, 7.0]), &[0.5, 0.5]);
    }

    #[test]
    fn z_score_clips_outliers() {
        let mut values = vec![0.0; 99];
        values.push(1000.0);
        let out = z_score(&values);
        assert!((out[99] - 1.0).abs() < 1e-12);
        assert!(out[0] > 0.0 && out[0] < 0.5);
    }

    #[test]
    fn z_score_is_symmetric() {
        assert_close(&z_score(&[1.0, 3.0]), &[1.0 / 3.0, 2.0 / 3.0]);
    }
}
