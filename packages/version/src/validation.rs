//! Checks run by `validate`: sentinel ranges, score bounds, coverage, and
//! drift against the live version.

use std::collections::BTreeMap;

use deso_score_indicator_models::SentinelArea;
use deso_score_version_models::{AreaDrift, DriftReport, SentinelResult, SentinelStatus};

/// Checks every active sentinel against a version's scores.
#[must_use]
pub fn check_sentinels(
    sentinels: &[SentinelArea],
    scores: &BTreeMap<String, Option<f64>>,
) -> Vec<SentinelResult> {
    sentinels
        .iter()
        .filter(|s| s.is_active)
        .map(|sentinel| {
            let score = scores.get(&sentinel.area_code).copied().flatten();
            let status = match score {
                None => SentinelStatus::Missing,
                Some(s) if sentinel.accepts(s) => SentinelStatus::Passed,
                Some(_) => SentinelStatus::Failed,
            };
            SentinelResult {
                area_code: sentinel.area_code.clone(),
                name: sentinel.name.clone(),
                status,
                score,
                expected_min: sentinel.expected_score_min,
                expected_max: sentinel.expected_score_max,
            }
        })
        .collect()
}

/// Number of scores outside `[0, 100]` (or not finite).
#[must_use]
pub fn count_out_of_bounds<'a>(scores: impl IntoIterator<Item = &'a f64>) -> u64 {
    scores
        .into_iter()
        .filter(|s| !s.is_finite() || !(0.0..=100.0).contains(*s))
        .count() as u64
}

/// Compares a new version's scores with the live version's, over the areas
/// scored in both.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn detect_drift(
    compared_version_id: i64,
    old: &BTreeMap<String, f64>,
    new: &BTreeMap<String, f64>,
    threshold: f64,
) -> DriftReport {
    let mut total = 0.0;
    let mut max_drift: f64 = 0.0;
    let mut count = 0u64;
    let mut large = Vec::new();

    for (area_code, &new_score) in new {
        let Some(&old_score) = old.get(area_code) else {
            continue;
        };
        let drift = new_score - old_score;
        total += drift.abs();
        max_drift = max_drift.max(drift.abs());
        count += 1;

        if drift.abs() > threshold {
            large.push(AreaDrift {
                area_code: area_code.clone(),
                old_score,
                new_score,
                drift,
            });
        }
    }

    large.sort_by(|a, b| {
        b.drift
            .abs()
            .total_cmp(&a.drift.abs())
            .then_with(|| a.area_code.cmp(&b.area_code))
    });

    DriftReport {
        compared_version_id,
        total_areas: count,
        mean_drift: if count == 0 { 0.0 } else { total / count as f64 },
        max_drift,
        threshold,
        areas_with_large_drift: large,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentinel(code: &str, min: f64, max: f64) -> SentinelArea {
        SentinelArea {
            area_code: code.to_string(),
            name: code.to_string(),
            expected_score_min: min,
            expected_score_max: max,
            expected_tier: None,
            is_active: true,
        }
    }

    #[test]
    fn sentinels_pass_fail_and_go_missing() {
        let scores = BTreeMap::from([
            ("A".to_string(), Some(80.0)),
            ("B".to_string(), Some(20.0)),
            ("C".to_string(), None),
        ]);
        let results = check_sentinels(
            &[
                sentinel("A", 70.0, 90.0),
                sentinel("B", 70.0, 90.0),
                sentinel("C", 0.0, 100.0),
                sentinel("D", 0.0, 100.0),
            ],
            &scores,
        );

        let statuses: Vec<SentinelStatus> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                SentinelStatus::Passed,
                SentinelStatus::Failed,
                SentinelStatus::Missing,
                SentinelStatus::Missing,
            ]
        );
    }

    #[test]
    fn range_edges_are_inclusive() {
        let scores = BTreeMap::from([("A".to_string(), Some(70.0))]);
        let results = check_sentinels(&[sentinel("A", 70.0, 90.0)], &scores);
        assert_eq!(results[0].status, SentinelStatus::Passed);
    }

    #[test]
    fn drift_flags_large_moves_largest_first() {
        let old = BTreeMap::from([
            ("A".to_string(), 50.0),
            ("B".to_string(), 50.0),
            ("C".to_string(), 50.0),
        ]);
        let new = BTreeMap::from([
            ("A".to_string(), 75.0),
            ("B".to_string(), 20.0),
            ("C".to_string(), 52.0),
            ("D".to_string(), 99.0),
        ]);

        let report = detect_drift(3, &old, &new, 20.0);
        assert_eq!(report.total_areas, 3);
        assert!((report.max_drift - 30.0).abs() < 1e-9);
        assert!((report.mean_drift - 19.0).abs() < 1e-9);

        let flagged: Vec<&str> = report
            .areas_with_large_drift
            .iter()
            .map(|d| d.area_code.as_str())
            .collect();
        assert_eq!(flagged, vec!["B", "A"]);
        assert!((report.areas_with_large_drift[0].drift + 30.0).abs() < 1e-9);
    }

    #[test]
    fn out_of_bounds_counts_invalid_scores() {
        assert_eq!(count_out_of_bounds(&[0.0, 100.0, 50.0]), 0);
        assert_eq!(count_out_of_bounds(&[-0.5, 100.1, f64::NAN]), 3);
    }
}
