#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Composite scoring and penalty engines.
//!
//! Turns each area's normalized indicator values into a 0-100 score:
//! direction-aware weighting over the weight actually available for that
//! area, then a sequential fold of overlap penalties. Areas are independent
//! and scored in parallel; output order is always by area code.

pub mod composite;
pub mod penalty;

use std::collections::BTreeMap;

use deso_score_indicator_models::{AreaVulnerabilityOverlap, Indicator, PenaltyRule};
use deso_score_scoring_models::{AreaScore, round2};
use rayon::prelude::*;

pub use composite::{AreaValues, WeightedScore, weighted_score};
pub use penalty::{DEFAULT_OVERLAP_THRESHOLD, applicable_rules, apply_penalties};

/// Default number of top factors kept per direction.
pub const DEFAULT_TOP_FACTORS: usize = 3;

/// Tunables for a scoring pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringOptions {
    /// Minimum overlap fraction for a penalty rule to apply.
    pub overlap_threshold: f64,
    /// How many top positive/negative factor slugs to keep.
    pub top_factors: usize,
}

impl Default for ScoringOptions {
    fn default() -> Self {
        Self {
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
            top_factors: DEFAULT_TOP_FACTORS,
        }
    }
}

/// Everything a scoring pass reads, borrowed from the caller.
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    /// Indicator configuration (inactive and neutral ones are skipped).
    pub indicators: &'a [Indicator],
    /// Area code -> normalized values.
    pub values: &'a BTreeMap<String, AreaValues>,
    /// Area code -> tier overlaps.
    pub overlaps: &'a BTreeMap<String, Vec<AreaVulnerabilityOverlap>>,
    /// Penalty rules.
    pub penalties: &'a [PenaltyRule],
}

/// Scores a single area.
#[must_use]
pub fn score_area(
    area_code: &str,
    input: &ScoringInput<'_>,
    options: &ScoringOptions,
) -> AreaScore {
    let empty = AreaValues::new();
    let values = input.values.get(area_code).unwrap_or(&empty);

    let Some(weighted) = weighted_score(input.indicators, values, options.top_factors) else {
        return AreaScore::unscored(area_code.to_string());
    };

    let overlaps = input
        .overlaps
        .get(area_code)
        .map_or(&[][..], Vec::as_slice);
    let rules = applicable_rules(input.penalties, overlaps, options.overlap_threshold);
    let (penalized, penalties_applied) = apply_penalties(weighted.score, &rules);

    AreaScore {
        area_code: area_code.to_string(),
        score: Some(round2(penalized)),
        raw_score_before_penalties: (!penalties_applied.is_empty())
            .then(|| round2(weighted.score)),
        factor_scores: weighted.factor_scores,
        top_positive: weighted.top_positive,
        top_negative: weighted.top_negative,
        penalties_applied,
    }
}

/// Scores every area in `area_codes`. Areas with no scoreable data get a
/// `None` score. The result is sorted by area code.
#[must_use]
pub fn score_areas(
    area_codes: &[String],
    input: &ScoringInput<'_>,
    options: &ScoringOptions,
) -> Vec<AreaScore> {
    let mut scores: Vec<AreaScore> = area_codes
        .par_iter()
        .map(|code| score_area(code, input, options))
        .collect();
    scores.sort_by(|a, b| a.area_code.cmp(&b.area_code));

    let scored = scores.iter().filter(|s| s.score.is_some()).count();
    log::info!("Scored {scored}/{} areas", scores.len());

    scores
}

#[cfg(test)]
mod tests {
    use deso_score_indicator_models::{
        Direction, NormalizationMethod, NormalizationScope, PenaltyType,
    };

    use super::*;

    fn indicators() -> Vec<Indicator> {
        [
            (1, "income", 0.3, Direction::Positive),
            (2, "crime", 0.2, Direction::Negative),
            (3, "education", 0.5, Direction::Positive),
        ]
        .into_iter()
        .map(|(id, slug, weight, direction)| Indicator {
            id,
            slug: slug.to_string(),
            name: slug.to_string(),
            direction,
            weight,
            normalization: NormalizationMethod::RankPercentile,
            normalization_scope: NormalizationScope::National,
            is_active: true,
        })
        .collect()
    }

    fn penalty(magnitude: f64) -> PenaltyRule {
        PenaltyRule {
            id: 1,
            slug: "vuln_utsatt".to_string(),
            name: "Utsatt område".to_string(),
            category: "vulnerability".to_string(),
            penalty_type: PenaltyType::Absolute,
            magnitude,
            tier: "utsatt".to_string(),
            display_order: 1,
            is_active: true,
        }
    }

    fn fixture() -> (
        BTreeMap<String, AreaValues>,
        BTreeMap<String, Vec<AreaVulnerabilityOverlap>>,
    ) {
        let mut values = BTreeMap::new();
        values.insert(
            "A".to_string(),
            AreaValues::from([(1, 0.80), (2, 0.90), (3, 0.60)]),
        );
        values.insert(
            "B".to_string(),
            AreaValues::from([(1, 0.80), (2, 0.90), (3, 0.60)]),
        );

        let mut overlaps = BTreeMap::new();
        overlaps.insert(
            "B".to_string(),
            vec![AreaVulnerabilityOverlap {
                area_code: "B".to_string(),
                tier: "utsatt".to_string(),
                overlap_fraction: 0.4,
            }],
        );
        (values, overlaps)
    }

    #[test]
    fn penalty_applies_only_to_overlapping_area() {
        let indicators = indicators();
        let (values, overlaps) = fixture();
        let penalties = [penalty(-10.0)];
        let input = ScoringInput {
            indicators: &indicators,
            values: &values,
            overlaps: &overlaps,
            penalties: &penalties,
        };

        let codes = vec!["C".to_string(), "B".to_string(), "A".to_string()];
        let scores = score_areas(&codes, &input, &ScoringOptions::default());

        let order: Vec<&str> = scores.iter().map(|s| s.area_code.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);

        assert_eq!(scores[0].score, Some(56.0));
        assert_eq!(scores[0].raw_score_before_penalties, None);

        assert_eq!(scores[1].score, Some(46.0));
        assert_eq!(scores[1].raw_score_before_penalties, Some(56.0));
        assert_eq!(scores[1].penalties_applied.len(), 1);

        assert_eq!(scores[2].score, None);
    }

    #[test]
    fn heavy_penalty_never_goes_negative() {
        let indicators = indicators();
        let (values, overlaps) = fixture();
        let penalties = [penalty(-60.0)];
        let input = ScoringInput {
            indicators: &indicators,
            values: &values,
            overlaps: &overlaps,
            penalties: &penalties,
        };

        let score = score_area("B", &input, &ScoringOptions::default());
        assert_eq!(score.score, Some(0.0));
    }

    #[test]
    fn percentage_penalty_uses_unrounded_score() {
        let indicators = indicators();
        let (_, overlaps) = fixture();
        let values = BTreeMap::from([("B".to_string(), AreaValues::from([(1, 0.100_051)]))]);
        let penalties = [PenaltyRule {
            penalty_type: PenaltyType::Percentage,
            ..penalty(-10.0)
        }];
        let input = ScoringInput {
            indicators: &indicators,
            values: &values,
            overlaps: &overlaps,
            penalties: &penalties,
        };

        // 10.0051 * 0.9 = 9.00459; rounding first would give 10.01 * 0.9 = 9.009.
        let score = score_area("B", &input, &ScoringOptions::default());
        assert_eq!(score.raw_score_before_penalties, Some(10.01));
        assert_eq!(score.score, Some(9.0));
    }

    #[test]
    fn repeated_runs_are_identical() {
        let indicators = indicators();
        let (values, overlaps) = fixture();
        let penalties = [penalty(-10.0)];
        let input = ScoringInput {
            indicators: &indicators,
            values: &values,
            overlaps: &overlaps,
            penalties: &penalties,
        };
        let codes: Vec<String> = values.keys().cloned().collect();

        let first = score_areas(&codes, &input, &ScoringOptions::default());
        let second = score_areas(&codes, &input, &ScoringOptions::default());
        assert_eq!(first, second);
    }

    #[test]
    fn scores_stay_in_bounds() {
        let indicators = indicators();
        let overlaps = BTreeMap::new();
        let mut values = BTreeMap::new();
        for (i, v) in [0.0, 0.25, 0.5, 1.0].into_iter().enumerate() {
            values.insert(format!("A{i}"), AreaValues::from([(1, v), (2, v), (3, v)]));
        }
        let input = ScoringInput {
            indicators: &indicators,
            values: &values,
            overlaps: &overlaps,
            penalties: &[],
        };
        let codes: Vec<String> = values.keys().cloned().collect();

        for score in score_areas(&codes, &input, &ScoringOptions::default()) {
            let s = score.score.unwrap();
            assert!((0.0..=100.0).contains(&s));
        }
    }
}
