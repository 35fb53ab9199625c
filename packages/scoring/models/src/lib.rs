#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Composite score types.
//!
//! [`AreaScore`] is what the scoring engine produces for one area from its
//! normalized indicator values. [`CompositeScore`] is the same result once it
//! has been attached to a score version and compared to the previous year.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A penalty that was actually applied to an area's running score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedPenalty {
    /// Penalty slug.
    pub slug: String,
    /// Penalty display name.
    pub name: String,
    /// Change to the running score after clamping (zero or negative).
    pub amount: f64,
}

/// Scoring result for one area, before it is attached to a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaScore {
    /// Area code.
    pub area_code: String,
    /// Final score in `[0, 100]`, or `None` when no weight was available.
    pub score: Option<f64>,
    /// Weighted score before penalties; only set when a penalty applied.
    pub raw_score_before_penalties: Option<f64>,
    /// Indicator slug -> effective contribution `e` in `[0, 1]`.
    pub factor_scores: BTreeMap<String, f64>,
    /// Slugs with the largest `weight * e`.
    pub top_positive: Vec<String>,
    /// Slugs with the smallest `weight * e`.
    pub top_negative: Vec<String>,
    /// Penalties applied, in application order.
    pub penalties_applied: Vec<AppliedPenalty>,
}

impl AreaScore {
    /// A score for an area with no scoreable data.
    #[must_use]
    pub const fn unscored(area_code: String) -> Self {
        Self {
            area_code,
            score: None,
            raw_score_before_penalties: None,
            factor_scores: BTreeMap::new(),
            top_positive: Vec::new(),
            top_negative: Vec::new(),
            penalties_applied: Vec::new(),
        }
    }
}

/// One area's score for one year under one score version. Never mutated
/// after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    /// Area code.
    pub area_code: String,
    /// Reference year.
    pub year: i32,
    /// Owning score version.
    pub score_version_id: i64,
    /// Final score in `[0, 100]`, or `None` when unscored.
    pub score: Option<f64>,
    /// Weighted score before penalties; only set when a penalty applied.
    pub raw_score_before_penalties: Option<f64>,
    /// Change versus the published score of the previous year.
    pub trend_1y: Option<f64>,
    /// Indicator slug -> effective contribution.
    pub factor_scores: BTreeMap<String, f64>,
    /// Strongest positive factors.
    pub top_positive: Vec<String>,
    /// Strongest negative factors.
    pub top_negative: Vec<String>,
    /// Penalties applied, in application order.
    pub penalties_applied: Vec<AppliedPenalty>,
}

impl CompositeScore {
    /// Attaches an [`AreaScore`] to a version.
    ///
    /// `previous` is the same area's published score for `year - 1`.
    #[must_use]
    pub fn from_area_score(
        area: AreaScore,
        year: i32,
        score_version_id: i64,
        previous: Option<f64>,
    ) -> Self {
        let trend_1y = match (area.score, previous) {
            (Some(current), Some(prev)) => Some(round2(current - prev)),
            _ => None,
        };

        Self {
            area_code: area.area_code,
            year,
            score_version_id,
            score: area.score,
            raw_score_before_penalties: area.raw_score_before_penalties,
            trend_1y,
            factor_scores: area.factor_scores,
            top_positive: area.top_positive,
            top_negative: area.top_negative,
            penalties_applied: area.penalties_applied,
        }
    }
}

/// Rounds to the two decimals scores are stored with.
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trend_requires_both_scores() {
        let mut area = AreaScore::unscored("0114A0010".to_string());
        area.score = Some(61.5);

        let with_prev = CompositeScore::from_area_score(area.clone(), 2024, 7, Some(58.25));
        assert_eq!(with_prev.trend_1y, Some(3.25));

        let without_prev = CompositeScore::from_area_score(area, 2024, 7, None);
        assert_eq!(without_prev.trend_1y, None);

        let unscored = CompositeScore::from_area_score(
            AreaScore::unscored("0114A0020".to_string()),
            2024,
            7,
            Some(40.0),
        );
        assert_eq!(unscored.trend_1y, None);
    }

    #[test]
    fn rounds_to_two_decimals() {
        assert!((round2(56.000_000_000_000_01) - 56.0).abs() < f64::EPSILON);
        assert!((round2(12.345_6) - 12.35).abs() < 1e-9);
    }
}
