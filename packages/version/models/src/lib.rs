#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Score version lifecycle types.
//!
//! A [`ScoreVersion`] wraps one full computation run for one year. Its
//! [`VersionStatus`] only moves along the edges listed in [`TRANSITIONS`];
//! every status change in the system goes through
//! [`VersionStatus::transition`], which is what keeps "at most one published
//! version per year" enforceable in a single code path.

use chrono::{DateTime, Utc};
use deso_score_indicator_models::{Direction, NormalizationMethod, NormalizationScope};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Lifecycle state of a score version.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VersionStatus {
    /// Computed, not yet checked.
    Pending,
    /// Validation ran (results may still contain failures).
    Validated,
    /// The live version for its year.
    Published,
    /// Replaced by a newer publish.
    Superseded,
    /// Demoted by a rollback to an earlier version.
    RolledBack,
}

/// An operator or system action that changes a version's status.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VersionAction {
    /// Record validation results.
    Validate,
    /// Make a freshly computed version live.
    Publish,
    /// Demote the live version because another one is being published.
    Supersede,
    /// Demote the live version because of a rollback.
    RollBack,
    /// Make a previously live version live again.
    Restore,
}

/// Every permitted `(from, action, to)` edge. Anything else is a state
/// conflict.
pub const TRANSITIONS: &[(VersionStatus, VersionAction, VersionStatus)] = &[
    (
        VersionStatus::Pending,
        VersionAction::Validate,
        VersionStatus::Validated,
    ),
    (
        VersionStatus::Validated,
        VersionAction::Validate,
        VersionStatus::Validated,
    ),
    (
        VersionStatus::Pending,
        VersionAction::Publish,
        VersionStatus::Published,
    ),
    (
        VersionStatus::Validated,
        VersionAction::Publish,
        VersionStatus::Published,
    ),
    (
        VersionStatus::Published,
        VersionAction::Supersede,
        VersionStatus::Superseded,
    ),
    (
        VersionStatus::Published,
        VersionAction::RollBack,
        VersionStatus::RolledBack,
    ),
    (
        VersionStatus::Superseded,
        VersionAction::Restore,
        VersionStatus::Published,
    ),
    (
        VersionStatus::RolledBack,
        VersionAction::Restore,
        VersionStatus::Published,
    ),
];

impl VersionStatus {
    /// Looks up the status reached by applying `action`, or `None` if the
    /// edge is not in [`TRANSITIONS`].
    #[must_use]
    pub fn transition(self, action: VersionAction) -> Option<Self> {
        TRANSITIONS
            .iter()
            .find(|(from, act, _)| *from == self && *act == action)
            .map(|(_, _, to)| *to)
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Pending,
            Self::Validated,
            Self::Published,
            Self::Superseded,
            Self::RolledBack,
        ]
    }
}

/// The scoring configuration of one indicator as it was when a version was
/// computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    /// Indicator slug.
    pub slug: String,
    /// Weight at compute time.
    pub weight: f64,
    /// Direction at compute time.
    pub direction: Direction,
    /// Normalization method at compute time.
    pub normalization: NormalizationMethod,
    /// Normalization scope at compute time.
    pub normalization_scope: NormalizationScope,
}

/// Summary statistics over the non-null scores of a version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionStats {
    /// Number of areas with a non-null score.
    pub area_count: u64,
    /// Mean score.
    pub mean_score: Option<f64>,
    /// Sample standard deviation.
    pub stddev_score: Option<f64>,
}

impl VersionStats {
    /// Computes stats over the given scores.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_scores(scores: &[f64]) -> Self {
        let n = scores.len();
        if n == 0 {
            return Self::default();
        }

        let mean = scores.iter().sum::<f64>() / n as f64;
        let stddev = if n < 2 {
            0.0
        } else {
            let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            var.sqrt()
        };

        Self {
            area_count: n as u64,
            mean_score: Some(mean),
            stddev_score: Some(stddev),
        }
    }
}

/// One full computation run for one year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreVersion {
    /// Primary key.
    pub id: i64,
    /// Reference year.
    pub year: i32,
    /// Lifecycle state.
    pub status: VersionStatus,
    /// Indicator configuration used by the run.
    pub indicators_used: Vec<IndicatorSnapshot>,
    /// Latest validation results, if validated.
    pub validation: Option<ValidationReport>,
    /// Summary statistics.
    pub stats: VersionStats,
    /// Who triggered the run.
    pub computed_by: String,
    /// Free-form operator notes (rollback reasons accumulate here).
    pub notes: Option<String>,
    /// When the run finished computing.
    pub computed_at: DateTime<Utc>,
    /// When the version last became live.
    pub published_at: Option<DateTime<Utc>>,
}

/// Outcome of one sentinel check.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SentinelStatus {
    /// Score within the expected range.
    Passed,
    /// Score outside the expected range.
    Failed,
    /// No score computed for the sentinel area.
    Missing,
}

/// Result of checking one sentinel area against a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentinelResult {
    /// Sentinel area code.
    pub area_code: String,
    /// Sentinel display name.
    pub name: String,
    /// Outcome.
    pub status: SentinelStatus,
    /// Score found, if any.
    pub score: Option<f64>,
    /// Expected minimum.
    pub expected_min: f64,
    /// Expected maximum.
    pub expected_max: f64,
}

/// One area whose score moved more than the drift threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaDrift {
    /// Area code.
    pub area_code: String,
    /// Score in the compared (live) version.
    pub old_score: f64,
    /// Score in the new version.
    pub new_score: f64,
    /// `new - old`.
    pub drift: f64,
}

/// Score movement between a new version and the live one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    /// Version compared against.
    pub compared_version_id: i64,
    /// Areas scored in both versions.
    pub total_areas: u64,
    /// Mean absolute drift.
    pub mean_drift: f64,
    /// Largest absolute drift.
    pub max_drift: f64,
    /// Threshold used for `areas_with_large_drift`.
    pub threshold: f64,
    /// Areas whose absolute drift exceeds the threshold, largest first.
    pub areas_with_large_drift: Vec<AreaDrift>,
}

/// Fraction of known areas that received a score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageCheck {
    /// Areas known to the system.
    pub known_areas: u64,
    /// Areas with a non-null score.
    pub scored_areas: u64,
}

impl CoverageCheck {
    /// Scored fraction in `[0, 1]` (zero when no areas are known).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        if self.known_areas == 0 {
            0.0
        } else {
            self.scored_areas as f64 / self.known_areas as f64
        }
    }
}

/// Everything `validate` found out about a version. Advisory: failures are
/// surfaced, and only block publishing under a strict publish policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Sentinel outcomes.
    pub sentinels: Vec<SentinelResult>,
    /// Score coverage.
    pub coverage: CoverageCheck,
    /// Scores outside `[0, 100]` (always expected to be zero).
    pub out_of_bounds: u64,
    /// Movement against the live version, if one exists.
    pub drift: Option<DriftReport>,
    /// When validation ran.
    pub validated_at: DateTime<Utc>,
}

impl ValidationReport {
    /// Sentinels that failed or had no score.
    #[must_use]
    pub fn sentinel_failures(&self) -> Vec<&SentinelResult> {
        self.sentinels
            .iter()
            .filter(|s| s.status != SentinelStatus::Passed)
            .collect()
    }

    /// Whether every check passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.out_of_bounds == 0 && self.sentinel_failures().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_only_from_pending_or_validated() {
        for status in VersionStatus::all() {
            let expected = matches!(status, VersionStatus::Pending | VersionStatus::Validated);
            assert_eq!(
                status.transition(VersionAction::Publish).is_some(),
                expected,
                "{status}"
            );
        }
    }

    #[test]
    fn restore_reaches_published() {
        assert_eq!(
            VersionStatus::RolledBack.transition(VersionAction::Restore),
            Some(VersionStatus::Published)
        );
        assert_eq!(
            VersionStatus::Superseded.transition(VersionAction::Restore),
            Some(VersionStatus::Published)
        );
        assert_eq!(VersionStatus::Published.transition(VersionAction::Restore), None);
        assert_eq!(VersionStatus::Pending.transition(VersionAction::Restore), None);
    }

    #[test]
    fn only_published_can_be_demoted() {
        for status in VersionStatus::all() {
            let demotable = *status == VersionStatus::Published;
            assert_eq!(
                status.transition(VersionAction::Supersede).is_some(),
                demotable
            );
            assert_eq!(status.transition(VersionAction::RollBack).is_some(), demotable);
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        assert_eq!(VersionStatus::RolledBack.as_ref(), "rolled_back");
        assert_eq!(
            "superseded".parse::<VersionStatus>().unwrap(),
            VersionStatus::Superseded
        );
    }

    #[test]
    fn stats_use_sample_stddev() {
        let stats = VersionStats::from_scores(&[40.0, 60.0]);
        assert_eq!(stats.area_count, 2);
        assert!((stats.mean_score.unwrap() - 50.0).abs() < 1e-9);
        assert!((stats.stddev_score.unwrap() - 200.0_f64.sqrt()).abs() < 1e-9);

        let empty = VersionStats::from_scores(&[]);
        assert_eq!(empty.area_count, 0);
        assert!(empty.mean_score.is_none());
    }
}
