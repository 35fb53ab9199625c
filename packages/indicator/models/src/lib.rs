#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Area, indicator, penalty, sentinel, and smoothing configuration types.
//!
//! These are the read-only inputs of the scoring pipeline. Areas and
//! observations come from ingestion; everything else is operator
//! configuration and is validated here before it is ever persisted. Invalid
//! configuration is rejected, never clamped.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Coarse urbanity classification of an area, used to stratify
/// normalization.
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
pub enum UrbanityClass {
    /// Dense urban areas
    Urban,
    /// Suburbs and small towns
    SemiUrban,
    /// Countryside
    Rural,
}

/// How an indicator's normalized value maps onto "good".
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
pub enum Direction {
    /// Higher raw values are better (income, education).
    Positive,
    /// Higher raw values are worse (crime, debt).
    Negative,
    /// Display-only; never contributes to a composite score.
    Neutral,
}

impl Direction {
    /// Converts a direction-agnostic normalized value into its effective
    /// contribution. Returns `None` for neutral indicators.
    #[must_use]
    pub fn effective(self, normalized: f64) -> Option<f64> {
        match self {
            Self::Positive => Some(normalized),
            Self::Negative => Some(1.0 - normalized),
            Self::Neutral => None,
        }
    }
}

/// Method used to map raw values onto `[0, 1]`.
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
pub enum NormalizationMethod {
    /// `(rank - 0.5) / n` with ties sharing their mean rank.
    RankPercentile,
    /// `(value - min) / (max - min)`; constant groups map to 0.5.
    MinMax,
    /// z-score clipped to ±3σ and rescaled linearly.
    ZScore,
}

/// Population an indicator is ranked against.
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
pub enum NormalizationScope {
    /// Every area in the country for that year.
    National,
    /// Only areas sharing the same [`UrbanityClass`].
    UrbanityStratified,
}

/// One statistical area. Geometry is kept as opaque `GeoJSON` text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    /// Stable area code (e.g. `"0114A0010"`).
    pub code: String,
    /// Display name.
    pub name: Option<String>,
    /// Resident population.
    pub population: Option<i64>,
    /// Urbanity class, if classified.
    pub urbanity: Option<UrbanityClass>,
}

/// A measured dimension with its scoring configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    /// Primary key.
    pub id: i64,
    /// Stable identifier (e.g. `"median_income"`).
    pub slug: String,
    /// Human-readable name.
    pub name: String,
    /// Which way is "good".
    pub direction: Direction,
    /// Relative weight in `[0, 1]`.
    pub weight: f64,
    /// Normalization method.
    pub normalization: NormalizationMethod,
    /// Normalization population.
    pub normalization_scope: NormalizationScope,
    /// Inactive indicators are neither normalized nor scored.
    pub is_active: bool,
}

impl Indicator {
    /// Whether this indicator can contribute to a composite score.
    #[must_use]
    pub fn is_scoreable(&self) -> bool {
        self.is_active && self.direction != Direction::Neutral
    }

    /// Validates operator-supplied values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the slug is empty or the weight is outside
    /// `[0, 1]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slug.trim().is_empty() {
            return Err(ConfigError::EmptySlug { kind: "indicator" });
        }
        if !self.weight.is_finite() || !(0.0..=1.0).contains(&self.weight) {
            return Err(ConfigError::WeightOutOfRange {
                slug: self.slug.clone(),
                weight: self.weight,
            });
        }
        Ok(())
    }
}

/// One raw value reported by ingestion, plus the normalized value this
/// core attaches to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorObservation {
    /// Indicator this value belongs to.
    pub indicator_id: i64,
    /// Area the value was measured for.
    pub area_code: String,
    /// Reference year.
    pub year: i32,
    /// Raw value; `None` means the agency reported nothing.
    pub raw_value: Option<f64>,
    /// Normalized value in `[0, 1]`, `None` until normalized or when the raw
    /// value is missing.
    pub normalized_value: Option<f64>,
}

/// How a penalty's magnitude is applied to the running score.
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
pub enum PenaltyType {
    /// `running += magnitude`
    Absolute,
    /// `running += running * magnitude / 100`
    Percentage,
}

/// A configured deduction tied to overlap with a geographic tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyRule {
    /// Primary key.
    pub id: i64,
    /// Stable identifier (e.g. `"vuln_utsatt"`).
    pub slug: String,
    /// Human-readable name.
    pub name: String,
    /// Grouping used for display (e.g. `"vulnerability"`).
    pub category: String,
    /// Absolute or percentage.
    pub penalty_type: PenaltyType,
    /// Stored as a negative number.
    pub magnitude: f64,
    /// Geographic tier key matched against area overlaps.
    pub tier: String,
    /// Application order (ascending).
    pub display_order: i32,
    /// Inactive rules are ignored.
    pub is_active: bool,
}

impl PenaltyRule {
    /// Validates operator-supplied values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the slug or tier is empty, or the magnitude
    /// would increase a score (or, for percentages, remove more than 100%).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slug.trim().is_empty() {
            return Err(ConfigError::EmptySlug { kind: "penalty" });
        }
        if self.tier.trim().is_empty() {
            return Err(ConfigError::EmptyTier {
                slug: self.slug.clone(),
            });
        }
        let valid = self.magnitude.is_finite()
            && match self.penalty_type {
                PenaltyType::Absolute => self.magnitude <= 0.0,
                PenaltyType::Percentage => (-100.0..=0.0).contains(&self.magnitude),
            };
        if !valid {
            return Err(ConfigError::InvalidPenaltyMagnitude {
                slug: self.slug.clone(),
                penalty_type: self.penalty_type,
                magnitude: self.magnitude,
            });
        }
        Ok(())
    }
}

/// Fraction of an area overlapping a designated geographic tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaVulnerabilityOverlap {
    /// Area code.
    pub area_code: String,
    /// Tier key (e.g. `"sarskilt_utsatt"`).
    pub tier: String,
    /// Overlap fraction in `[0, 1]`.
    pub overlap_fraction: f64,
}

/// A known-answer area used to sanity check a new score version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentinelArea {
    /// Area code.
    pub area_code: String,
    /// Display name.
    pub name: String,
    /// Lowest acceptable score.
    pub expected_score_min: f64,
    /// Highest acceptable score.
    pub expected_score_max: f64,
    /// Expected verdict tier, informational only.
    pub expected_tier: Option<String>,
    /// Inactive sentinels are skipped.
    pub is_active: bool,
}

impl SentinelArea {
    /// Validates operator-supplied values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSentinelRange`] if the range is empty or
    /// outside `[0, 100]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let in_bounds = |v: f64| v.is_finite() && (0.0..=100.0).contains(&v);
        if !in_bounds(self.expected_score_min)
            || !in_bounds(self.expected_score_max)
            || self.expected_score_min > self.expected_score_max
        {
            return Err(ConfigError::InvalidSentinelRange {
                area_code: self.area_code.clone(),
                min: self.expected_score_min,
                max: self.expected_score_max,
            });
        }
        Ok(())
    }

    /// Whether `score` falls inside the expected range (inclusive).
    #[must_use]
    pub fn accepts(&self, score: f64) -> bool {
        score >= self.expected_score_min && score <= self.expected_score_max
    }
}

/// Rule mapping ring distance to relative smoothing weight.
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
pub enum DecayFunction {
    /// Every ring weighs the same.
    Uniform,
    /// Weight ∝ `k + 1 - r`.
    Linear,
    /// Weight ∝ `exp(-(r / k)² / 2)`.
    Gaussian,
    /// Weight ∝ `baseʳ`.
    Exponential,
}

impl DecayFunction {
    /// Relative (unnormalized) weight of ring `ring` out of `k_rings`.
    #[must_use]
    pub fn ring_weight(self, ring: u32, k_rings: u32, base: f64) -> f64 {
        let r = f64::from(ring);
        let k = f64::from(k_rings.max(1));
        match self {
            Self::Uniform => 1.0,
            Self::Linear => k + 1.0 - r,
            Self::Gaussian => (-(r / k).powi(2) / 2.0).exp(),
            Self::Exponential => base.powi(i32::try_from(ring).unwrap_or(i32::MAX)),
        }
    }
}

/// Default base for [`DecayFunction::Exponential`].
pub const DEFAULT_DECAY_BASE: f64 = 0.5;

/// Largest accepted smoothing radius. At the finest resolution five rings
/// already span several kilometres.
pub const MAX_K_RINGS: u32 = 5;

/// Spatial blend tuning for hex smoothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothingConfig {
    /// Preset name (e.g. `"Light"`).
    pub name: String,
    /// Weight of the cell's own raw score.
    pub self_weight: f64,
    /// Weight of the neighborhood average.
    pub neighbor_weight: f64,
    /// Neighborhood radius in rings.
    pub k_rings: u32,
    /// Ring-distance decay.
    pub decay_function: DecayFunction,
    /// Base for exponential decay.
    pub decay_base: f64,
    /// Only the active preset is used by default.
    pub is_active: bool,
}

impl SmoothingConfig {
    /// Whether smoothing degenerates to copying raw scores.
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        self.k_rings == 0 || self.neighbor_weight == 0.0
    }

    /// Validates operator-supplied values. `self_weight + neighbor_weight`
    /// is conventionally 1 but not enforced.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a weight is outside `[0, 1]`, `k_rings`
    /// exceeds [`MAX_K_RINGS`], or the exponential base is not positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("self_weight", self.self_weight),
            ("neighbor_weight", self.neighbor_weight),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::SmoothingWeightOutOfRange {
                    name: self.name.clone(),
                    field,
                    value,
                });
            }
        }
        if self.k_rings > MAX_K_RINGS {
            return Err(ConfigError::TooManyRings {
                name: self.name.clone(),
                k_rings: self.k_rings,
            });
        }
        if self.decay_function == DecayFunction::Exponential
            && (!self.decay_base.is_finite() || self.decay_base <= 0.0)
        {
            return Err(ConfigError::InvalidDecayBase {
                name: self.name.clone(),
                base: self.decay_base,
            });
        }
        Ok(())
    }
}

/// Configuration rejected at load time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A slug (or other identifying key) is blank.
    #[error("{kind} has an empty slug")]
    EmptySlug {
        /// What kind of row was being validated.
        kind: &'static str,
    },

    /// Two rows share the same identifying key.
    #[error("duplicate {kind} `{key}`")]
    Duplicate {
        /// What kind of row was being validated.
        kind: &'static str,
        /// The repeated key.
        key: String,
    },

    /// Indicator weight outside `[0, 1]`.
    #[error("indicator `{slug}` weight {weight} is outside [0, 1]")]
    WeightOutOfRange {
        /// Indicator slug.
        slug: String,
        /// Offending weight.
        weight: f64,
    },

    /// Penalty rule without a tier key.
    #[error("penalty `{slug}` has no geographic tier")]
    EmptyTier {
        /// Penalty slug.
        slug: String,
    },

    /// Penalty magnitude that is positive or otherwise nonsensical.
    #[error("penalty `{slug}` has invalid {penalty_type} magnitude {magnitude}")]
    InvalidPenaltyMagnitude {
        /// Penalty slug.
        slug: String,
        /// Penalty type.
        penalty_type: PenaltyType,
        /// Offending magnitude.
        magnitude: f64,
    },

    /// Sentinel range that is empty or outside `[0, 100]`.
    #[error("sentinel `{area_code}` has invalid range [{min}, {max}]")]
    InvalidSentinelRange {
        /// Sentinel area code.
        area_code: String,
        /// Configured minimum.
        min: f64,
        /// Configured maximum.
        max: f64,
    },

    /// Smoothing weight outside `[0, 1]`.
    #[error("smoothing preset `{name}` {field} {value} is outside [0, 1]")]
    SmoothingWeightOutOfRange {
        /// Preset name.
        name: String,
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: f64,
    },

    /// Smoothing radius above [`MAX_K_RINGS`].
    #[error("smoothing preset `{name}` k_rings {k_rings} exceeds {max}", max = MAX_K_RINGS)]
    TooManyRings {
        /// Preset name.
        name: String,
        /// Offending radius.
        k_rings: u32,
    },

    /// Exponential decay base that is not positive.
    #[error("smoothing preset `{name}` has invalid decay base {base}")]
    InvalidDecayBase {
        /// Preset name.
        name: String,
        /// Offending base.
        base: f64,
    },

    /// More than one smoothing preset is marked active.
    #[error("{count} smoothing presets are active; expected at most one")]
    MultipleActiveSmoothing {
        /// Number of active presets.
        count: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indicator(weight: f64) -> Indicator {
        Indicator {
            id: 1,
            slug: "median_income".to_string(),
            name: "Median income".to_string(),
            direction: Direction::Positive,
            weight,
            normalization: NormalizationMethod::RankPercentile,
            normalization_scope: NormalizationScope::National,
            is_active: true,
        }
    }

    #[test]
    fn parses_snake_case_enums() {
        assert_eq!(
            "rank_percentile".parse::<NormalizationMethod>().unwrap(),
            NormalizationMethod::RankPercentile
        );
        assert_eq!(
            "urbanity_stratified".parse::<NormalizationScope>().unwrap(),
            NormalizationScope::UrbanityStratified
        );
        assert_eq!(
            "semi_urban".parse::<UrbanityClass>().unwrap(),
            UrbanityClass::SemiUrban
        );
        assert_eq!(DecayFunction::Exponential.as_ref(), "exponential");
    }

    #[test]
    fn rejects_unknown_normalization_method() {
        assert!("quantile".parse::<NormalizationMethod>().is_err());
    }

    #[test]
    fn negative_direction_inverts() {
        assert_eq!(Direction::Negative.effective(0.9), Some(1.0 - 0.9));
        assert_eq!(Direction::Positive.effective(0.9), Some(0.9));
        assert_eq!(Direction::Neutral.effective(0.9), None);
    }

    #[test]
    fn rejects_weight_out_of_range() {
        assert!(indicator(0.5).validate().is_ok());
        assert!(indicator(0.0).validate().is_ok());
        assert!(matches!(
            indicator(1.2).validate(),
            Err(ConfigError::WeightOutOfRange { .. })
        ));
        assert!(indicator(-0.1).validate().is_err());
        assert!(indicator(f64::NAN).validate().is_err());
    }

    #[test]
    fn neutral_indicators_are_not_scoreable() {
        let mut ind = indicator(0.5);
        assert!(ind.is_scoreable());
        ind.direction = Direction::Neutral;
        assert!(!ind.is_scoreable());
        ind.direction = Direction::Positive;
        ind.is_active = false;
        assert!(!ind.is_scoreable());
    }

    #[test]
    fn rejects_positive_penalty() {
        let mut rule = PenaltyRule {
            id: 1,
            slug: "vuln_utsatt".to_string(),
            name: "Utsatt".to_string(),
            category: "vulnerability".to_string(),
            penalty_type: PenaltyType::Absolute,
            magnitude: -8.0,
            tier: "utsatt".to_string(),
            display_order: 2,
            is_active: true,
        };
        assert!(rule.validate().is_ok());
        rule.magnitude = 5.0;
        assert!(rule.validate().is_err());
        rule.penalty_type = PenaltyType::Percentage;
        rule.magnitude = -150.0;
        assert!(rule.validate().is_err());
    }

    #[test]
    fn linear_decay_favours_inner_rings() {
        let inner = DecayFunction::Linear.ring_weight(1, 2, DEFAULT_DECAY_BASE);
        let outer = DecayFunction::Linear.ring_weight(2, 2, DEFAULT_DECAY_BASE);
        assert!((inner - 2.0).abs() < f64::EPSILON);
        assert!((outer - 1.0).abs() < f64::EPSILON);

        let exp1 = DecayFunction::Exponential.ring_weight(1, 3, 0.5);
        let exp2 = DecayFunction::Exponential.ring_weight(2, 3, 0.5);
        assert!((exp1 - 0.5).abs() < f64::EPSILON);
        assert!((exp2 - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn sentinel_range_is_inclusive() {
        let sentinel = SentinelArea {
            area_code: "0180C1090".to_string(),
            name: "Danderyd".to_string(),
            expected_score_min: 70.0,
            expected_score_max: 95.0,
            expected_tier: None,
            is_active: true,
        };
        assert!(sentinel.validate().is_ok());
        assert!(sentinel.accepts(70.0));
        assert!(sentinel.accepts(95.0));
        assert!(!sentinel.accepts(69.99));
    }

    #[test]
    fn passthrough_smoothing() {
        let config = SmoothingConfig {
            name: "None".to_string(),
            self_weight: 1.0,
            neighbor_weight: 0.0,
            k_rings: 0,
            decay_function: DecayFunction::Linear,
            decay_base: DEFAULT_DECAY_BASE,
            is_active: false,
        };
        assert!(config.is_passthrough());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_oversized_smoothing_radius() {
        let mut config = SmoothingConfig {
            name: "Wide".to_string(),
            self_weight: 0.5,
            neighbor_weight: 0.5,
            k_rings: MAX_K_RINGS,
            decay_function: DecayFunction::Gaussian,
            decay_base: DEFAULT_DECAY_BASE,
            is_active: true,
        };
        assert!(config.validate().is_ok());

        config.k_rings = 500;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooManyRings { k_rings: 500, .. })
        ));
    }
}
