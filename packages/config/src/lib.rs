#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Operator scoring configuration.
//!
//! A single TOML document describes the indicator set, penalty rules,
//! sentinel areas, smoothing presets, and the publish policy. The default
//! document is baked into the binary via [`include_str!`]; operators can
//! point at their own file instead. Every document is fully validated before
//! anything reads it.

use std::collections::BTreeSet;
use std::path::Path;

use deso_score_indicator_models::{
    ConfigError, DEFAULT_DECAY_BASE, DecayFunction, Direction, Indicator, NormalizationMethod,
    NormalizationScope, PenaltyRule, PenaltyType, SentinelArea, SmoothingConfig,
};
use serde::Deserialize;

/// Default configuration embedded at compile time.
const DEFAULT_TOML: &str = include_str!("../default.toml");

/// Errors raised while loading a configuration document.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    /// The file could not be read.
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid TOML or has unknown enum values.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The document parsed but contains invalid values.
    #[error("Invalid config: {0}")]
    Invalid(#[from] ConfigError),
}

/// Scoring tunables.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ScoringParams {
    /// Minimum overlap fraction before a penalty applies to an area.
    #[serde(default = "default_overlap_threshold")]
    pub penalty_overlap_threshold: f64,
    /// Number of top positive/negative factor slugs stored per area.
    #[serde(default = "default_top_factors")]
    pub top_factors: usize,
    /// Absolute score change flagged by drift detection.
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: f64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            penalty_overlap_threshold: default_overlap_threshold(),
            top_factors: default_top_factors(),
            drift_threshold: default_drift_threshold(),
        }
    }
}

const fn default_overlap_threshold() -> f64 {
    0.10
}

const fn default_top_factors() -> usize {
    3
}

const fn default_drift_threshold() -> f64 {
    20.0
}

const fn default_true() -> bool {
    true
}

const fn default_decay_base() -> f64 {
    DEFAULT_DECAY_BASE
}

/// Whether failing sentinel checks block `publish`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PublishPolicy {
    /// When `false` (default) sentinel failures are reported but do not
    /// block publishing.
    #[serde(default)]
    pub require_passing_sentinels: bool,
}

/// One `[[indicators]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct IndicatorDef {
    /// Stable identifier.
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
    /// Defaults to `true`.
    #[serde(default = "default_true")]
    pub active: bool,
}

impl IndicatorDef {
    /// Converts to the domain type. The id is assigned by the database when
    /// the config is synced, so it is left at zero here.
    #[must_use]
    pub fn to_indicator(&self) -> Indicator {
        Indicator {
            id: 0,
            slug: self.slug.clone(),
            name: self.name.clone(),
            direction: self.direction,
            weight: self.weight,
            normalization: self.normalization,
            normalization_scope: self.normalization_scope,
            is_active: self.active,
        }
    }
}

/// One `[[penalties]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PenaltyDef {
    /// Stable identifier.
    pub slug: String,
    /// Display name.
    pub name: String,
    /// Display grouping.
    pub category: String,
    /// Absolute or percentage.
    pub penalty_type: PenaltyType,
    /// Negative magnitude.
    pub magnitude: f64,
    /// Geographic tier key.
    pub tier: String,
    /// Application order (ascending).
    pub display_order: i32,
    /// Defaults to `true`.
    #[serde(default = "default_true")]
    pub active: bool,
}

impl PenaltyDef {
    /// Converts to the domain type (id assigned on sync).
    #[must_use]
    pub fn to_rule(&self) -> PenaltyRule {
        PenaltyRule {
            id: 0,
            slug: self.slug.clone(),
            name: self.name.clone(),
            category: self.category.clone(),
            penalty_type: self.penalty_type,
            magnitude: self.magnitude,
            tier: self.tier.clone(),
            display_order: self.display_order,
            is_active: self.active,
        }
    }
}

/// One `[[sentinels]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct SentinelDef {
    /// Area code.
    pub area_code: String,
    /// Display name.
    pub name: String,
    /// Lowest acceptable score.
    pub expected_score_min: f64,
    /// Highest acceptable score.
    pub expected_score_max: f64,
    /// Informational tier.
    #[serde(default)]
    pub expected_tier: Option<String>,
    /// Defaults to `true`.
    #[serde(default = "default_true")]
    pub active: bool,
}

impl SentinelDef {
    /// Converts to the domain type.
    #[must_use]
    pub fn to_sentinel(&self) -> SentinelArea {
        SentinelArea {
            area_code: self.area_code.clone(),
            name: self.name.clone(),
            expected_score_min: self.expected_score_min,
            expected_score_max: self.expected_score_max,
            expected_tier: self.expected_tier.clone(),
            is_active: self.active,
        }
    }
}

/// One `[[smoothing]]` preset.
#[derive(Debug, Clone, Deserialize)]
pub struct SmoothingDef {
    /// Preset name.
    pub name: String,
    /// Weight of the cell's own score.
    pub self_weight: f64,
    /// Weight of the neighborhood average.
    pub neighbor_weight: f64,
    /// Neighborhood radius.
    pub k_rings: u32,
    /// Ring decay.
    pub decay_function: DecayFunction,
    /// Base for exponential decay.
    #[serde(default = "default_decay_base")]
    pub decay_base: f64,
    /// Whether this is the preset used by default.
    #[serde(default)]
    pub active: bool,
}

impl SmoothingDef {
    /// Converts to the domain type.
    #[must_use]
    pub fn to_config(&self) -> SmoothingConfig {
        SmoothingConfig {
            name: self.name.clone(),
            self_weight: self.self_weight,
            neighbor_weight: self.neighbor_weight,
            k_rings: self.k_rings,
            decay_function: self.decay_function,
            decay_base: self.decay_base,
            is_active: self.active,
        }
    }
}

/// A complete scoring configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// Scoring tunables.
    #[serde(default)]
    pub scoring: ScoringParams,
    /// Publish gate policy.
    #[serde(default)]
    pub publish: PublishPolicy,
    /// Indicator set.
    #[serde(default)]
    pub indicators: Vec<IndicatorDef>,
    /// Penalty rules.
    #[serde(default)]
    pub penalties: Vec<PenaltyDef>,
    /// Sentinel areas.
    #[serde(default)]
    pub sentinels: Vec<SentinelDef>,
    /// Smoothing presets.
    #[serde(default)]
    pub smoothing: Vec<SmoothingDef>,
}

impl ScoringConfig {
    /// Returns the embedded default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigLoadError`] if the embedded document fails to parse
    /// or validate.
    pub fn embedded() -> Result<Self, ConfigLoadError> {
        parse_config_toml(DEFAULT_TOML)
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigLoadError`] if the file cannot be read, parsed, or
    /// validated.
    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        let text = std::fs::read_to_string(path)?;
        let config = parse_config_toml(&text)?;
        log::info!(
            "Loaded config from {} ({} indicators, {} penalties, {} sentinels, {} smoothing presets)",
            path.display(),
            config.indicators.len(),
            config.penalties.len(),
            config.sentinels.len(),
            config.smoothing.len(),
        );
        Ok(config)
    }

    /// Loads `path` if given, otherwise the embedded default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigLoadError`] if loading fails.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        path.map_or_else(Self::embedded, Self::load)
    }

    /// Validates every entry plus cross-entry constraints (unique keys, at
    /// most one active smoothing preset).
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut slugs = BTreeSet::new();
        for def in &self.indicators {
            def.to_indicator().validate()?;
            if !slugs.insert(def.slug.as_str()) {
                return Err(ConfigError::Duplicate {
                    kind: "indicator",
                    key: def.slug.clone(),
                });
            }
        }

        let mut slugs = BTreeSet::new();
        for def in &self.penalties {
            def.to_rule().validate()?;
            if !slugs.insert(def.slug.as_str()) {
                return Err(ConfigError::Duplicate {
                    kind: "penalty",
                    key: def.slug.clone(),
                });
            }
        }

        let mut codes = BTreeSet::new();
        for def in &self.sentinels {
            def.to_sentinel().validate()?;
            if !codes.insert(def.area_code.as_str()) {
                return Err(ConfigError::Duplicate {
                    kind: "sentinel",
                    key: def.area_code.clone(),
                });
            }
        }

        let mut names = BTreeSet::new();
        for def in &self.smoothing {
            def.to_config().validate()?;
            if !names.insert(def.name.as_str()) {
                return Err(ConfigError::Duplicate {
                    kind: "smoothing preset",
                    key: def.name.clone(),
                });
            }
        }
        let active = self.smoothing.iter().filter(|s| s.active).count();
        if active > 1 {
            return Err(ConfigError::MultipleActiveSmoothing { count: active });
        }

        Ok(())
    }

    /// Domain indicators (ids unassigned).
    #[must_use]
    pub fn indicators(&self) -> Vec<Indicator> {
        self.indicators.iter().map(IndicatorDef::to_indicator).collect()
    }

    /// Domain penalty rules (ids unassigned).
    #[must_use]
    pub fn penalty_rules(&self) -> Vec<PenaltyRule> {
        self.penalties.iter().map(PenaltyDef::to_rule).collect()
    }

    /// Domain sentinel areas.
    #[must_use]
    pub fn sentinel_areas(&self) -> Vec<SentinelArea> {
        self.sentinels.iter().map(SentinelDef::to_sentinel).collect()
    }

    /// Domain smoothing presets.
    #[must_use]
    pub fn smoothing_configs(&self) -> Vec<SmoothingConfig> {
        self.smoothing.iter().map(SmoothingDef::to_config).collect()
    }
}

/// Parses and validates a TOML configuration document.
///
/// # Errors
///
/// Returns [`ConfigLoadError`] if the document fails to parse or validate.
pub fn parse_config_toml(toml_str: &str) -> Result<ScoringConfig, ConfigLoadError> {
    let config: ScoringConfig = toml::de::from_str(toml_str)?;
    config.validate()?;
    Ok(config)
}
