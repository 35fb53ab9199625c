#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Hexagonal cell score rows and viewport query parameters.
//!
//! Cells are H3 indexes stored as their raw `u64` value. The serving layer
//! always asks for an explicit resolution and an explicit [`ScoreField`];
//! nothing here infers a resolution from a viewport.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Resolution scores are projected and smoothed at (~0.74 km² per cell).
pub const FINEST_RESOLUTION: u8 = 8;

/// Coarser resolutions aggregated bottom-up from [`FINEST_RESOLUTION`].
pub const COARSE_RESOLUTIONS: &[u8] = &[5, 6, 7];

/// A geographic bounding box in WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western longitude boundary.
    pub west: f64,
    /// Southern latitude boundary.
    pub south: f64,
    /// Eastern longitude boundary.
    pub east: f64,
    /// Northern latitude boundary.
    pub north: f64,
}

impl BoundingBox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Whether the point lies inside the box (edges inclusive).
    #[must_use]
    pub fn contains(&self, lng: f64, lat: f64) -> bool {
        lng >= self.west && lng <= self.east && lat >= self.south && lat <= self.north
    }
}

/// Which score column a viewport query returns.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScoreField {
    /// The primary area's composite score.
    Raw,
    /// The neighbor-blended score.
    #[default]
    Smoothed,
}

impl ScoreField {
    /// Column name in `hex_scores`.
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Raw => "score_raw",
            Self::Smoothed => "score_smoothed",
        }
    }
}

/// One grid cell's score for one year at one resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HexCellScore {
    /// H3 cell index.
    pub h3_index: u64,
    /// H3 resolution of the cell.
    pub resolution: u8,
    /// Reference year.
    pub year: i32,
    /// Score of the primary area (or mean of children for coarse cells).
    pub score_raw: Option<f64>,
    /// Neighbor-blended score (or mean of children for coarse cells).
    pub score_smoothed: Option<f64>,
    /// Neighbor weight actually applied.
    pub smoothing_factor: f64,
    /// Year-over-year change.
    pub trend_1y: Option<f64>,
    /// Area the cell's raw score came from; `None` for coarse cells.
    pub primary_area_code: Option<String>,
    /// Published version the scores were taken from.
    pub score_version_id: i64,
    /// Cell center longitude.
    pub center_lng: f64,
    /// Cell center latitude.
    pub center_lat: f64,
}

/// One row of the area-to-cell mapping at the finest resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaCell {
    /// H3 cell index.
    pub h3_index: u64,
    /// Area the cell is attributed to.
    pub area_code: String,
    /// Share of the cell attributed to the area, in `(0, 1]`.
    pub area_weight: f64,
}

/// A viewport query result: one cell and the requested score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HexScoreValue {
    /// H3 cell index.
    pub h3_index: u64,
    /// Requested score column.
    pub score: Option<f64>,
    /// Year-over-year change.
    pub trend_1y: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_contains_edges() {
        let bbox = BoundingBox::new(17.9, 59.2, 18.2, 59.4);
        assert!(bbox.contains(18.0, 59.3));
        assert!(bbox.contains(17.9, 59.2));
        assert!(!bbox.contains(18.3, 59.3));
    }

    #[test]
    fn score_field_maps_to_column() {
        assert_eq!(ScoreField::Raw.column(), "score_raw");
        assert_eq!(ScoreField::default().column(), "score_smoothed");
        assert_eq!("raw".parse::<ScoreField>().unwrap(), ScoreField::Raw);
    }
}
