#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Spatial distribution of published area scores.
//!
//! Area polygons are loaded from `DuckDB` into an R-tree for point-in-polygon
//! lookups and used to build the area-to-cell mapping at the finest H3
//! resolution. Projection then takes the published version of a year,
//! assigns every mapped cell its primary area's score, blends it with its
//! ring neighbors, and aggregates the result up to the coarser resolutions.

pub mod aggregate;
pub mod mapping;
pub mod project;
pub mod smoothing;

use deso_score_database::{DbError, areas_db};
use deso_score_indicator_models::ConfigError;
use geo::{Contains, MultiPolygon};
use geojson::GeoJson;
use h3o::{CellIndex, LatLng, Resolution};
use rstar::{AABB, RTree, RTreeObject};

pub use mapping::{build_area_cells, build_cell_mapping};
pub use project::{ProjectionSummary, project_year};
pub use smoothing::smooth_cells;

/// Errors raised by the spatial stages.
#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    /// A stored value is not a valid H3 cell.
    #[error("Invalid H3 cell index {index:#x}")]
    InvalidCell {
        /// Offending value.
        index: u64,
    },

    /// Coordinates outside the valid lat/lng range.
    #[error("Invalid coordinates lat={lat}, lng={lng}")]
    InvalidCoordinates {
        /// Latitude.
        lat: f64,
        /// Longitude.
        lng: f64,
    },

    /// Not a valid H3 resolution.
    #[error("Invalid H3 resolution {resolution}")]
    InvalidResolution {
        /// Offending resolution.
        resolution: u8,
    },

    /// Projection only reads published scores.
    #[error("No published score version for {year}")]
    NoPublishedVersion {
        /// Requested year.
        year: i32,
    },

    /// Projection ran before the area-to-cell mapping was built.
    #[error("Area-to-cell mapping is empty; run build-cell-mapping first")]
    NoCellMapping,

    /// Invalid smoothing preset.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Database error.
    #[error(transparent)]
    Database(#[from] DbError),
}

/// Parses a stored H3 index.
///
/// # Errors
///
/// Returns [`SpatialError::InvalidCell`] if `index` is not a valid cell.
pub fn cell(index: u64) -> Result<CellIndex, SpatialError> {
    CellIndex::try_from(index).map_err(|_| SpatialError::InvalidCell { index })
}

/// Converts a stored resolution.
///
/// # Errors
///
/// Returns [`SpatialError::InvalidResolution`] if it is outside `0..=15`.
pub fn resolution(resolution: u8) -> Result<Resolution, SpatialError> {
    Resolution::try_from(resolution).map_err(|_| SpatialError::InvalidResolution { resolution })
}

/// Cell containing a WGS84 point.
///
/// # Errors
///
/// Returns [`SpatialError::InvalidCoordinates`] if the point is not valid.
pub fn cell_at(lng: f64, lat: f64, resolution: Resolution) -> Result<CellIndex, SpatialError> {
    LatLng::new(lat, lng)
        .map(|ll| ll.to_cell(resolution))
        .map_err(|_| SpatialError::InvalidCoordinates { lat, lng })
}

/// Cell center as `(lng, lat)`.
#[must_use]
pub fn cell_center(cell: CellIndex) -> (f64, f64) {
    let ll = LatLng::from(cell);
    (ll.lng(), ll.lat())
}

/// An area polygon stored in the R-tree.
pub(crate) struct AreaEntry {
    pub(crate) code: String,
    pub(crate) envelope: AABB<[f64; 2]>,
    pub(crate) polygon: MultiPolygon<f64>,
}

impl RTreeObject for AreaEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// R-tree over area boundary polygons.
pub struct AreaIndex {
    areas: RTree<AreaEntry>,
}

impl AreaIndex {
    /// Loads every area that has a boundary.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Database`] if the query fails.
    pub fn load(conn: &duckdb::Connection) -> Result<Self, SpatialError> {
        let index = Self::from_geojson(areas_db::load_area_boundaries(conn)?);
        log::info!("Loaded {} area polygons into spatial index", index.len());
        Ok(index)
    }

    /// Builds the index from `(area code, GeoJSON)` pairs, skipping
    /// boundaries that do not parse to a polygon.
    #[must_use]
    pub fn from_geojson(boundaries: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut entries = Vec::new();

        for (code, geojson_str) in boundaries {
            if code.is_empty() || geojson_str.is_empty() {
                continue;
            }

            let Some(polygon) = parse_geojson_to_multipolygon(&geojson_str) else {
                log::warn!("Failed to parse GeoJSON for area {code}");
                continue;
            };

            entries.push(AreaEntry {
                code,
                envelope: compute_envelope(&polygon),
                polygon,
            });
        }

        Self {
            areas: RTree::bulk_load(entries),
        }
    }

    /// Number of indexed areas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.areas.size()
    }

    /// Whether no area was indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.areas.size() == 0
    }

    /// Area containing a point.
    ///
    /// Areas tile the country without overlap; if bad geometry makes two
    /// match, the lowest code wins so the result is stable.
    #[must_use]
    pub fn lookup_area(&self, lng: f64, lat: f64) -> Option<&str> {
        let point = geo::Point::new(lng, lat);
        let query_env = AABB::from_point([lng, lat]);

        self.areas
            .locate_in_envelope_intersecting(&query_env)
            .filter(|entry| entry.polygon.contains(&point))
            .map(|entry| entry.code.as_str())
            .min()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &AreaEntry> {
        self.areas.iter()
    }
}

/// Parse a `GeoJSON` string into a [`MultiPolygon`].
/// Accepts a bare geometry or a feature wrapping one.
fn parse_geojson_to_multipolygon(geojson_str: &str) -> Option<MultiPolygon<f64>> {
    let geometry = match geojson_str.parse::<GeoJson>().ok()? {
        GeoJson::Geometry(geom) => geom,
        GeoJson::Feature(feature) => feature.geometry?,
        GeoJson::FeatureCollection(_) => return None,
    };

    let geo_geom: geo::Geometry<f64> = geometry.try_into().ok()?;
    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => None,
    }
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
fn compute_envelope(mp: &MultiPolygon<f64>) -> AABB<[f64; 2]> {
    use geo::BoundingRect;

    mp.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    /// GeoJSON polygon for an axis-aligned box.
    pub fn square(west: f64, south: f64, east: f64, north: f64) -> String {
        format!(
            r#"{{"type":"Polygon","coordinates":[[[{west},{south}],[{east},{south}],[{east},{north}],[{west},{north}],[{west},{south}]]]}}"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::square;
    use super::*;

    #[test]
    fn lookup_finds_containing_area() {
        let index = AreaIndex::from_geojson([
            ("A".to_string(), square(18.00, 59.30, 18.02, 59.32)),
            ("B".to_string(), square(18.02, 59.30, 18.04, 59.32)),
        ]);

        assert_eq!(index.len(), 2);
        assert_eq!(index.lookup_area(18.01, 59.31), Some("A"));
        assert_eq!(index.lookup_area(18.03, 59.31), Some("B"));
        assert_eq!(index.lookup_area(18.10, 59.31), None);
    }

    #[test]
    fn unparseable_boundaries_are_skipped() {
        let index = AreaIndex::from_geojson([
            ("A".to_string(), "not json".to_string()),
            (
                "B".to_string(),
                r#"{"type":"Point","coordinates":[18.0,59.3]}"#.to_string(),
            ),
            ("C".to_string(), square(18.00, 59.30, 18.02, 59.32)),
        ]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn feature_wrapped_geometry_is_accepted() {
        let feature = format!(
            r#"{{"type":"Feature","properties":{{}},"geometry":{}}}"#,
            square(18.00, 59.30, 18.02, 59.32)
        );
        let index = AreaIndex::from_geojson([("A".to_string(), feature)]);
        assert_eq!(index.lookup_area(18.01, 59.31), Some("A"));
    }

    #[test]
    fn cell_helpers_validate_input() {
        assert!(matches!(
            cell(0),
            Err(SpatialError::InvalidCell { index: 0 })
        ));
        assert!(matches!(
            resolution(16),
            Err(SpatialError::InvalidResolution { resolution: 16 })
        ));
        assert!(cell_at(18.0, 95.0, Resolution::Eight).is_err());

        let c = cell_at(18.06, 59.33, Resolution::Eight).unwrap();
        let (lng, lat) = cell_center(c);
        assert!((lng - 18.06).abs() < 0.01);
        assert!((lat - 59.33).abs() < 0.01);
        assert_eq!(cell(u64::from(c)).unwrap(), c);
    }
}
