//! Builds the area-to-cell mapping at the finest resolution.
//!
//! A cell belongs to the area containing its center. Candidates come from a
//! grid disk around each area's bounding box, so large rural areas are
//! covered without scanning the whole country.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use deso_score_database::hex_db;
use deso_score_progress::ProgressCallback;
use deso_score_spatial_models::{AreaCell, FINEST_RESOLUTION};
use duckdb::Connection;
use geo::{Centroid, Contains};
use h3o::{CellIndex, Resolution};
use rayon::prelude::*;

use crate::{AreaEntry, AreaIndex, SpatialError, cell_at, cell_center, resolution};

/// Weight of a cell claimed by center containment.
pub const CONTAINMENT_WEIGHT: f64 = 1.0;

/// Weight of the centroid cell given to an area too small to contain any
/// cell center. Lower than [`CONTAINMENT_WEIGHT`] so the area that actually
/// contains the cell center stays primary.
pub const CENTROID_FALLBACK_WEIGHT: f64 = 0.5;

/// Maps every indexed area onto cells at `resolution`, sorted by cell then
/// area code.
#[must_use]
pub fn build_area_cells(index: &AreaIndex, resolution: Resolution) -> Vec<AreaCell> {
    let entries: Vec<&AreaEntry> = index.entries().collect();

    let candidates: BTreeSet<u64> = entries
        .par_iter()
        .flat_map_iter(|entry| candidate_cells(entry, resolution))
        .collect();
    log::debug!("{} candidate cells at resolution {resolution}", candidates.len());

    let mut cells: Vec<AreaCell> = candidates
        .par_iter()
        .filter_map(|&h3_index| {
            let (lng, lat) = cell_center(CellIndex::try_from(h3_index).ok()?);
            let code = index.lookup_area(lng, lat)?;
            Some(AreaCell {
                h3_index,
                area_code: code.to_string(),
                area_weight: CONTAINMENT_WEIGHT,
            })
        })
        .collect();

    let covered: HashSet<&str> = cells.iter().map(|c| c.area_code.as_str()).collect();
    let fallbacks: Vec<AreaCell> = entries
        .iter()
        .filter(|entry| !covered.contains(entry.code.as_str()))
        .filter_map(|entry| {
            let centroid = entry.polygon.centroid()?;
            match cell_at(centroid.x(), centroid.y(), resolution) {
                Ok(cell) => Some(AreaCell {
                    h3_index: u64::from(cell),
                    area_code: entry.code.clone(),
                    area_weight: CENTROID_FALLBACK_WEIGHT,
                }),
                Err(e) => {
                    log::warn!("Area {} has no usable centroid: {e}", entry.code);
                    None
                }
            }
        })
        .collect();

    if !fallbacks.is_empty() {
        log::info!(
            "{} areas too small for a cell center; assigned their centroid cell",
            fallbacks.len()
        );
    }

    cells.extend(fallbacks);
    cells.sort_by(|a, b| {
        a.h3_index
            .cmp(&b.h3_index)
            .then_with(|| a.area_code.cmp(&b.area_code))
    });
    cells
}

/// Cells in a disk around the area's bounding box whose center lies inside
/// the area polygon.
fn candidate_cells(entry: &AreaEntry, resolution: Resolution) -> Vec<u64> {
    let [west, south] = entry.envelope.lower();
    let [east, north] = entry.envelope.upper();

    let Ok(center) = cell_at((west + east) / 2.0, (south + north) / 2.0, resolution) else {
        log::warn!("Area {} has an invalid bounding box", entry.code);
        return Vec::new();
    };

    let radius = [(west, south), (west, north), (east, south), (east, north)]
        .into_iter()
        .filter_map(|(lng, lat)| cell_at(lng, lat, resolution).ok())
        .filter_map(|corner| center.grid_distance(corner).ok())
        .max()
        .unwrap_or(0);
    let k = u32::try_from(radius).unwrap_or(0) + 1;

    center
        .grid_disk::<Vec<_>>(k)
        .into_iter()
        .filter(|cell| {
            let (lng, lat) = cell_center(*cell);
            entry.polygon.contains(&geo::Point::new(lng, lat))
        })
        .map(u64::from)
        .collect()
}

/// Rebuilds `area_cells` from the stored area boundaries.
///
/// # Errors
///
/// Returns [`SpatialError`] if loading or storing fails.
pub fn build_cell_mapping(
    conn: &Connection,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<u64, SpatialError> {
    let index = AreaIndex::load(conn)?;
    progress.set_total(2);
    progress.set_message(format!("Mapping {} areas onto cells", index.len()));

    let cells = build_area_cells(&index, resolution(FINEST_RESOLUTION)?);
    progress.inc(1);

    let areas: HashSet<&str> = cells.iter().map(|c| c.area_code.as_str()).collect();
    log::info!(
        "Mapped {} of {} areas onto {} cells",
        areas.len(),
        index.len(),
        cells.len()
    );

    let stored = hex_db::replace_area_cells(conn, &cells)?;
    progress.inc(1);
    progress.finish(format!("Stored {stored} area-cell rows"));

    Ok(stored)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use deso_score_database::{areas_db, open_in_memory};
    use deso_score_indicator_models::Area;
    use deso_score_progress::null_progress;

    use super::*;
    use crate::test_support::square;

    fn index() -> AreaIndex {
        AreaIndex::from_geojson([
            ("A".to_string(), square(18.00, 59.30, 18.03, 59.32)),
            ("B".to_string(), square(18.03, 59.30, 18.06, 59.32)),
            // Far smaller than a resolution-8 cell.
            ("C".to_string(), square(18.2000, 59.4000, 18.2002, 59.4001)),
        ])
    }

    #[test]
    fn every_area_gets_cells_and_contained_cells_are_unique() {
        let cells = build_area_cells(&index(), Resolution::Eight);

        let mut per_area: BTreeMap<&str, usize> = BTreeMap::new();
        for cell in &cells {
            *per_area.entry(cell.area_code.as_str()).or_default() += 1;
        }
        assert!(per_area["A"] > 1);
        assert!(per_area["B"] > 1);
        assert_eq!(per_area["C"], 1);

        let contained: Vec<u64> = cells
            .iter()
            .filter(|c| (c.area_weight - CONTAINMENT_WEIGHT).abs() < f64::EPSILON)
            .map(|c| c.h3_index)
            .collect();
        let unique: BTreeSet<u64> = contained.iter().copied().collect();
        assert_eq!(unique.len(), contained.len());
    }

    #[test]
    fn tiny_area_gets_its_centroid_cell() {
        let cells = build_area_cells(&index(), Resolution::Eight);
        let c = cells.iter().find(|c| c.area_code == "C").unwrap();

        let expected = cell_at(18.2001, 59.40005, Resolution::Eight).unwrap();
        assert_eq!(c.h3_index, u64::from(expected));
        assert!((c.area_weight - CENTROID_FALLBACK_WEIGHT).abs() < f64::EPSILON);
    }

    #[test]
    fn cell_centers_fall_inside_their_area() {
        let index = index();
        for cell in build_area_cells(&index, Resolution::Eight)
            .iter()
            .filter(|c| c.area_code != "C")
        {
            let (lng, lat) = cell_center(CellIndex::try_from(cell.h3_index).unwrap());
            assert_eq!(index.lookup_area(lng, lat), Some(cell.area_code.as_str()));
        }
    }

    #[test]
    fn mapping_is_built_from_stored_boundaries() {
        let conn = open_in_memory().unwrap();
        for (code, geojson) in [
            ("A", square(18.00, 59.30, 18.03, 59.32)),
            ("B", square(18.03, 59.30, 18.06, 59.32)),
        ] {
            areas_db::upsert_area(
                &conn,
                &Area {
                    code: code.to_string(),
                    name: None,
                    population: None,
                    urbanity: None,
                },
                Some(geojson.as_str()),
            )
            .unwrap();
        }

        let stored = build_cell_mapping(&conn, &null_progress()).unwrap();
        let cells = hex_db::load_area_cells(&conn).unwrap();
        assert_eq!(u64::try_from(cells.len()).unwrap(), stored);
        assert!(cells.iter().any(|c| c.area_code == "A"));
        assert!(cells.iter().any(|c| c.area_code == "B"));
    }
}
