//! Grid cell coordinates.

use std::fmt;

use vetline_core::GeoPoint;

use crate::BoundingBox;

/// A fixed-size lat/lon cell, identified by the floor of each coordinate
/// divided by the cell size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCell {
    pub lat_idx: i32,
    pub lon_idx: i32,
}

impl GridCell {
    pub fn new(lat_idx: i32, lon_idx: i32) -> Self {
        Self { lat_idx, lon_idx }
    }

    /// Cell containing `point` for a grid of `cell_deg` degrees
    pub fn containing(point: &GeoPoint, cell_deg: f64) -> Self {
        Self {
            lat_idx: (point.lat / cell_deg).floor() as i32,
            lon_idx: (point.lon / cell_deg).floor() as i32,
        }
    }

    /// Every cell intersecting `bbox`, split at the antimeridian when the box wraps.
    pub fn covering(bbox: &BoundingBox, cell_deg: f64) -> Vec<GridCell> {
        let lat_lo = (bbox.min_lat / cell_deg).floor() as i32;
        let lat_hi = (bbox.max_lat / cell_deg).floor() as i32;

        let mut cells = Vec::new();
        for (lon_min, lon_max) in bbox.lon_ranges() {
            let lon_lo = (lon_min / cell_deg).floor() as i32;
            let lon_hi = (lon_max / cell_deg).floor() as i32;
            for lat_idx in lat_lo..=lat_hi {
                for lon_idx in lon_lo..=lon_hi {
                    cells.push(GridCell { lat_idx, lon_idx });
                }
            }
        }
        cells
    }

    /// Number of cells [`GridCell::covering`] would return, without allocating
    pub fn count_covering(bbox: &BoundingBox, cell_deg: f64) -> usize {
        let lat_cells = ((bbox.max_lat / cell_deg).floor() - (bbox.min_lat / cell_deg).floor())
            as usize
            + 1;
        bbox.lon_ranges()
            .into_iter()
            .map(|(lo, hi)| ((hi / cell_deg).floor() - (lo / cell_deg).floor()) as usize + 1)
            .sum::<usize>()
            * lat_cells
    }
}

impl fmt::Display for GridCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+}/{:+}", self.lat_idx, self.lon_idx)
    }
}
