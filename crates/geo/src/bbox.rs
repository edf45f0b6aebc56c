//! Conservative lat/lon windows around a search circle.
//!
//! A [`BoundingBox`] always contains every point whose geodesic distance
//! from the center is within the radius. It is a prefilter only; callers
//! refine candidates with the exact distance.

use vetline_core::GeoPoint;

/// Shortest length of one degree of latitude on WGS-84 (at the equator), in meters
const MIN_METERS_PER_DEG_LAT: f64 = 110_574.0;

/// Length of one degree of longitude on the equator, in meters
const METERS_PER_DEG_LON_EQUATOR: f64 = 111_319.49;

/// Safety margin applied to both spans
const SPAN_MARGIN: f64 = 1.01;

/// Latitude beyond which the window covers every longitude
const POLAR_CAP_DEG: f64 = 89.5;

/// Lat/lon window. When `min_lon > max_lon` the window crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Smallest window of this shape that contains the circle of `radius_m` around `center`
    pub fn around(center: &GeoPoint, radius_m: f64) -> Self {
        let lat_span = radius_m / MIN_METERS_PER_DEG_LAT * SPAN_MARGIN;
        let min_lat = (center.lat - lat_span).max(-90.0);
        let max_lat = (center.lat + lat_span).min(90.0);

        let poleward = min_lat.abs().max(max_lat.abs());
        if poleward >= POLAR_CAP_DEG {
            return Self::full_longitude(min_lat, max_lat);
        }

        let lon_span =
            radius_m / (METERS_PER_DEG_LON_EQUATOR * poleward.to_radians().cos()) * SPAN_MARGIN;
        if lon_span >= 180.0 {
            return Self::full_longitude(min_lat, max_lat);
        }

        let mut min_lon = center.lon - lon_span;
        let mut max_lon = center.lon + lon_span;
        if min_lon < -180.0 {
            min_lon += 360.0;
        }
        if max_lon > 180.0 {
            max_lon -= 360.0;
        }

        Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    fn full_longitude(min_lat: f64, max_lat: f64) -> Self {
        Self {
            min_lat,
            max_lat,
            min_lon: -180.0,
            max_lon: 180.0,
        }
    }

    /// Whether the window crosses the antimeridian
    pub fn wraps(&self) -> bool {
        self.min_lon > self.max_lon
    }

    /// Longitude intervals covered by the window (one, or two when wrapping)
    pub fn lon_ranges(&self) -> Vec<(f64, f64)> {
        if self.wraps() {
            vec![(self.min_lon, 180.0), (-180.0, self.max_lon)]
        } else {
            vec![(self.min_lon, self.max_lon)]
        }
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        if point.lat < self.min_lat || point.lat > self.max_lat {
            return false;
        }
        self.lon_ranges()
            .into_iter()
            .any(|(lo, hi)| point.lon >= lo && point.lon <= hi)
    }
}
