//! Distance functions on the Earth's surface.
//!
//! Two families live here and they are intentionally kept apart:
//!
//! - [`geodesic_distance_m`] solves the inverse problem on the WGS-84
//!   ellipsoid (Vincenty). Candidate search uses it, where the radius
//!   boundary must be decided precisely.
//! - [`haversine_km`] is the spherical great-circle approximation used for
//!   display distances and travel-time fallbacks when no routing provider
//!   answers.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// WGS-84 semi-major axis in meters
pub const WGS84_A: f64 = 6_378_137.0;

/// WGS-84 flattening
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// WGS-84 semi-minor axis in meters
pub const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);

/// Mean Earth radius used by the spherical approximation, in kilometers
pub const MEAN_EARTH_RADIUS_KM: f64 = 6371.0;

const VINCENTY_MAX_ITERATIONS: usize = 200;
const VINCENTY_TOLERANCE: f64 = 1e-12;

/// Geographic point in decimal degrees.
///
/// Serialized in GeoJSON order as a `[lon, lat]` array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct GeoPoint {
    /// Longitude in degrees (-180 to 180)
    pub lon: f64,
    /// Latitude in degrees (-90 to 90)
    pub lat: f64,
}

impl GeoPoint {
    /// Create a point without validation
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Create a point, rejecting out-of-range or non-finite coordinates
    pub fn try_new(lon: f64, lat: f64) -> Result<Self> {
        let point = Self { lon, lat };
        point.validate()?;
        Ok(point)
    }

    /// Check coordinate ranges
    pub fn validate(&self) -> Result<()> {
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(Error::InvalidInput(format!(
                "Longitude must be between -180 and 180, got {}",
                self.lon
            )));
        }
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(Error::InvalidInput(format!(
                "Latitude must be between -90 and 90, got {}",
                self.lat
            )));
        }
        Ok(())
    }
}

impl From<[f64; 2]> for GeoPoint {
    fn from(coordinates: [f64; 2]) -> Self {
        Self::new(coordinates[0], coordinates[1])
    }
}

impl From<GeoPoint> for [f64; 2] {
    fn from(point: GeoPoint) -> Self {
        [point.lon, point.lat]
    }
}

/// Great-circle distance on a sphere of mean Earth radius, in kilometers.
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1_rad = a.lat.to_radians();
    let lat2_rad = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lon = (b.lon - a.lon).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);

    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    MEAN_EARTH_RADIUS_KM * c
}

/// Ellipsoidal (WGS-84) distance between two points, in meters.
pub fn geodesic_distance_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    // Only near-antipodal pairs fail to converge, and those are never inside
    // a search radius, so the spherical figure is an adequate stand-in.
    vincenty_inverse_m(a, b).unwrap_or_else(|| haversine_km(a, b) * 1000.0)
}

/// Vincenty's inverse formula. Returns `None` when the iteration does not converge.
pub fn vincenty_inverse_m(a: &GeoPoint, b: &GeoPoint) -> Option<f64> {
    let l = (b.lon - a.lon).to_radians();
    let u1 = ((1.0 - WGS84_F) * a.lat.to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * b.lat.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    let mut converged = false;
    let (mut sin_sigma, mut cos_sigma, mut sigma) = (0.0, 0.0, 0.0);
    let (mut cos_sq_alpha, mut cos_2sigma_m) = (0.0, 0.0);

    for _ in 0..VINCENTY_MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            // coincident points
            return Some(0.0);
        }
        cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        // equatorial line: cos_sq_alpha = 0
        cos_2sigma_m = if cos_sq_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        } else {
            0.0
        };
        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
        let lambda_prev = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));
        if (lambda - lambda_prev).abs() < VINCENTY_TOLERANCE {
            converged = true;
            break;
        }
    }

    if !converged {
        return None;
    }

    let u_sq = cos_sq_alpha * (WGS84_A.powi(2) - WGS84_B.powi(2)) / WGS84_B.powi(2);
    let big_a =
        1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
    let delta_sigma = big_b
        * sin_sigma
        * (cos_2sigma_m
            + big_b / 4.0
                * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                    - big_b / 6.0
                        * cos_2sigma_m
                        * (-3.0 + 4.0 * sin_sigma.powi(2))
                        * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));

    Some(WGS84_B * big_a * (sigma - delta_sigma))
}
