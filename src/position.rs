//! Validated geographic positions.
//!
//! Every APRS position decoder (uncompressed, compressed, MIC-E, NMEA) ends in
//! [`fill_position`], so the sanity checks and the `cos(lat)` precomputation
//! live in exactly one place.

use std::fmt;

/// Mean earth radius used by the range helper.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Coordinates closer than this to an axis are treated as "zero".
const NULL_EPSILON: f64 = 0.0001;

/// A validated position, stored in radians with `cos(lat)` precomputed for
/// range filters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// Latitude in radians, north positive
    pub lat: f64,
    /// Longitude in radians, east positive
    pub lon: f64,
    /// cos(lat), cached
    pub cos_lat: f64,
}

impl Position {
    pub fn lat_degrees(&self) -> f64 {
        self.lat.to_degrees()
    }

    pub fn lon_degrees(&self) -> f64 {
        self.lon.to_degrees()
    }

    /// Approximate distance in kilometers.
    ///
    /// Equirectangular projection around the mean latitude, using the cached
    /// cosines. Good to well under a percent at APRS filter ranges.
    pub fn distance_km(&self, other: &Position) -> f64 {
        let mean_cos = (self.cos_lat + other.cos_lat) / 2.0;
        let mut dlon = other.lon - self.lon;
        if dlon > std::f64::consts::PI {
            dlon -= std::f64::consts::TAU;
        } else if dlon < -std::f64::consts::PI {
            dlon += std::f64::consts::TAU;
        }
        let x = dlon * mean_cos;
        let y = other.lat - self.lat;
        (x * x + y * y).sqrt() * EARTH_RADIUS_KM
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5},{:.5}", self.lat_degrees(), self.lon_degrees())
    }
}

/// Validate decoded degrees and turn them into a [`Position`].
///
/// Returns `None` for coordinates outside `[-90,90]x[-180,180]`, for
/// non-finite values, and for the "null island" family of corrupt values:
/// both axes near zero, a pole with a near-zero longitude, or a near-zero
/// latitude with the longitude sitting on +-90 or +-180.
pub fn fill_position(lat: f64, lon: f64) -> Option<Position> {
    if !lat.is_finite() || !lon.is_finite() {
        return None;
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }

    let near = |v: f64, target: f64| (v - target).abs() <= NULL_EPSILON;
    let lon_near_zero = near(lon, 0.0);

    let mut bad = (lat < -89.9 || lat > 89.9) && lon_near_zero;
    if near(lat, 0.0) {
        bad |= lon_near_zero;
        bad |= (lon.abs() - 90.0).abs() <= 0.01;
        bad |= (lon.abs() - 180.0).abs() <= 0.01;
    }
    if bad {
        return None;
    }

    let lat = lat.to_radians();
    Some(Position {
        lat,
        lon: lon.to_radians(),
        cos_lat: lat.cos(),
    })
}
