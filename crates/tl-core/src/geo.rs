//! Coordinates and great-circle distance.

use serde::{Deserialize, Serialize};

use crate::types::ValidationError;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Minimum distance between accepted track points.
///
/// Smaller steps are GPS jitter and are dropped outright.
pub const MIN_TRACK_STEP_M: f64 = 50.0;

/// A latitude/longitude pair without a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const ZERO: Self = Self { lat: 0.0, lng: 0.0 };

    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Checks that the pair is a usable position on Earth.
    pub fn validate(self) -> Result<Self, ValidationError> {
        let in_range = self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng);
        if in_range {
            Ok(self)
        } else {
            Err(ValidationError::InvalidCoordinate {
                lat: self.lat,
                lng: self.lng,
            })
        }
    }
}

/// A position fix from the location stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
    /// Unix time of the fix in milliseconds.
    pub timestamp: i64,
}

impl Coordinate {
    pub const fn new(lat: f64, lng: f64, timestamp: i64) -> Self {
        Self {
            lat,
            lng,
            timestamp,
        }
    }

    pub const fn at(position: LatLng, timestamp: i64) -> Self {
        Self::new(position.lat, position.lng, timestamp)
    }

    pub const fn lat_lng(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }
}

/// Haversine distance between two fixes in kilometres.
pub fn distance_km(a: &Coordinate, b: &Coordinate) -> f64 {
    haversine_km(a.lat_lng(), b.lat_lng())
}

/// Haversine distance between two positions in kilometres.
pub fn haversine_km(a: LatLng, b: LatLng) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Whether a step of `delta_km` from the last accepted point is real movement.
pub fn is_significant_step(delta_km: f64) -> bool {
    delta_km * 1000.0 >= MIN_TRACK_STEP_M
}

/// Default place name for a position: a map link to the coordinate.
pub fn maps_link(position: LatLng) -> String {
    format!(
        "https://www.google.com/maps?q={:.6},{:.6}",
        position.lat, position.lng
    )
}
