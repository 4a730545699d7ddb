//! Geographic primitives: validated coordinates, great-circle distance, and
//! the operating-region containment check.
//!
//! Distance is plain haversine over raw latitude/longitude. The matcher scans
//! a bounded recent-location set, so no spatial index is kept.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A validated WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    /// Build a coordinate, rejecting NaN and out-of-range values.
    pub fn new(lat: f64, lng: f64) -> Result<Self, EngineError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(EngineError::Validation(format!(
                "latitude {lat} outside [-90, 90]"
            )));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(EngineError::Validation(format!(
                "longitude {lng} outside [-180, 180]"
            )));
        }
        Ok(Self { lat, lng })
    }
}

/// Haversine distance in kilometres between two points.
pub fn distance_km(a: Coordinate, b: Coordinate) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Operating region expressed as the bounding box of its boundary polygon.
///
/// Containment is a bounding-box test, not full point-in-polygon; the region
/// check is a soft advisory filter unless enforcement is switched on in the
/// engine config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatingRegion {
    pub name: String,
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl OperatingRegion {
    /// Bounding box of the given boundary vertices.
    pub fn from_vertices(name: impl Into<String>, vertices: &[Coordinate]) -> Result<Self, EngineError> {
        if vertices.is_empty() {
            return Err(EngineError::Validation(
                "operating region requires at least one boundary vertex".into(),
            ));
        }
        let mut region = Self {
            name: name.into(),
            min_lat: f64::MAX,
            max_lat: f64::MIN,
            min_lng: f64::MAX,
            max_lng: f64::MIN,
        };
        for v in vertices {
            region.min_lat = region.min_lat.min(v.lat);
            region.max_lat = region.max_lat.max(v.lat);
            region.min_lng = region.min_lng.min(v.lng);
            region.max_lng = region.max_lng.max(v.lng);
        }
        Ok(region)
    }

    pub fn contains(&self, point: Coordinate) -> bool {
        point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lng >= self.min_lng
            && point.lng <= self.max_lng
    }
}
