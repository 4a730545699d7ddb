//! Nearby-driver search: a ranked scan over the recent-location snapshot.
//!
//! The scan is brute force over the bounded recent set; at marketplace scale
//! this beats maintaining a spatial index. Filter order matters: the cheap
//! eligibility booleans run before any distance math.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::eligibility::DriverDirectory;
use crate::error::EngineError;
use crate::fare::VehicleClass;
use crate::geo::{distance_km, Coordinate};
use crate::location::LocationStore;

/// One ranked candidate from a nearby scan.
#[derive(Debug, Clone, Serialize)]
pub struct NearbyDriver {
    pub driver_id: Uuid,
    pub display_name: String,
    pub vehicle_class: VehicleClass,
    /// Kilometres from the origin, rounded to 1 decimal.
    pub distance_km: f64,
    pub eta_minutes: u32,
    pub observed_at: DateTime<Utc>,
}

pub struct GeoMatcher {
    locations: Arc<LocationStore>,
    directory: Arc<dyn DriverDirectory>,
    config: Arc<EngineConfig>,
}

impl GeoMatcher {
    pub fn new(
        locations: Arc<LocationStore>,
        directory: Arc<dyn DriverDirectory>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            locations,
            directory,
            config,
        }
    }

    /// Ranked list of matchable drivers within `radius_km` of `origin`.
    ///
    /// Pure read over a location snapshot: no writes, safe to call
    /// concurrently and repeatedly. Results are sorted ascending by distance
    /// (stable, so equal distances keep discovery order) and capped at the
    /// configured maximum.
    pub fn nearby(
        &self,
        origin: Coordinate,
        radius_km: f64,
        class_filter: Option<VehicleClass>,
    ) -> Result<Vec<NearbyDriver>, EngineError> {
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(EngineError::Validation(format!(
                "search radius {radius_km} must be positive"
            )));
        }

        let now = Utc::now();
        let staleness = Duration::from_secs(self.config.staleness_seconds);
        let mut candidates: Vec<(f64, NearbyDriver)> = Vec::new();

        for position in self.locations.recent_drivers(staleness, now) {
            // Eligibility first: boolean flags are cheaper than haversine.
            let Some(eligibility) = self.directory.eligibility(position.subject_id) else {
                continue;
            };
            if !eligibility.is_matchable() {
                continue;
            }
            if let Some(wanted) = class_filter {
                if eligibility.vehicle_class != wanted {
                    continue;
                }
            }
            if let Some(region) = &self.config.region {
                if !region.contains(position.coordinate) {
                    if self.config.enforce_region_boundary {
                        continue;
                    }
                    tracing::debug!(
                        driver_id = %position.subject_id,
                        region = %region.name,
                        "candidate outside operating region"
                    );
                }
            }

            let dist = distance_km(origin, position.coordinate);
            if dist > radius_km {
                continue;
            }

            let effective_speed = if position.speed_kmh > 0.0 {
                position.speed_kmh
            } else {
                self.config.fallback_speed_kmh
            };
            let eta_minutes = (dist / effective_speed * 60.0).round() as u32;

            candidates.push((
                dist,
                NearbyDriver {
                    driver_id: position.subject_id,
                    display_name: eligibility.display_name,
                    vehicle_class: eligibility.vehicle_class,
                    distance_km: (dist * 10.0).round() / 10.0,
                    eta_minutes,
                    observed_at: position.observed_at,
                },
            ));
        }

        // Vec::sort_by is stable: ties keep discovery order.
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));
        candidates.truncate(self.config.max_nearby_results);
        Ok(candidates.into_iter().map(|(_, driver)| driver).collect())
    }
}
