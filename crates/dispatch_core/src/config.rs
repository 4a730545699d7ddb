//! Engine configuration. Defaults carry the contract constants: 5-minute
//! staleness window, 24-hour rider retention, 30 km/h ETA fallback speed,
//! 50-result matching cap, 20% commission.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::fare::FareConfig;
use crate::geo::OperatingRegion;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum age of a position still eligible for matching.
    pub staleness_seconds: u64,
    /// Rider position history older than this is purged by the background sweep.
    pub rider_retention_hours: u64,
    /// Interval between retention sweeps.
    pub retention_sweep_seconds: u64,
    /// ETA fallback when a driver reports no speed.
    pub fallback_speed_kmh: f64,
    /// Hard cap on `nearby` result length.
    pub max_nearby_results: usize,
    /// How long a cached fare quote stays valid.
    pub quote_validity_seconds: u64,
    /// Distinct rejecting drivers before a searching ride is cancelled.
    pub max_dispatch_attempts: usize,
    /// Optional operating region for the boundary check.
    pub region: Option<OperatingRegion>,
    /// When false the region check is advisory (logged only); when true,
    /// out-of-region drivers are excluded from matching.
    pub enforce_region_boundary: bool,
    pub fare: FareConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            staleness_seconds: 300,
            rider_retention_hours: 24,
            retention_sweep_seconds: 600,
            fallback_speed_kmh: 30.0,
            max_nearby_results: 50,
            quote_validity_seconds: 120,
            max_dispatch_attempts: 3,
            region: None,
            enforce_region_boundary: false,
            fare: FareConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.staleness_seconds == 0 {
            return Err(EngineError::Validation("staleness window must be non-zero".into()));
        }
        if self.fallback_speed_kmh <= 0.0 || !self.fallback_speed_kmh.is_finite() {
            return Err(EngineError::Validation(format!(
                "fallback speed {} must be positive",
                self.fallback_speed_kmh
            )));
        }
        if self.max_nearby_results == 0 {
            return Err(EngineError::Validation("result cap must be non-zero".into()));
        }
        if self.max_dispatch_attempts == 0 {
            return Err(EngineError::Validation(
                "dispatch attempt cap must be non-zero".into(),
            ));
        }
        self.fare.validate()
    }
}
