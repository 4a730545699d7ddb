//! The ride record and its status vocabulary.
//!
//! A ride is created by booking, mutated exclusively through lifecycle
//! transitions, and never deleted; it terminates into `Completed` or
//! `Cancelled`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fare::VehicleClass;
use crate::geo::Coordinate;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RideStatus {
    Pending,
    Scheduled,
    Searching,
    Assigned,
    Accepted,
    Arrived,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// States in which the assigned driver's live position is part of the
    /// ride snapshot.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Accepted | Self::Arrived | Self::InProgress)
    }
}

/// Who is requesting a transition. Role checks happen upstream; the engine
/// only cares which role gates which transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Actor {
    Rider,
    Driver,
    System,
}

/// A pickup or dropoff point with its display address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub coordinate: Coordinate,
    pub address: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideRating {
    pub rider_rating: Option<u8>,
    pub driver_rating: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ride {
    pub id: Uuid,
    pub rider_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub pickup: Stop,
    pub dropoff: Stop,
    pub vehicle_class: VehicleClass,
    pub status: RideStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub estimated_fare: f64,
    pub final_fare: Option<f64>,
    pub tips: f64,
    pub bonuses: f64,
    pub platform_commission: f64,
    pub driver_earnings: f64,
    pub estimated_distance_km: f64,
    pub actual_distance_km: Option<f64>,
    pub cancellation_reason: Option<String>,
    pub rating: RideRating,
    /// Drivers who have rejected this ride; bounded by the dispatch-attempt cap.
    pub rejected_by: Vec<Uuid>,
    /// Bumped on every transition. Conditional writes are guarded by status,
    /// but the counter makes write ordering observable to collaborators.
    pub version: u64,
}
