//! Test helpers for common setup and fixtures.
//!
//! Shared across in-module tests, integration tests, and benches to cut
//! duplication.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::eligibility::{
    ActiveState, ApprovalState, DriverEligibility, OperationalStatus,
};
use crate::fare::VehicleClass;
use crate::geo::Coordinate;
use crate::location::{Position, PositionUpdate};
use crate::notify::{DispatchError, NotificationDispatcher};
use crate::ride::{RideStatus, Stop};

/// A fixed test origin (central London).
pub fn test_origin() -> Coordinate {
    Coordinate::new(51.5074, -0.1278).expect("test origin should be valid")
}

/// A position update at the given point with no heading/speed/accuracy.
pub fn bare_update(coordinate: Coordinate) -> PositionUpdate {
    PositionUpdate {
        latitude: coordinate.lat,
        longitude: coordinate.lng,
        ..Default::default()
    }
}

/// A fully matchable driver of the given class.
pub fn eligible_driver(class: VehicleClass) -> DriverEligibility {
    DriverEligibility {
        display_name: "Test Driver".into(),
        operational_status: OperationalStatus::Online,
        approval_state: ApprovalState::Approved,
        active_state: ActiveState::Active,
        vehicle_class: class,
    }
}

pub fn test_stop(lat: f64, lng: f64) -> Stop {
    Stop {
        coordinate: Coordinate::new(lat, lng).expect("test stop should be valid"),
        address: "1 Test Street".into(),
    }
}

/// What a dispatcher was asked to deliver.
#[derive(Debug, Clone)]
pub enum DispatchedEvent {
    NearbyRiders { driver_id: Uuid },
    RideSubscribers { driver_id: Uuid },
    RideStateChanged { ride_id: Uuid, status: RideStatus },
    User { user_id: Uuid, event_type: String },
}

/// Dispatcher that records every call for assertions.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<DispatchedEvent>>,
}

impl RecordingDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<DispatchedEvent> {
        self.events.lock().expect("event log poisoned").clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn notify_nearby_riders_of_driver_update(
        &self,
        driver_id: Uuid,
        _position: Position,
    ) -> Result<(), DispatchError> {
        self.events
            .lock()
            .expect("event log poisoned")
            .push(DispatchedEvent::NearbyRiders { driver_id });
        Ok(())
    }

    async fn notify_ride_subscribers_of_driver_location(
        &self,
        driver_id: Uuid,
        _position: Position,
    ) -> Result<(), DispatchError> {
        self.events
            .lock()
            .expect("event log poisoned")
            .push(DispatchedEvent::RideSubscribers { driver_id });
        Ok(())
    }

    async fn notify_ride_state_changed(
        &self,
        ride_id: Uuid,
        new_status: RideStatus,
        _payload: Value,
    ) -> Result<(), DispatchError> {
        self.events
            .lock()
            .expect("event log poisoned")
            .push(DispatchedEvent::RideStateChanged {
                ride_id,
                status: new_status,
            });
        Ok(())
    }

    async fn notify_user(
        &self,
        user_id: Uuid,
        event_type: &str,
        _payload: Value,
    ) -> Result<(), DispatchError> {
        self.events
            .lock()
            .expect("event log poisoned")
            .push(DispatchedEvent::User {
                user_id,
                event_type: event_type.to_string(),
            });
        Ok(())
    }
}

/// Dispatcher whose every call fails, for verifying failures are swallowed.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingDispatcher;

#[async_trait]
impl NotificationDispatcher for FailingDispatcher {
    async fn notify_nearby_riders_of_driver_update(
        &self,
        _driver_id: Uuid,
        _position: Position,
    ) -> Result<(), DispatchError> {
        Err(DispatchError("delivery layer down".into()))
    }

    async fn notify_ride_subscribers_of_driver_location(
        &self,
        _driver_id: Uuid,
        _position: Position,
    ) -> Result<(), DispatchError> {
        Err(DispatchError("delivery layer down".into()))
    }

    async fn notify_ride_state_changed(
        &self,
        _ride_id: Uuid,
        _new_status: RideStatus,
        _payload: Value,
    ) -> Result<(), DispatchError> {
        Err(DispatchError("delivery layer down".into()))
    }

    async fn notify_user(
        &self,
        _user_id: Uuid,
        _event_type: &str,
        _payload: Value,
    ) -> Result<(), DispatchError> {
        Err(DispatchError("delivery layer down".into()))
    }
}
