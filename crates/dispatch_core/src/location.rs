//! Latest-position store for drivers and riders.
//!
//! One live position per subject: every update replaces the previous one.
//! Upserts for the same subject are serialized by the map's entry lock, so
//! last-write-wins is ordered by arrival, not by the claimed GPS timestamp;
//! an out-of-order packet cannot resurrect older data once a newer packet
//! has been stored after it. Reads never block writers for other subjects.
//!
//! A position past the staleness window is still accepted for storage; it is
//! excluded from matching by the `recent_drivers` scan, never rejected.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::geo::Coordinate;
use crate::notify::{spawn_dispatch, NotificationDispatcher};

/// A subject's most recent reported position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub subject_id: Uuid,
    pub coordinate: Coordinate,
    /// Degrees clockwise from north, in [0, 360).
    pub heading: f64,
    pub speed_kmh: f64,
    pub accuracy_meters: f64,
    pub observed_at: DateTime<Utc>,
}

/// Raw inbound update before validation. Optional fields default to zero.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PositionUpdate {
    pub latitude: f64,
    pub longitude: f64,
    pub heading: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub accuracy_meters: Option<f64>,
    /// GPS timestamp as claimed by the device. Stored as-is; ordering between
    /// updates is decided by arrival.
    pub observed_at: Option<DateTime<Utc>>,
}

impl PositionUpdate {
    fn into_position(self, subject_id: Uuid, now: DateTime<Utc>) -> Result<Position, EngineError> {
        let coordinate = Coordinate::new(self.latitude, self.longitude)?;

        let heading = self.heading.unwrap_or(0.0);
        if !heading.is_finite() {
            return Err(EngineError::Validation(format!("invalid heading {heading}")));
        }
        let speed_kmh = self.speed_kmh.unwrap_or(0.0);
        if !speed_kmh.is_finite() || speed_kmh < 0.0 {
            return Err(EngineError::Validation(format!("invalid speed {speed_kmh}")));
        }
        let accuracy_meters = self.accuracy_meters.unwrap_or(0.0);
        if !accuracy_meters.is_finite() || accuracy_meters < 0.0 {
            return Err(EngineError::Validation(format!(
                "invalid accuracy {accuracy_meters}"
            )));
        }

        Ok(Position {
            subject_id,
            coordinate,
            heading: heading.rem_euclid(360.0),
            speed_kmh,
            accuracy_meters,
            observed_at: self.observed_at.unwrap_or(now),
        })
    }
}

/// Keyed store of the latest known position per driver and per rider.
pub struct LocationStore {
    drivers: DashMap<Uuid, Position>,
    riders: DashMap<Uuid, Position>,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl LocationStore {
    pub fn new(dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        Self {
            drivers: DashMap::new(),
            riders: DashMap::new(),
            dispatcher,
        }
    }

    /// Validate and store a driver position, replacing any prior one.
    ///
    /// A successful upsert fans out two notifications (riders near the
    /// driver, and any ride subscribed to the driver's position). Both are
    /// fire-and-forget; delivery failure never fails the upsert.
    pub fn upsert_driver(
        &self,
        driver_id: Uuid,
        update: PositionUpdate,
    ) -> Result<Position, EngineError> {
        let position = update.into_position(driver_id, Utc::now())?;
        self.drivers.insert(driver_id, position);

        let dispatcher = self.dispatcher.clone();
        spawn_dispatch("nearby-riders", async move {
            dispatcher
                .notify_nearby_riders_of_driver_update(driver_id, position)
                .await
        });
        let dispatcher = self.dispatcher.clone();
        spawn_dispatch("ride-subscribers", async move {
            dispatcher
                .notify_ride_subscribers_of_driver_location(driver_id, position)
                .await
        });

        Ok(position)
    }

    /// Validate and store a rider position, replacing any prior one.
    pub fn upsert_rider(
        &self,
        rider_id: Uuid,
        update: PositionUpdate,
    ) -> Result<Position, EngineError> {
        let position = update.into_position(rider_id, Utc::now())?;
        self.riders.insert(rider_id, position);
        Ok(position)
    }

    pub fn latest_driver(&self, driver_id: Uuid) -> Result<Position, EngineError> {
        self.drivers
            .get(&driver_id)
            .map(|entry| *entry)
            .ok_or_else(|| EngineError::not_found("driver position", driver_id))
    }

    pub fn latest_rider(&self, rider_id: Uuid) -> Result<Position, EngineError> {
        self.riders
            .get(&rider_id)
            .map(|entry| *entry)
            .ok_or_else(|| EngineError::not_found("rider position", rider_id))
    }

    /// Snapshot of driver positions no older than `max_age`, for bulk
    /// matching scans. Tolerates concurrent writers; iteration order is the
    /// map's, which is what the matcher's stable sort preserves for ties.
    pub fn recent_drivers(&self, max_age: Duration, now: DateTime<Utc>) -> Vec<Position> {
        let cutoff = now
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::seconds(0));
        self.drivers
            .iter()
            .map(|entry| *entry.value())
            .filter(|position| position.observed_at >= cutoff)
            .collect()
    }

    /// Drop rider positions older than `retention`. Returns how many were purged.
    pub fn purge_rider_history(&self, retention: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now
            - chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::seconds(0));
        let before = self.riders.len();
        self.riders.retain(|_, position| position.observed_at >= cutoff);
        before - self.riders.len()
    }

    /// Background retention sweep, decoupled from the write path.
    pub fn spawn_retention_sweep(
        self: &Arc<Self>,
        every: Duration,
        retention: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let purged = store.purge_rider_history(retention, Utc::now());
                if purged > 0 {
                    tracing::debug!(purged, "purged expired rider positions");
                }
            }
        })
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoopDispatcher;

    fn store() -> LocationStore {
        LocationStore::new(Arc::new(NoopDispatcher))
    }

    fn update(lat: f64, lng: f64) -> PositionUpdate {
        PositionUpdate {
            latitude: lat,
            longitude: lng,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upsert_replaces_prior_position() {
        let store = store();
        let driver = Uuid::new_v4();

        store.upsert_driver(driver, update(51.00, 0.00)).expect("first upsert");
        store.upsert_driver(driver, update(51.05, 0.05)).expect("second upsert");

        assert_eq!(store.driver_count(), 1);
        let latest = store.latest_driver(driver).expect("latest");
        assert_eq!(latest.coordinate.lat, 51.05);
        assert_eq!(latest.coordinate.lng, 0.05);
    }

    #[tokio::test]
    async fn invalid_coordinates_are_rejected() {
        let store = store();
        let driver = Uuid::new_v4();

        assert!(matches!(
            store.upsert_driver(driver, update(91.0, 0.0)),
            Err(EngineError::Validation(_))
        ));
        assert!(store.upsert_driver(driver, update(f64::NAN, 0.0)).is_err());
        assert!(store.latest_driver(driver).is_err());
    }

    #[tokio::test]
    async fn heading_is_normalized() {
        let store = store();
        let driver = Uuid::new_v4();
        let position = store
            .upsert_driver(
                driver,
                PositionUpdate {
                    latitude: 51.0,
                    longitude: 0.0,
                    heading: Some(450.0),
                    ..Default::default()
                },
            )
            .expect("upsert");
        assert_eq!(position.heading, 90.0);
    }

    #[tokio::test]
    async fn stale_positions_are_stored_but_not_recent() {
        let store = store();
        let driver = Uuid::new_v4();
        let six_minutes_ago = Utc::now() - chrono::Duration::minutes(6);

        store
            .upsert_driver(
                driver,
                PositionUpdate {
                    latitude: 51.0,
                    longitude: 0.0,
                    observed_at: Some(six_minutes_ago),
                    ..Default::default()
                },
            )
            .expect("stale update is still stored");

        assert!(store.latest_driver(driver).is_ok());
        let recent = store.recent_drivers(Duration::from_secs(300), Utc::now());
        assert!(recent.is_empty());
    }

    #[cfg(feature = "test-helpers")]
    #[tokio::test]
    async fn driver_upsert_fans_out_both_notifications() {
        use crate::test_helpers::{DispatchedEvent, RecordingDispatcher};

        let dispatcher = RecordingDispatcher::new();
        let store = LocationStore::new(
            Arc::clone(&dispatcher) as Arc<dyn NotificationDispatcher>
        );
        let driver = Uuid::new_v4();
        store.upsert_driver(driver, update(51.0, 0.0)).expect("upsert");

        // The fan-outs are fire-and-forget; give the spawned tasks a beat.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let events = dispatcher.events();
        assert!(events
            .iter()
            .any(|e| matches!(e, DispatchedEvent::NearbyRiders { driver_id } if *driver_id == driver)));
        assert!(events
            .iter()
            .any(|e| matches!(e, DispatchedEvent::RideSubscribers { driver_id } if *driver_id == driver)));
    }

    #[tokio::test]
    async fn retention_purge_drops_old_rider_positions() {
        let store = store();
        let old_rider = Uuid::new_v4();
        let fresh_rider = Uuid::new_v4();

        store
            .upsert_rider(
                old_rider,
                PositionUpdate {
                    latitude: 51.0,
                    longitude: 0.0,
                    observed_at: Some(Utc::now() - chrono::Duration::hours(25)),
                    ..Default::default()
                },
            )
            .expect("upsert");
        store.upsert_rider(fresh_rider, update(51.0, 0.0)).expect("upsert");

        let purged = store.purge_rider_history(Duration::from_secs(24 * 3600), Utc::now());
        assert_eq!(purged, 1);
        assert!(store.latest_rider(old_rider).is_err());
        assert!(store.latest_rider(fresh_rider).is_ok());
    }
}
