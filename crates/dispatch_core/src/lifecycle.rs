//! The ride state machine: role-gated transitions, the exclusive-accept
//! guarantee, and earnings settlement on completion.
//!
//! Every transition is a status-guarded conditional write performed under the
//! per-ride entry lock, so one logical transition completes before the next
//! is evaluated. Two drivers racing to accept the same ride resolve to
//! exactly one winner; the loser sees a conflict, never a silent no-op.
//! Invalid transitions are rejected naming the attempted action and the
//! current status, and leave the ride unchanged.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::fare::{round2, FareEstimator, VehicleClass};
use crate::geo::distance_km;
use crate::location::{LocationStore, Position};
use crate::notify::{spawn_dispatch, NotificationDispatcher};
use crate::ride::{Actor, Ride, RideRating, RideStatus, Stop};

#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub rider_id: Uuid,
    pub pickup: Stop,
    pub dropoff: Stop,
    pub vehicle_class: VehicleClass,
    /// Future-dated rides enter `scheduled` and rejoin `pending` when due.
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Forwarded to the payment collaborator; the engine does not read it.
    pub payment_method: Option<String>,
}

/// What the driver reports when ending a trip.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct CompletionReport {
    /// Distance actually driven; falls back to the booking-time estimate.
    pub actual_distance_km: Option<f64>,
    pub tips: Option<f64>,
    pub bonuses: Option<f64>,
}

/// Ride state plus the driver's live position while the ride is active.
#[derive(Debug, Clone, Serialize)]
pub struct RideSnapshot {
    pub ride: Ride,
    pub driver_position: Option<Position>,
}

pub struct RideLifecycle {
    rides: DashMap<Uuid, Ride>,
    estimator: Arc<FareEstimator>,
    locations: Arc<LocationStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    config: Arc<EngineConfig>,
}

impl RideLifecycle {
    pub fn new(
        estimator: Arc<FareEstimator>,
        locations: Arc<LocationStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            rides: DashMap::new(),
            estimator,
            locations,
            dispatcher,
            config,
        }
    }

    /// Create a ride in `pending`, or `scheduled` when future-dated.
    pub fn book(&self, request: BookingRequest) -> Result<Ride, EngineError> {
        let now = Utc::now();
        let estimated_distance_km =
            distance_km(request.pickup.coordinate, request.dropoff.coordinate);
        let estimated_fare = self
            .estimator
            .estimate(estimated_distance_km, request.vehicle_class)?;

        let status = match request.scheduled_for {
            Some(at) if at > now => RideStatus::Scheduled,
            _ => RideStatus::Pending,
        };

        let ride = Ride {
            id: Uuid::new_v4(),
            rider_id: request.rider_id,
            driver_id: None,
            pickup: request.pickup,
            dropoff: request.dropoff,
            vehicle_class: request.vehicle_class,
            status,
            scheduled_for: request.scheduled_for,
            created_at: now,
            accepted_at: None,
            started_at: None,
            ended_at: None,
            estimated_fare,
            final_fare: None,
            tips: 0.0,
            bonuses: 0.0,
            platform_commission: 0.0,
            driver_earnings: 0.0,
            estimated_distance_km,
            actual_distance_km: None,
            cancellation_reason: None,
            rating: RideRating::default(),
            rejected_by: Vec::new(),
            version: 0,
        };
        self.rides.insert(ride.id, ride.clone());

        self.notify_state_change(&ride);
        let dispatcher = self.dispatcher.clone();
        let rider_id = ride.rider_id;
        let payload = serde_json::to_value(&ride).unwrap_or(Value::Null);
        spawn_dispatch("ride-booked", async move {
            dispatcher.notify_user(rider_id, "ride_booked", payload).await
        });

        Ok(ride)
    }

    /// System: start looking for drivers.
    pub fn begin_search(&self, ride_id: Uuid) -> Result<Ride, EngineError> {
        self.guarded(ride_id, "begin search for", &[RideStatus::Pending], |ride| {
            ride.status = RideStatus::Searching;
            Ok(())
        })
    }

    /// System: offer the ride to a specific driver.
    pub fn assign(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, EngineError> {
        self.guarded(ride_id, "assign", &[RideStatus::Searching], |ride| {
            ride.driver_id = Some(driver_id);
            ride.status = RideStatus::Assigned;
            Ok(())
        })
    }

    /// Driver: claim the ride. Exclusive — under the per-ride entry lock the
    /// status precondition is re-checked at write time, so of two concurrent
    /// accepts exactly one succeeds and the other gets a conflict.
    pub fn accept(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, EngineError> {
        let snapshot = {
            let mut entry = self
                .rides
                .get_mut(&ride_id)
                .ok_or_else(|| EngineError::not_found("ride", ride_id))?;
            match entry.status {
                RideStatus::Searching => {}
                RideStatus::Assigned => {
                    if entry.driver_id != Some(driver_id) {
                        return Err(EngineError::Conflict(
                            "ride assigned to another driver".into(),
                        ));
                    }
                }
                RideStatus::Accepted | RideStatus::Arrived | RideStatus::InProgress => {
                    return Err(EngineError::Conflict("ride already accepted".into()));
                }
                status => {
                    return Err(EngineError::InvalidTransition {
                        action: "accept",
                        status,
                    });
                }
            }
            entry.driver_id = Some(driver_id);
            entry.status = RideStatus::Accepted;
            entry.accepted_at = Some(Utc::now());
            entry.version += 1;
            entry.clone()
        };
        self.notify_state_change(&snapshot);
        Ok(snapshot)
    }

    /// Driver: decline. The ride is re-queued for search until the
    /// dispatch-attempt cap is exhausted, then cancelled.
    pub fn reject(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, EngineError> {
        let cap = self.config.max_dispatch_attempts;
        self.guarded(
            ride_id,
            "reject",
            &[RideStatus::Searching, RideStatus::Assigned],
            |ride| {
                if !ride.rejected_by.contains(&driver_id) {
                    ride.rejected_by.push(driver_id);
                }
                ride.driver_id = None;
                if ride.rejected_by.len() >= cap {
                    ride.status = RideStatus::Cancelled;
                    ride.cancellation_reason = Some("no drivers available".into());
                    ride.ended_at = Some(Utc::now());
                } else {
                    ride.status = RideStatus::Searching;
                }
                Ok(())
            },
        )
    }

    /// Driver: at the pickup point.
    pub fn arrive(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, EngineError> {
        self.guarded(ride_id, "arrive for", &[RideStatus::Accepted], |ride| {
            check_assigned_driver(ride, driver_id)?;
            ride.status = RideStatus::Arrived;
            Ok(())
        })
    }

    /// Driver: rider on board, trip underway.
    pub fn start(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, EngineError> {
        self.guarded(
            ride_id,
            "start",
            &[RideStatus::Accepted, RideStatus::Arrived],
            |ride| {
                check_assigned_driver(ride, driver_id)?;
                ride.status = RideStatus::InProgress;
                ride.started_at = Some(Utc::now());
                Ok(())
            },
        )
    }

    /// Driver: end the trip and settle earnings.
    ///
    /// `final_fare` is recomputed from the reported distance (or the estimate
    /// when none is reported); the platform keeps its commission and the
    /// driver earns the remainder plus tips and bonuses.
    pub fn complete(
        &self,
        ride_id: Uuid,
        driver_id: Uuid,
        report: CompletionReport,
    ) -> Result<Ride, EngineError> {
        let estimator = Arc::clone(&self.estimator);
        self.guarded(ride_id, "complete", &[RideStatus::InProgress], |ride| {
            check_assigned_driver(ride, driver_id)?;

            let distance = match report.actual_distance_km {
                Some(d) if d.is_finite() && d >= 0.0 => d,
                Some(d) => {
                    return Err(EngineError::Validation(format!(
                        "invalid actual distance {d}"
                    )))
                }
                None => ride.estimated_distance_km,
            };
            let final_fare = estimator.estimate(distance, ride.vehicle_class)?;
            let commission = round2(final_fare * estimator.commission_rate());

            ride.status = RideStatus::Completed;
            ride.ended_at = Some(Utc::now());
            ride.actual_distance_km = Some(distance);
            ride.final_fare = Some(final_fare);
            ride.tips = report.tips.unwrap_or(0.0);
            ride.bonuses = report.bonuses.unwrap_or(0.0);
            ride.platform_commission = commission;
            ride.driver_earnings = round2(final_fare - commission + ride.tips + ride.bonuses);
            Ok(())
        })
    }

    /// Rider, driver, or system: abandon the ride. Legal from every
    /// non-terminal state; a reason is mandatory.
    pub fn cancel(
        &self,
        ride_id: Uuid,
        actor: Actor,
        reason: &str,
    ) -> Result<Ride, EngineError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::Validation(
                "cancellation requires a reason".into(),
            ));
        }
        let reason = format!("{actor}: {reason}");
        self.guarded(
            ride_id,
            "cancel",
            &[
                RideStatus::Pending,
                RideStatus::Scheduled,
                RideStatus::Searching,
                RideStatus::Assigned,
                RideStatus::Accepted,
                RideStatus::Arrived,
                RideStatus::InProgress,
            ],
            |ride| {
                ride.status = RideStatus::Cancelled;
                ride.cancellation_reason = Some(reason);
                ride.ended_at = Some(Utc::now());
                Ok(())
            },
        )
    }

    /// Submit a rating for a completed ride. The rider rates the trip through
    /// `rider_rating`; the driver through `driver_rating`.
    pub fn rate(&self, ride_id: Uuid, actor: Actor, stars: u8) -> Result<Ride, EngineError> {
        if !(1..=5).contains(&stars) {
            return Err(EngineError::Validation(format!(
                "rating {stars} outside 1..=5"
            )));
        }
        self.guarded(ride_id, "rate", &[RideStatus::Completed], |ride| {
            match actor {
                Actor::Rider => ride.rating.rider_rating = Some(stars),
                Actor::Driver => ride.rating.driver_rating = Some(stars),
                Actor::System => {
                    return Err(EngineError::Validation(
                        "only ride participants may rate".into(),
                    ))
                }
            }
            Ok(())
        })
    }

    /// Move due scheduled rides back into `pending`. Returns the released rides.
    pub fn release_due(&self, now: DateTime<Utc>) -> Vec<Ride> {
        let mut released = Vec::new();
        for mut entry in self.rides.iter_mut() {
            if entry.status == RideStatus::Scheduled
                && entry.scheduled_for.is_some_and(|at| at <= now)
            {
                entry.status = RideStatus::Pending;
                entry.version += 1;
                released.push(entry.clone());
            }
        }
        for ride in &released {
            self.notify_state_change(ride);
        }
        released
    }

    /// Current ride state, with the driver's last known position while active.
    pub fn snapshot(&self, ride_id: Uuid) -> Result<RideSnapshot, EngineError> {
        let ride = self
            .rides
            .get(&ride_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| EngineError::not_found("ride", ride_id))?;
        let driver_position = if ride.status.is_active() {
            ride.driver_id
                .and_then(|driver_id| self.locations.latest_driver(driver_id).ok())
        } else {
            None
        };
        Ok(RideSnapshot {
            ride,
            driver_position,
        })
    }

    /// Status-guarded conditional write: precondition and mutation happen
    /// under the same per-ride entry lock. On a failed precondition the ride
    /// is left untouched.
    fn guarded<F>(
        &self,
        ride_id: Uuid,
        action: &'static str,
        allowed: &[RideStatus],
        apply: F,
    ) -> Result<Ride, EngineError>
    where
        F: FnOnce(&mut Ride) -> Result<(), EngineError>,
    {
        let snapshot = {
            let mut entry = self
                .rides
                .get_mut(&ride_id)
                .ok_or_else(|| EngineError::not_found("ride", ride_id))?;
            if !allowed.contains(&entry.status) {
                return Err(EngineError::InvalidTransition {
                    action,
                    status: entry.status,
                });
            }
            apply(entry.value_mut())?;
            entry.version += 1;
            entry.clone()
        };
        self.notify_state_change(&snapshot);
        Ok(snapshot)
    }

    fn notify_state_change(&self, ride: &Ride) {
        let dispatcher = self.dispatcher.clone();
        let payload = serde_json::to_value(ride).unwrap_or(Value::Null);
        let (ride_id, status) = (ride.id, ride.status);
        spawn_dispatch("ride-state", async move {
            dispatcher
                .notify_ride_state_changed(ride_id, status, payload)
                .await
        });
    }
}

fn check_assigned_driver(ride: &Ride, driver_id: Uuid) -> Result<(), EngineError> {
    if ride.driver_id != Some(driver_id) {
        return Err(EngineError::Conflict(
            "ride assigned to another driver".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::fare::FareConfig;
    use crate::geo::Coordinate;
    use crate::notify::NoopDispatcher;
    use std::time::Duration;

    fn lifecycle() -> RideLifecycle {
        let config = Arc::new(EngineConfig::default());
        let estimator = Arc::new(
            FareEstimator::new(FareConfig::default(), Duration::from_secs(120))
                .expect("estimator"),
        );
        let locations = Arc::new(LocationStore::new(Arc::new(NoopDispatcher)));
        RideLifecycle::new(estimator, locations, Arc::new(NoopDispatcher), config)
    }

    fn stop(lat: f64, lng: f64) -> Stop {
        Stop {
            coordinate: Coordinate::new(lat, lng).expect("coordinate"),
            address: "somewhere".into(),
        }
    }

    fn booking() -> BookingRequest {
        BookingRequest {
            rider_id: Uuid::new_v4(),
            pickup: stop(51.05, -0.10),
            dropoff: stop(51.10, -0.05),
            vehicle_class: VehicleClass::Sedan,
            scheduled_for: None,
            payment_method: None,
        }
    }

    fn in_progress_ride(lc: &RideLifecycle, driver: Uuid) -> Ride {
        let ride = lc.book(booking()).expect("book");
        lc.begin_search(ride.id).expect("search");
        lc.accept(ride.id, driver).expect("accept");
        lc.arrive(ride.id, driver).expect("arrive");
        lc.start(ride.id, driver).expect("start")
    }

    #[tokio::test]
    async fn booking_creates_pending_ride_with_estimate() {
        let lc = lifecycle();
        let ride = lc.book(booking()).expect("book");
        assert_eq!(ride.status, RideStatus::Pending);
        assert!(ride.estimated_fare >= 2.50);
        assert!(ride.estimated_distance_km > 0.0);
        assert!(ride.driver_id.is_none());
    }

    #[tokio::test]
    async fn future_booking_is_scheduled_and_released_when_due() {
        let lc = lifecycle();
        let mut request = booking();
        request.scheduled_for = Some(Utc::now() + chrono::Duration::hours(2));
        let ride = lc.book(request).expect("book");
        assert_eq!(ride.status, RideStatus::Scheduled);

        assert!(lc.release_due(Utc::now()).is_empty());
        let released = lc.release_due(Utc::now() + chrono::Duration::hours(3));
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].status, RideStatus::Pending);
    }

    #[tokio::test]
    async fn complete_from_pending_is_invalid() {
        let lc = lifecycle();
        let ride = lc.book(booking()).expect("book");
        let err = lc
            .complete(ride.id, Uuid::new_v4(), CompletionReport::default())
            .expect_err("must fail");
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                action: "complete",
                status: RideStatus::Pending,
            }
        ));
        // Ride unchanged.
        assert_eq!(lc.snapshot(ride.id).expect("snapshot").ride.status, RideStatus::Pending);
    }

    #[tokio::test]
    async fn accept_after_completion_is_invalid() {
        let lc = lifecycle();
        let driver = Uuid::new_v4();
        let ride = in_progress_ride(&lc, driver);
        lc.complete(ride.id, driver, CompletionReport::default())
            .expect("complete");

        let err = lc.accept(ride.id, Uuid::new_v4()).expect_err("must fail");
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                action: "accept",
                status: RideStatus::Completed,
            }
        ));
    }

    #[tokio::test]
    async fn second_accept_conflicts() {
        let lc = lifecycle();
        let ride = lc.book(booking()).expect("book");
        lc.begin_search(ride.id).expect("search");

        let winner = Uuid::new_v4();
        let loser = Uuid::new_v4();
        let accepted = lc.accept(ride.id, winner).expect("first accept");
        assert_eq!(accepted.status, RideStatus::Accepted);
        assert_eq!(accepted.driver_id, Some(winner));

        let err = lc.accept(ride.id, loser).expect_err("second accept");
        assert!(matches!(err, EngineError::Conflict(_)));
        assert_eq!(
            lc.snapshot(ride.id).expect("snapshot").ride.driver_id,
            Some(winner)
        );
    }

    #[tokio::test]
    async fn cancel_succeeds_from_every_non_terminal_state() {
        let driver = Uuid::new_v4();
        let states: Vec<Box<dyn Fn(&RideLifecycle) -> Ride>> = vec![
            Box::new(|lc| lc.book(booking()).expect("book")),
            Box::new(|lc| {
                let mut request = booking();
                request.scheduled_for = Some(Utc::now() + chrono::Duration::hours(1));
                lc.book(request).expect("book")
            }),
            Box::new(|lc| {
                let ride = lc.book(booking()).expect("book");
                lc.begin_search(ride.id).expect("search")
            }),
            Box::new(move |lc| {
                let ride = lc.book(booking()).expect("book");
                lc.begin_search(ride.id).expect("search");
                lc.assign(ride.id, driver).expect("assign")
            }),
            Box::new(move |lc| {
                let ride = lc.book(booking()).expect("book");
                lc.begin_search(ride.id).expect("search");
                lc.accept(ride.id, driver).expect("accept")
            }),
            Box::new(move |lc| {
                let ride = lc.book(booking()).expect("book");
                lc.begin_search(ride.id).expect("search");
                lc.accept(ride.id, driver).expect("accept");
                lc.arrive(ride.id, driver).expect("arrive")
            }),
            Box::new(move |lc| in_progress_ride(lc, driver)),
        ];

        for make in states {
            let lc = lifecycle();
            let ride = make(&lc);
            let cancelled = lc
                .cancel(ride.id, Actor::Rider, "changed my mind")
                .expect("cancel");
            assert_eq!(cancelled.status, RideStatus::Cancelled);
            assert!(cancelled.ended_at.is_some());
            assert!(cancelled.cancellation_reason.is_some());
        }
    }

    #[tokio::test]
    async fn cancel_requires_a_reason_and_terminal_cancel_fails() {
        let lc = lifecycle();
        let ride = lc.book(booking()).expect("book");

        assert!(matches!(
            lc.cancel(ride.id, Actor::Rider, "  "),
            Err(EngineError::Validation(_))
        ));

        lc.cancel(ride.id, Actor::Rider, "plans changed").expect("cancel");
        assert!(matches!(
            lc.cancel(ride.id, Actor::Rider, "again"),
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn completion_settles_commission_and_earnings() {
        let lc = lifecycle();
        let driver = Uuid::new_v4();
        let ride = in_progress_ride(&lc, driver);
        let completed = lc
            .complete(
                ride.id,
                driver,
                CompletionReport {
                    actual_distance_km: Some(12.0),
                    ..Default::default()
                },
            )
            .expect("complete");

        let final_fare = completed.final_fare.expect("final fare");
        assert_eq!(final_fare, round2(2.50 + 12.0 * 1.50));
        assert_eq!(completed.platform_commission, round2(final_fare * 0.20));
        // Commission + earnings == final fare when tips and bonuses are zero.
        assert!(
            (completed.platform_commission + completed.driver_earnings - final_fare).abs() < 0.011
        );
        assert_eq!(completed.actual_distance_km, Some(12.0));
        assert!(completed.ended_at.is_some());
    }

    #[tokio::test]
    async fn tips_and_bonuses_go_to_the_driver() {
        let lc = lifecycle();
        let driver = Uuid::new_v4();
        let ride = in_progress_ride(&lc, driver);
        let completed = lc
            .complete(
                ride.id,
                driver,
                CompletionReport {
                    actual_distance_km: Some(10.0),
                    tips: Some(3.0),
                    bonuses: Some(1.5),
                },
            )
            .expect("complete");

        let final_fare = completed.final_fare.expect("final fare");
        let expected =
            round2(final_fare - completed.platform_commission + 3.0 + 1.5);
        assert_eq!(completed.driver_earnings, expected);
    }

    #[tokio::test]
    async fn reject_requeues_then_exhausts_into_cancellation() {
        let lc = lifecycle();
        let ride = lc.book(booking()).expect("book");
        lc.begin_search(ride.id).expect("search");

        let first = lc.reject(ride.id, Uuid::new_v4()).expect("reject 1");
        assert_eq!(first.status, RideStatus::Searching);
        let second = lc.reject(ride.id, Uuid::new_v4()).expect("reject 2");
        assert_eq!(second.status, RideStatus::Searching);

        let third = lc.reject(ride.id, Uuid::new_v4()).expect("reject 3");
        assert_eq!(third.status, RideStatus::Cancelled);
        assert_eq!(
            third.cancellation_reason.as_deref(),
            Some("no drivers available")
        );
    }

    #[tokio::test]
    async fn only_the_assigned_driver_may_progress_the_trip() {
        let lc = lifecycle();
        let driver = Uuid::new_v4();
        let imposter = Uuid::new_v4();
        let ride = lc.book(booking()).expect("book");
        lc.begin_search(ride.id).expect("search");
        lc.accept(ride.id, driver).expect("accept");

        assert!(matches!(
            lc.start(ride.id, imposter),
            Err(EngineError::Conflict(_))
        ));
        assert!(lc.start(ride.id, driver).is_ok());
    }

    #[tokio::test]
    async fn assigned_ride_accepts_only_the_assigned_driver() {
        let lc = lifecycle();
        let offered = Uuid::new_v4();
        let other = Uuid::new_v4();
        let ride = lc.book(booking()).expect("book");
        lc.begin_search(ride.id).expect("search");
        lc.assign(ride.id, offered).expect("assign");

        assert!(matches!(
            lc.accept(ride.id, other),
            Err(EngineError::Conflict(_))
        ));
        assert_eq!(
            lc.accept(ride.id, offered).expect("accept").status,
            RideStatus::Accepted
        );
    }

    #[tokio::test]
    async fn rating_is_gated_to_completed_rides() {
        let lc = lifecycle();
        let driver = Uuid::new_v4();
        let ride = in_progress_ride(&lc, driver);

        assert!(matches!(
            lc.rate(ride.id, Actor::Rider, 5),
            Err(EngineError::InvalidTransition { .. })
        ));

        lc.complete(ride.id, driver, CompletionReport::default())
            .expect("complete");
        assert!(matches!(
            lc.rate(ride.id, Actor::Rider, 6),
            Err(EngineError::Validation(_))
        ));
        let rated = lc.rate(ride.id, Actor::Rider, 5).expect("rate");
        assert_eq!(rated.rating.rider_rating, Some(5));
    }

    #[tokio::test]
    async fn unknown_ride_is_not_found() {
        let lc = lifecycle();
        assert!(matches!(
            lc.begin_search(Uuid::new_v4()),
            Err(EngineError::NotFound { .. })
        ));
        assert!(matches!(
            lc.snapshot(Uuid::new_v4()),
            Err(EngineError::NotFound { .. })
        ));
    }
}
