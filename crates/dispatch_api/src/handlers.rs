//! Request/response shapes and handlers for the REST surface.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dispatch_core::error::EngineError;
use dispatch_core::fare::{FareQuote, VehicleClass};
use dispatch_core::geo::Coordinate;
use dispatch_core::lifecycle::{BookingRequest, CompletionReport, RideSnapshot};
use dispatch_core::location::{Position, PositionUpdate};
use dispatch_core::ride::{Actor, Ride, RideStatus, Stop};

use crate::AppState;

/// Engine error mapped onto an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_status: Option<RideStatus>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            EngineError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: self.0.to_string(),
                    current_status: None,
                },
            ),
            EngineError::NotFound { .. } => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    error: self.0.to_string(),
                    current_status: None,
                },
            ),
            EngineError::Conflict(_) => (
                StatusCode::CONFLICT,
                ErrorBody {
                    error: self.0.to_string(),
                    current_status: None,
                },
            ),
            EngineError::InvalidTransition { status, .. } => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: self.0.to_string(),
                    current_status: Some(*status),
                },
            ),
        };
        tracing::debug!(%status, error = %body.error, "request rejected");
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct DriverLocationBody {
    pub driver_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: Option<f64>,
    pub speed_kmh: Option<f64>,
}

pub async fn update_driver_location(
    State(state): State<AppState>,
    Json(body): Json<DriverLocationBody>,
) -> Result<Json<Position>, ApiError> {
    let update = PositionUpdate {
        latitude: body.latitude,
        longitude: body.longitude,
        heading: body.heading,
        speed_kmh: body.speed_kmh,
        ..Default::default()
    };
    let position = state.locations.upsert_driver(body.driver_id, update)?;
    Ok(Json(position))
}

#[derive(Debug, Deserialize)]
pub struct RiderLocationBody {
    pub rider_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub accuracy_meters: Option<f64>,
}

pub async fn update_rider_location(
    State(state): State<AppState>,
    Json(body): Json<RiderLocationBody>,
) -> Result<Json<Position>, ApiError> {
    let update = PositionUpdate {
        latitude: body.latitude,
        longitude: body.longitude,
        heading: body.heading,
        speed_kmh: body.speed_kmh,
        accuracy_meters: body.accuracy_meters,
        ..Default::default()
    };
    let position = state.locations.upsert_rider(body.rider_id, update)?;
    Ok(Json(position))
}

#[derive(Debug, Deserialize)]
pub struct AvailableDriversQuery {
    pub latitude: f64,
    pub longitude: f64,
    /// Search radius in kilometres.
    pub radius: f64,
    pub vehicle_type: Option<VehicleClass>,
}

#[derive(Debug, Serialize)]
pub struct AvailableDriver {
    pub driver_id: Uuid,
    pub display_name: String,
    pub vehicle_type: VehicleClass,
    pub distance_meters: u64,
    pub eta_minutes: u32,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AvailableDriversResponse {
    pub drivers: Vec<AvailableDriver>,
}

pub async fn available_drivers(
    State(state): State<AppState>,
    Query(query): Query<AvailableDriversQuery>,
) -> Result<Json<AvailableDriversResponse>, ApiError> {
    let origin = Coordinate::new(query.latitude, query.longitude)?;
    let nearby = state
        .matcher
        .nearby(origin, query.radius, query.vehicle_type)?;
    let drivers = nearby
        .into_iter()
        .map(|candidate| AvailableDriver {
            driver_id: candidate.driver_id,
            display_name: candidate.display_name,
            vehicle_type: candidate.vehicle_class,
            distance_meters: (candidate.distance_km * 1000.0).round() as u64,
            eta_minutes: candidate.eta_minutes,
            last_seen: candidate.observed_at,
        })
        .collect();
    Ok(Json(AvailableDriversResponse { drivers }))
}

#[derive(Debug, Deserialize)]
pub struct StopBody {
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
}

impl StopBody {
    fn into_stop(self) -> Result<Stop, EngineError> {
        Ok(Stop {
            coordinate: Coordinate::new(self.latitude, self.longitude)?,
            address: self.address.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct EstimateBody {
    pub pickup: StopBody,
    pub dropoff: StopBody,
    pub vehicle_type: VehicleClass,
    pub surge_multiplier: Option<f64>,
}

pub async fn estimate_fare(
    State(state): State<AppState>,
    Json(body): Json<EstimateBody>,
) -> Result<Json<FareQuote>, ApiError> {
    let pickup = Coordinate::new(body.pickup.latitude, body.pickup.longitude)?;
    let dropoff = Coordinate::new(body.dropoff.latitude, body.dropoff.longitude)?;
    let quote = state.estimator.quote(
        pickup,
        dropoff,
        body.vehicle_type,
        body.surge_multiplier.unwrap_or(1.0),
    )?;
    Ok(Json(quote))
}

#[derive(Debug, Deserialize)]
pub struct BookBody {
    pub rider_id: Uuid,
    pub pickup: StopBody,
    pub dropoff: StopBody,
    pub vehicle_type: VehicleClass,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub payment_method: Option<String>,
}

pub async fn book_ride(
    State(state): State<AppState>,
    Json(body): Json<BookBody>,
) -> Result<(StatusCode, Json<Ride>), ApiError> {
    let request = BookingRequest {
        rider_id: body.rider_id,
        pickup: body.pickup.into_stop()?,
        dropoff: body.dropoff.into_stop()?,
        vehicle_class: body.vehicle_type,
        scheduled_for: body.scheduled_for,
        payment_method: body.payment_method,
    };
    let ride = state.lifecycle.book(request)?;
    // Kick off the driver search right away for immediate rides.
    let ride = if ride.status == RideStatus::Pending {
        state.lifecycle.begin_search(ride.id)?
    } else {
        ride
    };
    Ok((StatusCode::CREATED, Json(ride)))
}

#[derive(Debug, Deserialize)]
pub struct DriverActionBody {
    pub driver_id: Uuid,
}

pub async fn accept_ride(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<DriverActionBody>,
) -> Result<Json<Ride>, ApiError> {
    Ok(Json(state.lifecycle.accept(id, body.driver_id)?))
}

pub async fn reject_ride(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<DriverActionBody>,
) -> Result<Json<Ride>, ApiError> {
    Ok(Json(state.lifecycle.reject(id, body.driver_id)?))
}

pub async fn arrive_ride(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<DriverActionBody>,
) -> Result<Json<Ride>, ApiError> {
    Ok(Json(state.lifecycle.arrive(id, body.driver_id)?))
}

pub async fn start_ride(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<DriverActionBody>,
) -> Result<Json<Ride>, ApiError> {
    Ok(Json(state.lifecycle.start(id, body.driver_id)?))
}

#[derive(Debug, Deserialize)]
pub struct CompleteBody {
    pub driver_id: Uuid,
    pub actual_distance_km: Option<f64>,
    pub tips: Option<f64>,
    pub bonuses: Option<f64>,
}

pub async fn complete_ride(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CompleteBody>,
) -> Result<Json<Ride>, ApiError> {
    let report = CompletionReport {
        actual_distance_km: body.actual_distance_km,
        tips: body.tips,
        bonuses: body.bonuses,
    };
    Ok(Json(state.lifecycle.complete(id, body.driver_id, report)?))
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub actor: Actor,
    pub reason: String,
}

pub async fn cancel_ride(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CancelBody>,
) -> Result<Json<Ride>, ApiError> {
    Ok(Json(state.lifecycle.cancel(id, body.actor, &body.reason)?))
}

#[derive(Debug, Deserialize)]
pub struct RateBody {
    pub actor: Actor,
    pub stars: u8,
}

pub async fn rate_ride(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RateBody>,
) -> Result<Json<Ride>, ApiError> {
    Ok(Json(state.lifecycle.rate(id, body.actor, body.stars)?))
}

pub async fn ride_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RideSnapshot>, ApiError> {
    Ok(Json(state.lifecycle.snapshot(id)?))
}
