//! Outbound notification boundary.
//!
//! The engine calls the dispatcher but does not implement delivery. Every
//! call is fire-and-forget: a failed dispatch is logged and swallowed, and
//! must never fail or roll back the state change that triggered it.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use thiserror::Error;
use uuid::Uuid;

use crate::location::Position;
use crate::ride::RideStatus;

#[derive(Debug, Error)]
#[error("dispatch failed: {0}")]
pub struct DispatchError(pub String);

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify_nearby_riders_of_driver_update(
        &self,
        driver_id: Uuid,
        position: Position,
    ) -> Result<(), DispatchError>;

    async fn notify_ride_subscribers_of_driver_location(
        &self,
        driver_id: Uuid,
        position: Position,
    ) -> Result<(), DispatchError>;

    async fn notify_ride_state_changed(
        &self,
        ride_id: Uuid,
        new_status: RideStatus,
        payload: Value,
    ) -> Result<(), DispatchError>;

    async fn notify_user(
        &self,
        user_id: Uuid,
        event_type: &str,
        payload: Value,
    ) -> Result<(), DispatchError>;
}

/// Spawn a dispatch without awaiting it. At-most-one delivery attempt;
/// failures are logged at warn and dropped.
pub(crate) fn spawn_dispatch<F>(what: &'static str, fut: F)
where
    F: Future<Output = Result<(), DispatchError>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = fut.await {
            tracing::warn!(%err, "{what} dispatch failed");
        }
    });
}

/// Dispatcher that drops everything. Useful when no delivery layer is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDispatcher;

#[async_trait]
impl NotificationDispatcher for NoopDispatcher {
    async fn notify_nearby_riders_of_driver_update(
        &self,
        _driver_id: Uuid,
        _position: Position,
    ) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn notify_ride_subscribers_of_driver_location(
        &self,
        _driver_id: Uuid,
        _position: Position,
    ) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn notify_ride_state_changed(
        &self,
        _ride_id: Uuid,
        _new_status: RideStatus,
        _payload: Value,
    ) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn notify_user(
        &self,
        _user_id: Uuid,
        _event_type: &str,
        _payload: Value,
    ) -> Result<(), DispatchError> {
        Ok(())
    }
}

/// Dispatcher that logs every event through `tracing`. Stands in for the
/// real-time delivery layer in development.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn notify_nearby_riders_of_driver_update(
        &self,
        driver_id: Uuid,
        position: Position,
    ) -> Result<(), DispatchError> {
        tracing::debug!(
            %driver_id,
            lat = position.coordinate.lat,
            lng = position.coordinate.lng,
            "driver update for nearby riders"
        );
        Ok(())
    }

    async fn notify_ride_subscribers_of_driver_location(
        &self,
        driver_id: Uuid,
        position: Position,
    ) -> Result<(), DispatchError> {
        tracing::debug!(
            %driver_id,
            lat = position.coordinate.lat,
            lng = position.coordinate.lng,
            "driver location for ride subscribers"
        );
        Ok(())
    }

    async fn notify_ride_state_changed(
        &self,
        ride_id: Uuid,
        new_status: RideStatus,
        _payload: Value,
    ) -> Result<(), DispatchError> {
        tracing::debug!(%ride_id, status = %new_status, "ride state changed");
        Ok(())
    }

    async fn notify_user(
        &self,
        user_id: Uuid,
        event_type: &str,
        _payload: Value,
    ) -> Result<(), DispatchError> {
        tracing::debug!(%user_id, event_type, "user notification");
        Ok(())
    }
}
