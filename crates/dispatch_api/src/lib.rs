//! Illustrative REST surface over the matching and lifecycle engine.
//!
//! Authentication and role checks happen in an upstream collaborator, so
//! actor ids arrive in request bodies here. Handlers are thin: validate the
//! shape, call the engine, map the error taxonomy onto status codes
//! (400 validation / invalid transition, 404 not found, 409 conflict).

pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use chrono::Utc;

use dispatch_core::config::EngineConfig;
use dispatch_core::eligibility::DriverDirectory;
use dispatch_core::error::EngineError;
use dispatch_core::fare::FareEstimator;
use dispatch_core::lifecycle::RideLifecycle;
use dispatch_core::location::LocationStore;
use dispatch_core::matching::GeoMatcher;
use dispatch_core::notify::NotificationDispatcher;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EngineConfig>,
    pub locations: Arc<LocationStore>,
    pub matcher: Arc<GeoMatcher>,
    pub lifecycle: Arc<RideLifecycle>,
    pub estimator: Arc<FareEstimator>,
}

impl AppState {
    /// Wire the engine components against the external collaborators.
    pub fn new(
        config: EngineConfig,
        directory: Arc<dyn DriverDirectory>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let config = Arc::new(config);
        let estimator = Arc::new(FareEstimator::new(
            config.fare.clone(),
            Duration::from_secs(config.quote_validity_seconds),
        )?);
        let locations = Arc::new(LocationStore::new(Arc::clone(&dispatcher)));
        let matcher = Arc::new(GeoMatcher::new(
            Arc::clone(&locations),
            directory,
            Arc::clone(&config),
        ));
        let lifecycle = Arc::new(RideLifecycle::new(
            Arc::clone(&estimator),
            Arc::clone(&locations),
            dispatcher,
            Arc::clone(&config),
        ));
        Ok(Self {
            config,
            locations,
            matcher,
            lifecycle,
            estimator,
        })
    }

    /// Start the rider-history retention sweep and the scheduled-ride
    /// release tick.
    pub fn spawn_background_tasks(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let sweep = self.locations.spawn_retention_sweep(
            Duration::from_secs(self.config.retention_sweep_seconds),
            Duration::from_secs(self.config.rider_retention_hours * 3600),
        );

        let lifecycle = Arc::clone(&self.lifecycle);
        let release = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let released = lifecycle.release_due(Utc::now());
                if !released.is_empty() {
                    tracing::info!(count = released.len(), "released scheduled rides");
                }
            }
        });

        vec![sweep, release]
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/drivers/location", post(handlers::update_driver_location))
        .route("/riders/location", post(handlers::update_rider_location))
        .route(
            "/riders/available-drivers",
            get(handlers::available_drivers),
        )
        .route("/rides/estimate", post(handlers::estimate_fare))
        .route("/rides/book", post(handlers::book_ride))
        .route("/rides/{id}/accept", put(handlers::accept_ride))
        .route("/rides/{id}/reject", put(handlers::reject_ride))
        .route("/rides/{id}/arrive", put(handlers::arrive_ride))
        .route("/rides/{id}/start", put(handlers::start_ride))
        .route("/rides/{id}/complete", put(handlers::complete_ride))
        .route("/rides/{id}/cancel", put(handlers::cancel_ride))
        .route("/rides/{id}/rate", put(handlers::rate_ride))
        .route("/rides/{id}/status", get(handlers::ride_status))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(addr: std::net::SocketAddr, state: AppState) -> std::io::Result<()> {
    let background = state.spawn_background_tasks();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "dispatch api listening");
    let result = axum::serve(listener, router(state)).await;
    for handle in background {
        handle.abort();
    }
    result
}

/// Default tracing setup: RUST_LOG-driven filter, info fallback.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
