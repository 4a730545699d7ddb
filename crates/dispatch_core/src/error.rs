//! Error taxonomy for the matching and lifecycle engine.
//!
//! Stale positions are deliberately absent: a stale location is excluded from
//! matching, never surfaced as an error.

use thiserror::Error;

use crate::ride::RideStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or out-of-range input. Rejected synchronously, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// The referenced ride, driver, or position does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A concurrent actor won the race; the caller may retry against the new state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The requested action is not legal from the ride's current status.
    /// The current status is included so the client can resynchronize.
    #[error("invalid transition: cannot {action} a ride in status {status}")]
    InvalidTransition {
        action: &'static str,
        status: RideStatus,
    },
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}
