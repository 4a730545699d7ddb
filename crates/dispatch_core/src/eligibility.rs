//! Driver eligibility: the read-only view of operational flags owned by the
//! external driver-management collaborator.
//!
//! The engine never mutates these fields; document and approval workflows
//! happen upstream, so a driver visible here as approved is fully verified.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fare::VehicleClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OperationalStatus {
    Online,
    Busy,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ActiveState {
    Active,
    Deactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverEligibility {
    pub display_name: String,
    pub operational_status: OperationalStatus,
    pub approval_state: ApprovalState,
    pub active_state: ActiveState,
    pub vehicle_class: VehicleClass,
}

impl DriverEligibility {
    /// Online, approved, and active. Evaluated before any distance math so
    /// ineligible drivers cost nothing during a scan.
    pub fn is_matchable(&self) -> bool {
        self.operational_status == OperationalStatus::Online
            && self.approval_state == ApprovalState::Approved
            && self.active_state == ActiveState::Active
    }
}

/// Boundary to the external driver-management system.
pub trait DriverDirectory: Send + Sync {
    fn eligibility(&self, driver_id: Uuid) -> Option<DriverEligibility>;
}

/// In-memory directory, used for wiring and tests.
#[derive(Debug, Default)]
pub struct InMemoryDriverDirectory {
    drivers: DashMap<Uuid, DriverEligibility>,
}

impl InMemoryDriverDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, driver_id: Uuid, eligibility: DriverEligibility) {
        self.drivers.insert(driver_id, eligibility);
    }
}

impl DriverDirectory for InMemoryDriverDirectory {
    fn eligibility(&self, driver_id: Uuid) -> Option<DriverEligibility> {
        self.drivers.get(&driver_id).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eligibility() -> DriverEligibility {
        DriverEligibility {
            display_name: "Test Driver".into(),
            operational_status: OperationalStatus::Online,
            approval_state: ApprovalState::Approved,
            active_state: ActiveState::Active,
            vehicle_class: VehicleClass::Sedan,
        }
    }

    #[test]
    fn fully_flagged_driver_is_matchable() {
        assert!(eligibility().is_matchable());
    }

    #[test]
    fn any_failing_flag_blocks_matching() {
        let mut offline = eligibility();
        offline.operational_status = OperationalStatus::Offline;
        assert!(!offline.is_matchable());

        let mut busy = eligibility();
        busy.operational_status = OperationalStatus::Busy;
        assert!(!busy.is_matchable());

        let mut unapproved = eligibility();
        unapproved.approval_state = ApprovalState::Pending;
        assert!(!unapproved.is_matchable());

        let mut deactivated = eligibility();
        deactivated.active_state = ActiveState::Deactive;
        assert!(!deactivated.is_matchable());
    }
}
