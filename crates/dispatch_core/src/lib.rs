pub mod config;
pub mod eligibility;
pub mod error;
pub mod fare;
pub mod geo;
pub mod lifecycle;
pub mod location;
pub mod matching;
pub mod notify;
pub mod ride;
#[cfg(feature = "test-helpers")]
pub mod test_helpers;
