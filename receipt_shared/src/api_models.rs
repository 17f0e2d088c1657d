//! Shared data models for API requests and responses (host/web/CLI).

use serde::{Deserialize, Serialize};

/// Body of a submit-print-job request. `text` is the pre-rendered payload.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PrintRequest {
    pub text: String,
}

/// Outcome of an availability probe that did not hit a fault.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Online,
    /// Another job holds the device. A normal operating condition.
    Busy,
}

/// Represents the response for the /api/v1/availability endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityResponse {
    pub status: Availability,
}

impl From<Availability> for AvailabilityResponse {
    fn from(status: Availability) -> Self {
        Self { status }
    }
}
