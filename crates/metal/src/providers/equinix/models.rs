//! Equinix Metal request bodies and response envelopes.

use serde::{Deserialize, Serialize};

use crate::providers::resources::{CapacityReport, Href};

// ============================================================================
// Pagination
// ============================================================================

/// Pagination metadata attached to list responses.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Meta {
    /// Link to the next page, absent on the last one.
    pub next: Option<Href>,
    pub current_page: Option<u32>,
    pub last_page: Option<u32>,
}

impl Meta {
    /// Whether another page follows this one.
    pub fn has_next(&self) -> bool {
        match (self.current_page, self.last_page) {
            (Some(current), Some(last)) => current < last,
            _ => self.next.is_some(),
        }
    }
}

// ============================================================================
// Device types
// ============================================================================

/// Body of `POST /devices/{id}/actions`.
#[derive(Debug, Serialize)]
pub struct ActionRequest {
    #[serde(rename = "type")]
    pub action_type: String,
}

/// Body of `POST /devices/{id}/ips`.
#[derive(Debug, Serialize)]
pub struct CreateIpAssignmentRequest {
    /// Address block in `address/prefix` form.
    pub address: String,
}

// ============================================================================
// Capacity types
// ============================================================================

/// Response of `GET /capacity`.
#[derive(Debug, Deserialize)]
pub struct CapacityResponse {
    #[serde(default)]
    pub capacity: CapacityReport,
}
