//! Provider trait and request types for the Equinix Metal API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::resources::{
    CapacityReport, Device, Facility, IpAddress, OperatingSystem, Organization, Plan, Project,
    SshKey, User,
};

/// Errors that can occur during provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Power action on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceAction {
    PowerOn,
    PowerOff,
    Reboot,
}

impl std::fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PowerOn => write!(f, "power_on"),
            Self::PowerOff => write!(f, "power_off"),
            Self::Reboot => write!(f, "reboot"),
        }
    }
}

/// Request to create a device in a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateDeviceRequest {
    pub hostname: String,
    pub plan: String,
    pub operating_system: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userdata: Option<String>,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipxe_script_url: Option<String>,
    pub always_pxe: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Request to create a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    /// Create under this organization instead of the user's default one.
    #[serde(skip)]
    pub organization_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customdata: Option<serde_json::Value>,
}

/// Request to register an SSH key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSshKeyRequest {
    pub label: String,
    pub key: String,
}

/// Typed access to the Equinix Metal API.
///
/// Implementations are expected to surface transport and HTTP failures as
/// errors and to return fully decoded resources on success.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// List all projects visible to the token.
    async fn list_projects(&self) -> Result<Vec<Project>, ProviderError>;

    /// Create a project.
    async fn create_project(&self, req: CreateProjectRequest) -> Result<Project, ProviderError>;

    /// Delete a project.
    async fn delete_project(&self, id: &str) -> Result<(), ProviderError>;

    /// List all devices in a project.
    async fn list_devices(&self, project_id: &str) -> Result<Vec<Device>, ProviderError>;

    /// Get device by ID.
    async fn get_device(&self, id: &str) -> Result<Device, ProviderError>;

    /// Create a device in a project.
    async fn create_device(
        &self,
        project_id: &str,
        req: CreateDeviceRequest,
    ) -> Result<Device, ProviderError>;

    /// Delete a device.
    async fn delete_device(&self, id: &str) -> Result<(), ProviderError>;

    /// Trigger a power action on a device.
    async fn device_action(&self, id: &str, action: DeviceAction) -> Result<(), ProviderError>;

    /// List SSH keys of the current user.
    async fn list_ssh_keys(&self) -> Result<Vec<SshKey>, ProviderError>;

    /// Register an SSH key.
    async fn create_ssh_key(&self, req: CreateSshKeyRequest) -> Result<SshKey, ProviderError>;

    /// Delete an SSH key.
    async fn delete_ssh_key(&self, id: &str) -> Result<(), ProviderError>;

    /// List IP reservations of a project.
    async fn list_project_ips(&self, project_id: &str) -> Result<Vec<IpAddress>, ProviderError>;

    /// Assign an address block (`address/prefix`) to a device.
    async fn create_device_ip(
        &self,
        device_id: &str,
        cidr: &str,
    ) -> Result<IpAddress, ProviderError>;

    /// Remove an IP assignment.
    async fn delete_ip(&self, id: &str) -> Result<(), ProviderError>;

    /// List facilities.
    async fn list_facilities(&self) -> Result<Vec<Facility>, ProviderError>;

    /// List plans, including where they are available.
    async fn list_plans(&self) -> Result<Vec<Plan>, ProviderError>;

    /// List operating systems.
    async fn list_operating_systems(&self) -> Result<Vec<OperatingSystem>, ProviderError>;

    /// List organizations visible to the token.
    async fn list_organizations(&self) -> Result<Vec<Organization>, ProviderError>;

    /// Get the current user.
    async fn get_user(&self) -> Result<User, ProviderError>;

    /// Get the capacity report per facility and plan.
    async fn get_capacity(&self, include_legacy: bool) -> Result<CapacityReport, ProviderError>;
}
