//! Resources returned by the Equinix Metal API.
//!
//! Every resource is decoded into a typed structure at the API boundary.
//! Fields the API may omit default to empty values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Shared types
// ============================================================================

/// Reference to another resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Href {
    /// Path of the referenced resource, e.g. `/metal/v1/projects/<id>`.
    pub href: String,
}

impl Href {
    /// Identifier of the referenced resource (last path segment).
    #[must_use]
    pub fn id(&self) -> &str {
        self.href
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

// ============================================================================
// Devices
// ============================================================================

/// Device state as reported by the API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Queued,
    Provisioning,
    Failed,
    PoweringOn,
    Active,
    PoweringOff,
    Inactive,
    Rebooting,
    /// A state this client does not know about.
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Provisioning => "provisioning",
            Self::Failed => "failed",
            Self::PoweringOn => "powering_on",
            Self::Active => "active",
            Self::PoweringOff => "powering_off",
            Self::Inactive => "inactive",
            Self::Rebooting => "rebooting",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A bare metal server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub state: DeviceState,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub ip_addresses: Vec<IpAddress>,
    pub facility: Option<Facility>,
    pub plan: Option<Plan>,
    pub operating_system: Option<OperatingSystem>,
    pub project: Option<Href>,
    /// Attributes without a typed field (billing cycle, timestamps, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Device {
    /// Whether the device holds a public address of the given family.
    #[must_use]
    pub fn has_public_ip(&self, address_family: u8) -> bool {
        self.ip_addresses
            .iter()
            .any(|ip| ip.public && ip.address_family == address_family && !ip.address.is_empty())
    }
}

// ============================================================================
// IP addresses
// ============================================================================

/// An IP address block, either reserved in a project or assigned to a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpAddress {
    pub id: String,
    pub address: String,
    pub address_family: u8,
    pub public: bool,
    pub cidr: u8,
    pub netmask: Option<String>,
    pub network: Option<String>,
    pub gateway: Option<String>,
    pub enabled: bool,
    pub management: bool,
    pub manageable: bool,
    pub global_ip: bool,
    pub tags: Vec<String>,
    /// Device the address is assigned to, if any.
    pub assigned_to: Option<Href>,
    pub created_at: Option<String>,
}

impl IpAddress {
    /// Whether this record is exactly `address/prefix_len`.
    #[must_use]
    pub fn matches(&self, address: &str, prefix_len: u8) -> bool {
        self.address == address && self.cidr == prefix_len
    }
}

// ============================================================================
// Projects, keys, organizations, users
// ============================================================================

/// A project groups devices and reserved IP space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub organization: Option<Href>,
    pub payment_method: Option<Href>,
    pub customdata: Value,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// SSH key registered with the user account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshKey {
    pub id: String,
    pub label: String,
    pub fingerprint: String,
    pub key: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// Organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub website: Option<String>,
    pub projects: Vec<Href>,
}

/// The user owning the API token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub default_organization_id: Option<String>,
    pub created_at: Option<String>,
}

// ============================================================================
// Catalog
// ============================================================================

/// Metro a facility belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metro {
    pub id: String,
    pub code: String,
    pub name: String,
}

/// Physical datacenter location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Facility {
    pub id: String,
    pub name: String,
    pub code: String,
    pub features: Vec<String>,
    pub metro: Option<Metro>,
}

/// Plan price.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pricing {
    pub hour: f64,
}

/// Hardware configuration devices are provisioned as.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub line: Option<String>,
    pub class: Option<String>,
    pub legacy: bool,
    pub pricing: Option<Pricing>,
    pub specs: Value,
    /// Facilities the plan can be deployed in.
    pub available_in: Vec<Href>,
}

/// Installable operating system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatingSystem {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub distro: String,
    pub version: Option<String>,
    /// Plan slugs the OS can be installed on.
    pub provisionable_on: Vec<String>,
    pub preinstallable: bool,
}

/// Capacity level of one plan in one facility.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityLevel {
    /// `normal`, `limited` or `unavailable`.
    pub level: String,
}

/// Capacity per facility code, then per plan slug.
pub type CapacityReport = BTreeMap<String, BTreeMap<String, CapacityLevel>>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_href_id() {
        let href = Href {
            href: "/metal/v1/projects/89b497ee-5afc-420a-8fb5-56984898f4df".into(),
        };
        assert_eq!(href.id(), "89b497ee-5afc-420a-8fb5-56984898f4df");
        assert_eq!(Href::default().id(), "");
    }

    #[test]
    fn test_device_decoding() {
        let device: Device = serde_json::from_value(json!({
            "id": "2a5122b9-c323-4d5c-b53c-9ad3f54273e7",
            "hostname": "my-server",
            "state": "powering_on",
            "tags": ["ci"],
            "locked": false,
            "billing_cycle": "hourly",
            "facility": {"id": "f1", "code": "sjc1", "name": "Sunnyvale"},
            "plan": {"id": "p1", "slug": "c3.small.x86"},
            "project": {"href": "/metal/v1/projects/p-1"},
            "ip_addresses": [
                {"id": "ip1", "address": "147.229.15.12", "address_family": 4, "public": true, "cidr": 31}
            ]
        }))
        .unwrap();

        assert_eq!(device.state, DeviceState::PoweringOn);
        assert_eq!(device.facility.unwrap().code, "sjc1");
        assert_eq!(device.project.unwrap().id(), "p-1");
        assert_eq!(device.extra["billing_cycle"], "hourly");
        assert!(device.ip_addresses[0].matches("147.229.15.12", 31));
    }

    #[test]
    fn test_unknown_state_falls_back() {
        let device: Device =
            serde_json::from_value(json!({"id": "x", "hostname": "h", "state": "deprovisioning"}))
                .unwrap();
        assert_eq!(device.state, DeviceState::Unknown);
    }

    #[test]
    fn test_has_public_ip() {
        let device = Device {
            ip_addresses: vec![
                IpAddress {
                    address: "10.0.0.2".into(),
                    address_family: 4,
                    public: false,
                    ..Default::default()
                },
                IpAddress {
                    address: "2604:1380::1".into(),
                    address_family: 6,
                    public: true,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert!(device.has_public_ip(6));
        assert!(!device.has_public_ip(4));
    }
}
