//! Flat output records built from API resources.

use serde::Serialize;
use serde_json::Value;

use crate::providers::resources::{
    Device, DeviceState, Facility, IpAddress, OperatingSystem, Organization, Plan, Project, SshKey,
};

/// Address entry of a [`DeviceSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressSummary {
    pub address: String,
    pub address_family: u8,
    pub public: bool,
}

/// A device with convenience address fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSummary {
    pub id: String,
    pub hostname: String,
    pub tags: Vec<String>,
    pub locked: bool,
    pub state: DeviceState,
    pub ip_addresses: Vec<AddressSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ipv4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ipv6: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_ipv4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_ipv6: Option<String>,
}

impl From<&Device> for DeviceSummary {
    fn from(device: &Device) -> Self {
        let mut summary = Self {
            id: device.id.clone(),
            hostname: device.hostname.clone(),
            tags: device.tags.clone(),
            locked: device.locked,
            state: device.state,
            ip_addresses: Vec::with_capacity(device.ip_addresses.len()),
            public_ipv4: None,
            public_ipv6: None,
            private_ipv4: None,
            private_ipv6: None,
        };

        // Later entries of the same kind win.
        for ip in &device.ip_addresses {
            let slot = match (ip.public, ip.address_family) {
                (true, 4) => &mut summary.public_ipv4,
                (true, 6) => &mut summary.public_ipv6,
                (false, 4) => &mut summary.private_ipv4,
                (false, 6) => &mut summary.private_ipv6,
                _ => continue,
            };
            *slot = Some(ip.address.clone());
        }

        summary.ip_addresses = device
            .ip_addresses
            .iter()
            .map(|ip| AddressSummary {
                address: ip.address.clone(),
                address_family: ip.address_family,
                public: ip.public,
            })
            .collect();

        summary
    }
}

/// An IP block or assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpSummary {
    pub id: String,
    pub address: String,
    pub address_family: u8,
    pub cidr: u8,
    pub netmask: Option<String>,
    pub network: Option<String>,
    pub gateway: Option<String>,
    pub public: bool,
    pub management: bool,
    pub global_ip: bool,
    pub enabled: bool,
    pub tags: Vec<String>,
    /// Device the block is assigned to.
    pub device_id: Option<String>,
}

impl From<&IpAddress> for IpSummary {
    fn from(ip: &IpAddress) -> Self {
        Self {
            id: ip.id.clone(),
            address: ip.address.clone(),
            address_family: ip.address_family,
            cidr: ip.cidr,
            netmask: ip.netmask.clone(),
            network: ip.network.clone(),
            gateway: ip.gateway.clone(),
            public: ip.public,
            management: ip.management,
            global_ip: ip.global_ip,
            enabled: ip.enabled,
            tags: ip.tags.clone(),
            device_id: ip.assigned_to.as_ref().map(|href| href.id().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SshKeySummary {
    pub id: String,
    pub label: String,
    pub fingerprint: String,
    pub key: String,
}

impl From<&SshKey> for SshKeySummary {
    fn from(key: &SshKey) -> Self {
        Self {
            id: key.id.clone(),
            label: key.label.clone(),
            fingerprint: key.fingerprint.clone(),
            key: key.key.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    pub organization_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub customdata: Value,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl From<&Project> for ProjectSummary {
    fn from(project: &Project) -> Self {
        Self {
            id: project.id.clone(),
            name: project.name.clone(),
            organization_id: project.organization.as_ref().map(|h| h.id().to_string()),
            payment_method_id: project.payment_method.as_ref().map(|h| h.id().to_string()),
            customdata: project.customdata.clone(),
            created_at: project.created_at.clone(),
            updated_at: project.updated_at.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacilitySummary {
    pub id: String,
    pub name: String,
    pub code: String,
    pub features: Vec<String>,
    pub metro: Option<String>,
}

impl From<&Facility> for FacilitySummary {
    fn from(facility: &Facility) -> Self {
        Self {
            id: facility.id.clone(),
            name: facility.name.clone(),
            code: facility.code.clone(),
            features: facility.features.clone(),
            metro: facility.metro.as_ref().map(|m| m.code.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSummary {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub line: Option<String>,
    pub class: Option<String>,
    pub legacy: bool,
    /// Hourly price in USD.
    pub price: Option<f64>,
    pub specs: Value,
    /// Facility IDs the plan is available in.
    pub available_in: Vec<String>,
}

impl From<&Plan> for PlanSummary {
    fn from(plan: &Plan) -> Self {
        Self {
            id: plan.id.clone(),
            name: plan.name.clone(),
            slug: plan.slug.clone(),
            description: plan.description.clone(),
            line: plan.line.clone(),
            class: plan.class.clone(),
            legacy: plan.legacy,
            price: plan.pricing.as_ref().map(|p| p.hour),
            specs: plan.specs.clone(),
            available_in: plan
                .available_in
                .iter()
                .map(|h| h.id().to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperatingSystemSummary {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub distro: String,
    pub version: Option<String>,
    pub provisionable_on: Vec<String>,
    pub preinstallable: bool,
}

impl From<&OperatingSystem> for OperatingSystemSummary {
    fn from(os: &OperatingSystem) -> Self {
        Self {
            id: os.id.clone(),
            name: os.name.clone(),
            slug: os.slug.clone(),
            distro: os.distro.clone(),
            version: os.version.clone(),
            provisionable_on: os.provisionable_on.clone(),
            preinstallable: os.preinstallable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrganizationSummary {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub website: Option<String>,
    pub project_ids: Vec<String>,
}

impl From<&Organization> for OrganizationSummary {
    fn from(org: &Organization) -> Self {
        Self {
            id: org.id.clone(),
            name: org.name.clone(),
            description: org.description.clone(),
            website: org.website.clone(),
            project_ids: org.projects.iter().map(|h| h.id().to_string()).collect(),
        }
    }
}
