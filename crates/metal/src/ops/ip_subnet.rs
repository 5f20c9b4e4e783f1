//! Assignment of IP blocks to devices.

use serde::Serialize;
use tracing::info;

use super::{exclusive, Presence};
use crate::error::{api, OpError, OpResult};
use crate::providers::resources::{Device, IpAddress};
use crate::providers::Provider;
use crate::serialize::IpSummary;
use crate::validate::{is_valid_hostname, is_valid_uuid};

/// Parameters of an IP subnet operation.
#[derive(Debug, Clone, Default)]
pub struct IpSubnetParams {
    /// Block in `address/prefix_len` form.
    pub cidr: String,
    pub device_id: Option<String>,
    /// Unique hostname of the target device within `project_id`.
    pub hostname: Option<String>,
    pub project_id: Option<String>,
    pub state: Presence,
    /// Validate only.
    pub check_mode: bool,
}

/// Outcome of an IP subnet operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IpSubnetResult {
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet: Option<IpSummary>,
}

/// Split `address/prefix_len`.
///
/// # Errors
/// Fails when the slash is missing or the prefix is not a number.
pub fn parse_subnet_cidr(cidr: &str) -> OpResult<(String, u8)> {
    let (address, prefix) = cidr.split_once('/').ok_or_else(|| {
        OpError::invalid("CIDR expression in wrong format, must be address/prefix_len")
    })?;
    let prefix_len = prefix.parse::<u8>().map_err(|_| {
        OpError::invalid(format!("Wrong prefix length in CIDR expression {cidr}"))
    })?;
    Ok((address.to_string(), prefix_len))
}

enum Target<'a> {
    Id(&'a str),
    Hostname(&'a str),
    None,
}

impl IpSubnetParams {
    fn target(&self) -> OpResult<Target<'_>> {
        let device_id = self.device_id.as_deref().filter(|s| !s.is_empty());
        let hostname = self.hostname.as_deref().filter(|s| !s.is_empty());
        exclusive(&[("hostname", hostname.is_some(), "device_id", device_id.is_some())])?;

        if let Some(id) = device_id {
            if !is_valid_uuid(id) {
                return Err(OpError::invalid(format!("Device ID '{id}' does not seem to be valid")));
            }
            return Ok(Target::Id(id));
        }
        if let Some(hostname) = hostname {
            if !is_valid_hostname(hostname) {
                return Err(OpError::invalid(format!(
                    "Hostname '{hostname}' does not seem to be valid"
                )));
            }
            if self.project_id().is_none() {
                return Err(OpError::invalid("missing parameter(s) required by 'hostname': project_id"));
            }
            return Ok(Target::Hostname(hostname));
        }
        if self.project_id().is_none() {
            return Err(OpError::invalid(
                "one of the following is required: hostname, device_id, project_id",
            ));
        }
        Ok(Target::None)
    }

    fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref().filter(|s| !s.is_empty())
    }
}

/// Ensure `cidr` is assigned to, or released from, the target device.
///
/// # Errors
/// Fails on invalid parameters, an ambiguous target, or any API error.
pub async fn act_on_assignment(
    provider: &dyn Provider,
    params: &IpSubnetParams,
) -> OpResult<IpSubnetResult> {
    let (address, prefix_len) = parse_subnet_cidr(&params.cidr)?;
    let target = params.target()?;
    let mut result = IpSubnetResult::default();

    if params.check_mode {
        return Ok(result);
    }

    let device = match target {
        Target::Id(id) => provider
            .get_device(id)
            .await
            .map_err(api(format!("failed to get device {id}")))?,
        Target::Hostname(hostname) => {
            let devices = list_project_devices(provider, params).await?;
            let mut matching = devices.into_iter().filter(|d| d.hostname == hostname);
            match (matching.next(), matching.next()) {
                (Some(device), None) => device,
                (Some(_), Some(_)) => {
                    return Err(OpError::invalid(format!(
                        "There are more than one devices matching given hostname {hostname}"
                    )))
                }
                (None, _) => {
                    return Err(OpError::invalid(format!(
                        "There is no device matching given hostname {hostname}"
                    )))
                }
            }
        }
        Target::None => {
            if params.state == Presence::Absent {
                for device in list_project_devices(provider, params).await? {
                    if let Some(ip) = device.ip_addresses.iter().find(|ip| ip.matches(&address, prefix_len)) {
                        release(provider, ip).await?;
                        return Ok(IpSubnetResult {
                            changed: true,
                            device_id: Some(device.id.clone()),
                            subnet: Some(IpSummary::from(ip)),
                        });
                    }
                }
            }
            return Err(OpError::invalid(
                "If you assign an address, you must specify either target device ID or target unique hostname.",
            ));
        }
    };

    result.device_id = Some(device.id.clone());

    let matching: Vec<&IpAddress> = device
        .ip_addresses
        .iter()
        .filter(|ip| ip.matches(&address, prefix_len))
        .collect();

    let existing = match matching.as_slice() {
        [] => None,
        [ip] => Some(*ip),
        _ => {
            return Err(OpError::invalid(format!(
                "IP address {} is assigned more than once for device {}",
                params.cidr, device.hostname
            )))
        }
    };
    result.subnet = existing.map(IpSummary::from);

    match (params.state, existing) {
        (Presence::Absent, Some(ip)) => {
            release(provider, ip).await?;
            result.changed = true;
        }
        (Presence::Present, None) => {
            let ip = provider
                .create_device_ip(&device.id, &params.cidr)
                .await
                .map_err(api(format!("failed to assign {} to device {}", params.cidr, device.hostname)))?;
            info!(device = %device.hostname, cidr = %params.cidr, "Assigned IP subnet");
            result.subnet = Some(IpSummary::from(&ip));
            result.changed = true;
        }
        _ => {}
    }

    Ok(result)
}

async fn list_project_devices(provider: &dyn Provider, params: &IpSubnetParams) -> OpResult<Vec<Device>> {
    let project_id = params.project_id().unwrap_or_default();
    provider
        .list_devices(project_id)
        .await
        .map_err(api(format!("failed to list devices in project {project_id}")))
}

async fn release(provider: &dyn Provider, ip: &IpAddress) -> OpResult<()> {
    provider
        .delete_ip(&ip.id)
        .await
        .map_err(api(format!("failed to remove IP assignment {}/{}", ip.address, ip.cidr)))?;
    info!(id = %ip.id, address = %ip.address, cidr = ip.cidr, "Released IP subnet");
    Ok(())
}
