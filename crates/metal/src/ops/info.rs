//! Read-only catalog and account queries.
//!
//! Each query lists one resource type and keeps the entries whose field
//! is in the supplied list. At most one filter may be given per query; no
//! filter returns everything.

use serde::Serialize;

use super::exclusive;
use crate::error::{api, OpError, OpResult};
use crate::providers::resources::{CapacityReport, User};
use crate::providers::Provider;
use crate::serialize::{
    DeviceSummary, FacilitySummary, IpSummary, OperatingSystemSummary, OrganizationSummary,
    PlanSummary, ProjectSummary, SshKeySummary,
};
use crate::validate::{is_valid_hostname, is_valid_uuid};

/// Largest number of device IDs or hostnames a device query accepts.
pub const MAX_DEVICES: usize = 100;

/// Keep items whose `field` is in `wanted`, or every item if `wanted` is empty.
fn keep<T>(items: Vec<T>, wanted: &[String], field: impl Fn(&T) -> &str) -> Vec<T> {
    if wanted.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter(|item| wanted.iter().any(|w| w == field(item)))
        .collect()
}

/// Filter by one of two fields.
#[derive(Debug, Clone, Default)]
pub struct PairFilter {
    pub ids: Vec<String>,
    /// Second key: codes, names, distros... depending on the query.
    pub values: Vec<String>,
}

impl PairFilter {
    fn check(&self, ids: &str, values: &str) -> OpResult<()> {
        exclusive(&[(values, !self.values.is_empty(), ids, !self.ids.is_empty())])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacilityInfo {
    pub facilities: Vec<FacilitySummary>,
}

/// Facilities, filtered by `ids` or by codes.
///
/// # Errors
/// Fails if both filters are set or the API call fails.
pub async fn facility_info(provider: &dyn Provider, filter: &PairFilter) -> OpResult<FacilityInfo> {
    filter.check("ids", "codes")?;
    let facilities = provider
        .list_facilities()
        .await
        .map_err(api("failed to list facilities"))?;
    let facilities = keep(facilities, &filter.ids, |f| f.id.as_str());
    let facilities = keep(facilities, &filter.values, |f| f.code.as_str());
    Ok(FacilityInfo {
        facilities: facilities.iter().map(FacilitySummary::from).collect(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanInfo {
    pub plans: Vec<PlanSummary>,
}

/// Plans, filtered by `ids` or by names.
///
/// # Errors
/// Fails if both filters are set or the API call fails.
pub async fn plan_info(provider: &dyn Provider, filter: &PairFilter) -> OpResult<PlanInfo> {
    filter.check("ids", "names")?;
    let plans = provider.list_plans().await.map_err(api("failed to list plans"))?;
    let plans = keep(plans, &filter.ids, |p| p.id.as_str());
    let plans = keep(plans, &filter.values, |p| p.name.as_str());
    Ok(PlanInfo {
        plans: plans.iter().map(PlanSummary::from).collect(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperatingSystemInfo {
    pub operating_systems: Vec<OperatingSystemSummary>,
}

/// Operating systems, filtered by slugs (`ids`) or by distros.
///
/// # Errors
/// Fails if both filters are set or the API call fails.
pub async fn operating_system_info(
    provider: &dyn Provider,
    filter: &PairFilter,
) -> OpResult<OperatingSystemInfo> {
    filter.check("slugs", "distros")?;
    let systems = provider
        .list_operating_systems()
        .await
        .map_err(api("failed to list operating systems"))?;
    let systems = keep(systems, &filter.ids, |o| o.slug.as_str());
    let systems = keep(systems, &filter.values, |o| o.distro.as_str());
    Ok(OperatingSystemInfo {
        operating_systems: systems.iter().map(OperatingSystemSummary::from).collect(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrganizationInfo {
    pub organizations: Vec<OrganizationSummary>,
}

/// Organizations, filtered by `ids` or by names.
///
/// # Errors
/// Fails if both filters are set or the API call fails.
pub async fn organization_info(
    provider: &dyn Provider,
    filter: &PairFilter,
) -> OpResult<OrganizationInfo> {
    filter.check("ids", "names")?;
    let orgs = provider
        .list_organizations()
        .await
        .map_err(api("failed to list organizations"))?;
    let orgs = keep(orgs, &filter.ids, |o| o.id.as_str());
    let orgs = keep(orgs, &filter.values, |o| o.name.as_str());
    Ok(OrganizationInfo {
        organizations: orgs.iter().map(OrganizationSummary::from).collect(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectInfo {
    pub projects: Vec<ProjectSummary>,
}

/// Projects, filtered by `ids` or by names.
///
/// # Errors
/// Fails if both filters are set or the API call fails.
pub async fn project_info(provider: &dyn Provider, filter: &PairFilter) -> OpResult<ProjectInfo> {
    filter.check("ids", "names")?;
    let projects = provider
        .list_projects()
        .await
        .map_err(api("failed to list projects"))?;
    let projects = keep(projects, &filter.ids, |p| p.id.as_str());
    let projects = keep(projects, &filter.values, |p| p.name.as_str());
    Ok(ProjectInfo {
        projects: projects.iter().map(ProjectSummary::from).collect(),
    })
}

/// SSH key query filter.
#[derive(Debug, Clone, Default)]
pub struct SshKeyFilter {
    pub ids: Vec<String>,
    pub labels: Vec<String>,
    pub fingerprints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SshKeyInfo {
    pub sshkeys: Vec<SshKeySummary>,
}

/// SSH keys, filtered by ids, labels or fingerprints.
///
/// # Errors
/// Fails if more than one filter is set or the API call fails.
pub async fn sshkey_info(provider: &dyn Provider, filter: &SshKeyFilter) -> OpResult<SshKeyInfo> {
    let (ids, labels, prints) = (
        !filter.ids.is_empty(),
        !filter.labels.is_empty(),
        !filter.fingerprints.is_empty(),
    );
    exclusive(&[
        ("labels", labels, "ids", ids),
        ("labels", labels, "fingerprints", prints),
        ("ids", ids, "fingerprints", prints),
    ])?;

    let keys = provider
        .list_ssh_keys()
        .await
        .map_err(api("failed to list SSH keys"))?;
    let keys = keep(keys, &filter.ids, |k| k.id.as_str());
    let keys = keep(keys, &filter.labels, |k| k.label.as_str());
    let keys = keep(keys, &filter.fingerprints, |k| k.fingerprint.as_str());
    Ok(SshKeyInfo {
        sshkeys: keys.iter().map(SshKeySummary::from).collect(),
    })
}

/// Device query parameters.
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub project_id: String,
    pub device_ids: Vec<String>,
    pub hostnames: Vec<String>,
}

impl DeviceFilter {
    fn normalized(&self) -> OpResult<(Vec<String>, Vec<String>)> {
        exclusive(&[(
            "hostnames",
            !self.hostnames.is_empty(),
            "device_ids",
            !self.device_ids.is_empty(),
        )])?;

        let ids: Vec<String> = self.device_ids.iter().map(|s| s.trim().to_string()).collect();
        if let Some(bad) = ids.iter().find(|id| !is_valid_uuid(id)) {
            return Err(OpError::invalid(format!("Device ID '{bad}' does not seem to be valid")));
        }
        if ids.len() > MAX_DEVICES {
            return Err(OpError::invalid(format!(
                "You specified too many devices, max is {MAX_DEVICES}"
            )));
        }

        let hostnames: Vec<String> = self.hostnames.iter().map(|s| s.trim().to_string()).collect();
        if let Some(bad) = hostnames.iter().find(|h| !is_valid_hostname(h)) {
            return Err(OpError::invalid(format!("Hostname '{bad}' does not seem to be valid")));
        }
        if hostnames.len() > MAX_DEVICES {
            return Err(OpError::invalid(format!(
                "You specified too many hostnames, max is {MAX_DEVICES}"
            )));
        }
        Ok((ids, hostnames))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub devices: Vec<DeviceSummary>,
}

/// Devices of a project, filtered by IDs or hostnames.
///
/// # Errors
/// Fails on invalid or too many identifiers, or if the API call fails.
pub async fn device_info(provider: &dyn Provider, filter: &DeviceFilter) -> OpResult<DeviceInfo> {
    if filter.project_id.is_empty() {
        return Err(OpError::invalid("project_id is required"));
    }
    let (ids, hostnames) = filter.normalized()?;

    let devices = provider
        .list_devices(&filter.project_id)
        .await
        .map_err(api("failed to list devices"))?;
    let devices = keep(devices, &ids, |d| d.id.as_str());
    let devices = keep(devices, &hostnames, |d| d.hostname.as_str());
    Ok(DeviceInfo {
        devices: devices.iter().map(DeviceSummary::from).collect(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpInfo {
    pub ips: Vec<IpSummary>,
}

/// IP reservations of a project.
///
/// # Errors
/// Fails if `project_id` is not a UUID or the API call fails.
pub async fn ip_info(provider: &dyn Provider, project_id: &str) -> OpResult<IpInfo> {
    if !is_valid_uuid(project_id) {
        return Err(OpError::invalid(format!(
            "Project ID {project_id} does not seem to be valid"
        )));
    }
    let ips = provider
        .list_project_ips(project_id)
        .await
        .map_err(api("failed to list project IPs"))?;
    Ok(IpInfo {
        ips: ips.iter().map(IpSummary::from).collect(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub user: User,
}

/// The user owning the token.
///
/// # Errors
/// Fails if the API call fails.
pub async fn user_info(provider: &dyn Provider) -> OpResult<UserInfo> {
    let user = provider.get_user().await.map_err(api("failed to get current user"))?;
    Ok(UserInfo { user })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacityInfo {
    pub capacity: CapacityReport,
}

/// Capacity per facility and plan.
///
/// # Errors
/// Fails if the API call fails.
pub async fn capacity_info(provider: &dyn Provider, include_legacy: bool) -> OpResult<CapacityInfo> {
    let capacity = provider
        .get_capacity(include_legacy)
        .await
        .map_err(api("failed to get capacity"))?;
    Ok(CapacityInfo { capacity })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::resources::{CapacityLevel, Device, Facility, OperatingSystem, SshKey};
    use crate::providers::MockProvider;
    use std::collections::BTreeMap;

    const PROJECT: &str = "89b497ee-5afc-420a-8fb5-56984898f4df";
    const DEVICE_A: &str = "1fb4faf8-a638-4ac7-8f47-86fe514c30d8";

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    fn facility(id: &str, code: &str) -> Facility {
        Facility {
            id: id.into(),
            code: code.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_facility_info_by_code() {
        let mut mock = MockProvider::new();
        mock.expect_list_facilities()
            .returning(|| Ok(vec![facility("f1", "sjc1"), facility("f2", "ams1"), facility("f3", "ny5")]));

        let filter = PairFilter {
            values: strings(&["ams1", "ny5"]),
            ..Default::default()
        };
        let info = facility_info(&mock, &filter).await.unwrap();
        let codes: Vec<_> = info.facilities.iter().map(|f| f.code.as_str()).collect();
        assert_eq!(codes, ["ams1", "ny5"]);
    }

    #[tokio::test]
    async fn test_no_filter_returns_everything() {
        let mut mock = MockProvider::new();
        mock.expect_list_facilities()
            .returning(|| Ok(vec![facility("f1", "sjc1"), facility("f2", "ams1")]));

        let info = facility_info(&mock, &PairFilter::default()).await.unwrap();
        assert_eq!(info.facilities.len(), 2);
    }

    #[tokio::test]
    async fn test_filters_are_exclusive() {
        let mock = MockProvider::new();
        let filter = PairFilter {
            ids: strings(&["a"]),
            values: strings(&["b"]),
        };
        let err = plan_info(&mock, &filter).await.unwrap_err();
        assert_eq!(err.to_string(), "parameters are mutually exclusive: names|ids");
    }

    #[tokio::test]
    async fn test_operating_system_info_by_distro() {
        let mut mock = MockProvider::new();
        mock.expect_list_operating_systems().returning(|| {
            Ok(vec![
                OperatingSystem {
                    slug: "ubuntu_22_04".into(),
                    distro: "ubuntu".into(),
                    ..Default::default()
                },
                OperatingSystem {
                    slug: "rocky_9".into(),
                    distro: "rocky".into(),
                    ..Default::default()
                },
            ])
        });

        let filter = PairFilter {
            values: strings(&["rocky"]),
            ..Default::default()
        };
        let info = operating_system_info(&mock, &filter).await.unwrap();
        assert_eq!(info.operating_systems.len(), 1);
        assert_eq!(info.operating_systems[0].slug, "rocky_9");
    }

    #[tokio::test]
    async fn test_sshkey_info_by_fingerprint() {
        let mut mock = MockProvider::new();
        mock.expect_list_ssh_keys().returning(|| {
            Ok(vec![
                SshKey {
                    id: "k1".into(),
                    fingerprint: "aa:bb".into(),
                    ..Default::default()
                },
                SshKey {
                    id: "k2".into(),
                    fingerprint: "cc:dd".into(),
                    ..Default::default()
                },
            ])
        });

        let filter = SshKeyFilter {
            fingerprints: strings(&["cc:dd"]),
            ..Default::default()
        };
        let info = sshkey_info(&mock, &filter).await.unwrap();
        assert_eq!(info.sshkeys[0].id, "k2");
    }

    #[tokio::test]
    async fn test_device_info_filters_hostnames() {
        let mut mock = MockProvider::new();
        mock.expect_list_devices()
            .withf(|project| project == PROJECT)
            .returning(|_| {
                Ok(vec![
                    Device {
                        id: DEVICE_A.into(),
                        hostname: "web-1".into(),
                        ..Default::default()
                    },
                    Device {
                        id: "other".into(),
                        hostname: "db-1".into(),
                        ..Default::default()
                    },
                ])
            });

        let filter = DeviceFilter {
            project_id: PROJECT.into(),
            hostnames: strings(&[" web-1 "]),
            ..Default::default()
        };
        let info = device_info(&mock, &filter).await.unwrap();
        assert_eq!(info.devices.len(), 1);
        assert_eq!(info.devices[0].id, DEVICE_A);
    }

    #[tokio::test]
    async fn test_device_info_limits() {
        let mock = MockProvider::new();
        let filter = DeviceFilter {
            project_id: PROJECT.into(),
            hostnames: (0..=MAX_DEVICES).map(|i| format!("host-{i}")).collect(),
            ..Default::default()
        };
        let err = device_info(&mock, &filter).await.unwrap_err();
        assert_eq!(err.to_string(), "You specified too many hostnames, max is 100");

        let filter = DeviceFilter {
            project_id: PROJECT.into(),
            device_ids: strings(&["nope"]),
            ..Default::default()
        };
        assert!(device_info(&mock, &filter).await.is_err());
    }

    #[tokio::test]
    async fn test_ip_info_validates_project() {
        let mock = MockProvider::new();
        let err = ip_info(&mock, "project").await.unwrap_err();
        assert_eq!(err.to_string(), "Project ID project does not seem to be valid");
    }

    #[tokio::test]
    async fn test_capacity_info_passes_legacy_flag() {
        let mut mock = MockProvider::new();
        mock.expect_get_capacity()
            .withf(|legacy| *legacy)
            .returning(|_| {
                let mut plans = BTreeMap::new();
                plans.insert(
                    "c3.small.x86".to_string(),
                    CapacityLevel {
                        level: "normal".into(),
                    },
                );
                Ok(BTreeMap::from([("sjc1".to_string(), plans)]))
            });

        let info = capacity_info(&mock, true).await.unwrap();
        assert_eq!(info.capacity["sjc1"]["c3.small.x86"].level, "normal");
    }
}
