//! Device reconciliation.
//!
//! Compares requested devices (by ID or hostname) with the devices listed in
//! a project, applies the power/delete transitions needed to reach the
//! target state, creates missing devices, and optionally blocks until the
//! devices converge.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use super::exclusive;
use crate::config::PollConfig;
use crate::error::{api, OpError, OpResult};
use crate::providers::resources::{Device, DeviceState};
use crate::providers::{CreateDeviceRequest, DeviceAction, Provider};
use crate::serialize::DeviceSummary;
use crate::validate::{is_valid_hostname, is_valid_uuid};

/// Integer placeholder in a hostname template, e.g. `%d` or `%02d`.
static COUNT_DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"%(\d{0,2})d").unwrap());

/// Operating system slug that enables custom iPXE options.
const CUSTOM_IPXE: &str = "custom_ipxe";

/// Target state of the requested devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceTarget {
    /// Create missing devices, leave existing ones alone.
    #[default]
    Present,
    /// Delete the devices.
    Absent,
    /// Power on and wait until every device is active.
    Active,
    /// Power off.
    Inactive,
    /// Reboot active devices, power on inactive ones.
    Rebooted,
}

impl DeviceTarget {
    fn creates_missing(self) -> bool {
        matches!(self, Self::Present | Self::Active | Self::Rebooted)
    }
}

impl std::fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Rebooted => "rebooted",
        };
        f.write_str(s)
    }
}

/// Action required to move an existing device towards a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Already there, or the device is converging on its own.
    Skip,
    Delete,
    Power(DeviceAction),
    /// No known way to reach the target from the current state.
    Unsupported,
}

/// Look up the transition from `current` to `target`.
#[must_use]
pub fn plan_transition(current: DeviceState, target: DeviceTarget) -> Transition {
    use DeviceState as S;
    use DeviceTarget as T;

    match (target, current) {
        (T::Present, _) => Transition::Skip,
        (T::Absent, _) => Transition::Delete,
        (T::Active, S::Active | S::Provisioning | S::Rebooting)
        | (T::Inactive, S::Inactive)
        | (T::Rebooted, S::Provisioning | S::Rebooting) => Transition::Skip,
        (T::Active | T::Rebooted, S::Inactive) => Transition::Power(DeviceAction::PowerOn),
        (T::Inactive, S::Active) => Transition::Power(DeviceAction::PowerOff),
        (T::Rebooted, S::Active) => Transition::Power(DeviceAction::Reboot),
        _ => Transition::Unsupported,
    }
}

/// Parameters of a device operation.
#[derive(Debug, Clone, Default)]
pub struct DeviceParams {
    pub project_id: Option<String>,
    pub device_ids: Vec<String>,
    /// One hostname or template, or a list of hostnames.
    pub hostnames: Vec<String>,
    /// Number of devices to expand a single hostname into (default 1).
    pub count: Option<u32>,
    /// First number used in the expansion (default 1).
    pub count_offset: Option<u32>,
    pub tags: Vec<String>,
    pub facility: Option<String>,
    pub features: Option<Map<String, Value>>,
    pub locked: bool,
    pub operating_system: Option<String>,
    pub plan: Option<String>,
    pub state: DeviceTarget,
    pub user_data: Option<String>,
    /// Wait for a public address of this family (4 or 6) after creation.
    pub wait_for_public_ipv: Option<u8>,
    /// Interval and limit of convergence waits.
    pub poll: PollConfig,
    pub ipxe_script_url: Option<String>,
    pub always_pxe: bool,
}

/// Devices requested by ID or by hostname; exactly one list is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSelection {
    pub ids: Vec<String>,
    pub hostnames: Vec<String>,
}

impl DeviceParams {
    /// Validate identifiers and option combinations.
    ///
    /// # Errors
    /// Returns [`OpError::Validation`] on conflicting or malformed input.
    pub fn selection(&self) -> OpResult<DeviceSelection> {
        let ids_set = !self.device_ids.is_empty();
        exclusive(&[
            ("hostnames", !self.hostnames.is_empty(), "device_ids", ids_set),
            ("count", self.count.is_some(), "device_ids", ids_set),
            ("count_offset", self.count_offset.is_some(), "device_ids", ids_set),
        ])?;

        if let Some(family) = self.wait_for_public_ipv {
            if family != 4 && family != 6 {
                return Err(OpError::invalid(format!(
                    "wait_for_public_IPv must be one of: 4, 6, got: {family}"
                )));
            }
        }

        if ids_set {
            for id in &self.device_ids {
                if !is_valid_uuid(id) {
                    return Err(OpError::invalid(format!(
                        "Device ID '{id}' does not seem to be valid"
                    )));
                }
            }
            return Ok(DeviceSelection {
                ids: self.device_ids.clone(),
                hostnames: Vec::new(),
            });
        }

        if self.hostnames.is_empty() {
            return Err(OpError::invalid(
                "one of the following is required: device_ids, hostnames",
            ));
        }

        let hostnames = expand_hostnames(
            &self.hostnames,
            self.count.unwrap_or(1),
            self.count_offset.unwrap_or(1),
        )?;
        Ok(DeviceSelection {
            ids: Vec::new(),
            hostnames,
        })
    }

    fn project_id(&self) -> OpResult<&str> {
        self.project_id
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| OpError::invalid("project_id is required for device operations"))
    }

    /// Build the creation request shared by every new device.
    fn creation_template(&self) -> OpResult<CreateDeviceRequest> {
        let operating_system = self
            .operating_system
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| OpError::invalid("operating_system parameter is required for new device."))?;
        let plan = self
            .plan
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| OpError::invalid("plan parameter is required for new device."))?;

        let ipxe_script_url = self.ipxe_script_url.clone().filter(|u| !u.is_empty());
        if operating_system != CUSTOM_IPXE {
            if ipxe_script_url.is_some() {
                return Err(OpError::invalid(
                    "ipxe_script_url parameter is not valid for non custom_ipxe operating_system.",
                ));
            }
            if self.always_pxe {
                return Err(OpError::invalid(
                    "always_pxe parameter is not valid for non custom_ipxe operating_system.",
                ));
            }
        }

        Ok(CreateDeviceRequest {
            hostname: String::new(),
            plan,
            operating_system,
            facility: self.facility.clone(),
            tags: self.tags.clone(),
            userdata: self.user_data.clone(),
            locked: self.locked,
            ipxe_script_url,
            always_pxe: self.always_pxe,
            features: self.features.clone(),
        })
    }
}

/// Expand a hostname template over `count` numbers starting at `offset`.
///
/// A single hostname containing `%d`, `%Nd` or `%0Nd` is formatted with each
/// number. A single hostname without a placeholder gets `%02d` appended when
/// `count > 1`. Every resulting hostname must be valid.
///
/// # Errors
/// Returns [`OpError::Validation`] if several hostnames are combined with
/// `count > 1` or if an expanded hostname is invalid.
pub fn expand_hostnames(hostnames: &[String], count: u32, offset: u32) -> OpResult<Vec<String>> {
    if hostnames.len() > 1 && count > 1 {
        return Err(OpError::invalid(
            "If you set count>1, you should only specify one hostname with the %d formatter, not a list of hostnames.",
        ));
    }

    let mut expanded = hostnames.to_vec();
    if let [template] = hostnames {
        if count > 0 {
            let numbers = offset..offset.saturating_add(count);
            if COUNT_DIRECTIVE.is_match(template) {
                expanded = numbers
                    .map(|n| {
                        COUNT_DIRECTIVE
                            .replace(template, |caps: &Captures<'_>| format_count(&caps[1], n))
                            .into_owned()
                    })
                    .collect();
            } else if count > 1 {
                expanded = numbers.map(|n| format!("{template}{n:02}")).collect();
            }
        }
    }

    for hostname in &expanded {
        if !is_valid_hostname(hostname) {
            return Err(OpError::invalid(format!(
                "Hostname '{hostname}' does not seem to be valid"
            )));
        }
    }

    Ok(expanded)
}

/// Render `n` with the width flags of a `%d` directive.
fn format_count(flags: &str, n: u32) -> String {
    let width: usize = flags.parse().unwrap_or(0);
    if flags.starts_with('0') {
        format!("{n:0width$}")
    } else {
        format!("{n:width$}")
    }
}

/// Outcome of a device operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceResult {
    pub changed: bool,
    pub devices: Vec<DeviceSummary>,
}

/// Reconcile the requested devices with the target state.
///
/// # Errors
/// Fails on invalid parameters, on any API error, on a state pair the
/// transition table does not cover, and when a wait times out.
pub async fn act_on_devices(provider: &dyn Provider, params: &DeviceParams) -> OpResult<DeviceResult> {
    let selection = params.selection()?;
    let project_id = params.project_id()?;
    let target = params.state;

    let existing = provider
        .list_devices(project_id)
        .await
        .map_err(api("failed to list devices"))?;

    let create_hostnames: Vec<String> = if target.creates_missing() {
        selection
            .hostnames
            .iter()
            .filter(|hostname| !existing.iter().any(|d| &d.hostname == *hostname))
            .cloned()
            .collect()
    } else {
        Vec::new()
    };

    let template = if create_hostnames.is_empty() {
        None
    } else {
        Some(params.creation_template()?)
    };

    let process: Vec<Device> = existing
        .into_iter()
        .filter(|d| selection.ids.contains(&d.id) || selection.hostnames.contains(&d.hostname))
        .collect();

    let mut changed = false;

    for device in &process {
        match plan_transition(device.state, target) {
            Transition::Skip => {
                debug!(hostname = %device.hostname, state = %device.state, "No transition needed");
            }
            Transition::Delete => {
                provider
                    .delete_device(&device.id)
                    .await
                    .map_err(api(format!("failed to delete device {}", device.hostname)))?;
                changed = true;
            }
            Transition::Power(action) => {
                provider
                    .device_action(&device.id, action)
                    .await
                    .map_err(api(format!("failed to {action} device {}", device.hostname)))?;
                changed = true;
            }
            Transition::Unsupported => {
                return Err(OpError::UnknownTransition {
                    hostname: device.hostname.clone(),
                    current: device.state,
                    target: target.to_string(),
                });
            }
        }
    }

    let mut created = Vec::with_capacity(create_hostnames.len());
    if let Some(template) = template {
        for hostname in create_hostnames {
            let req = CreateDeviceRequest {
                hostname: hostname.clone(),
                ..template.clone()
            };
            let device = provider
                .create_device(project_id, req)
                .await
                .map_err(api(format!("failed to create device {hostname}")))?;
            created.push(device);
        }
        changed = true;

        if let Some(family) = params.wait_for_public_ipv {
            created = wait_for_public_ip(provider, project_id, &created, family, params.poll).await?;
        }
    }

    let mut processed = created;
    processed.extend(process);

    if target == DeviceTarget::Active {
        processed = wait_for_devices_active(provider, project_id, &processed, params.poll).await?;
    }

    info!(changed, devices = processed.len(), state = %target, "Devices reconciled");

    Ok(DeviceResult {
        changed,
        devices: processed.iter().map(DeviceSummary::from).collect(),
    })
}

/// Re-list the project and keep only the watched devices.
async fn refresh(provider: &dyn Provider, project_id: &str, watched: &[Device]) -> OpResult<Vec<Device>> {
    let ids: HashSet<&str> = watched.iter().map(|d| d.id.as_str()).collect();
    let devices = provider
        .list_devices(project_id)
        .await
        .map_err(api("failed to refresh device list"))?;
    Ok(devices
        .into_iter()
        .filter(|d| ids.contains(d.id.as_str()))
        .collect())
}

/// Poll until every watched device satisfies `ready`.
///
/// Devices missing from the listing count as not ready. On timeout the
/// error names every device that had not converged.
async fn wait_until<F>(
    provider: &dyn Provider,
    project_id: &str,
    watched: &[Device],
    poll: PollConfig,
    condition: String,
    ready: F,
) -> OpResult<Vec<Device>>
where
    F: Fn(&Device) -> bool,
{
    info!(
        devices = watched.len(),
        timeout_secs = poll.timeout.as_secs(),
        "Waiting for {condition}"
    );

    let start = Instant::now();
    let deadline = start + poll.timeout;
    let mut refreshed = watched.to_vec();

    while Instant::now() < deadline {
        refreshed = refresh(provider, project_id, watched).await?;

        if refreshed.len() == watched.len() && refreshed.iter().all(|d| ready(d)) {
            info!(elapsed_secs = start.elapsed().as_secs(), "Devices converged");
            return Ok(refreshed);
        }

        debug!(
            pending = refreshed.iter().filter(|d| !ready(*d)).count(),
            elapsed_secs = start.elapsed().as_secs(),
            "Polling device list"
        );

        let remaining = deadline.saturating_duration_since(Instant::now());
        sleep(poll.interval.min(remaining)).await;
    }

    let hostnames = watched
        .iter()
        .filter(|w| {
            refreshed
                .iter()
                .find(|d| d.id == w.id)
                .is_none_or(|d| !ready(d))
        })
        .map(|d| d.hostname.clone())
        .collect();

    Err(OpError::Timeout { condition, hostnames })
}

/// Wait until every device reports `active`.
async fn wait_for_devices_active(
    provider: &dyn Provider,
    project_id: &str,
    watched: &[Device],
    poll: PollConfig,
) -> OpResult<Vec<Device>> {
    wait_until(provider, project_id, watched, poll, "state \"active\"".into(), |d| {
        d.state == DeviceState::Active
    })
    .await
}

/// Wait until every device holds a public address of `family`.
async fn wait_for_public_ip(
    provider: &dyn Provider,
    project_id: &str,
    watched: &[Device],
    family: u8,
    poll: PollConfig,
) -> OpResult<Vec<Device>> {
    wait_until(
        provider,
        project_id,
        watched,
        poll,
        format!("public IPv{family} address"),
        |d| d.has_public_ip(family),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::resources::IpAddress;
    use crate::providers::MockProvider;
    use std::time::Duration;

    const PROJECT: &str = "89b497ee-5afc-420a-8fb5-56984898f4df";
    const DEVICE_A: &str = "1fb4faf8-a638-4ac7-8f47-86fe514c30d8";
    const DEVICE_B: &str = "2eb4faf8-a638-4ac7-8f47-86fe514c3043";

    fn device(id: &str, hostname: &str, state: DeviceState) -> Device {
        Device {
            id: id.into(),
            hostname: hostname.into(),
            state,
            ..Default::default()
        }
    }

    fn params(hostnames: &[&str], state: DeviceTarget) -> DeviceParams {
        DeviceParams {
            project_id: Some(PROJECT.into()),
            hostnames: hostnames.iter().map(ToString::to_string).collect(),
            state,
            ..Default::default()
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    // ── Hostname expansion ──────────────────────────────────────────

    #[test]
    fn test_expand_zero_padded_template() {
        let expanded = expand_hostnames(&strings(&["server-%02d"]), 3, 1).unwrap();
        assert_eq!(expanded, strings(&["server-01", "server-02", "server-03"]));
    }

    #[test]
    fn test_expand_applies_offset() {
        let expanded = expand_hostnames(&strings(&["node%d"]), 2, 9).unwrap();
        assert_eq!(expanded, strings(&["node9", "node10"]));
    }

    #[test]
    fn test_expand_single_count_still_formats() {
        let expanded = expand_hostnames(&strings(&["web-%d"]), 1, 5).unwrap();
        assert_eq!(expanded, strings(&["web-5"]));
    }

    #[test]
    fn test_expand_appends_suffix_without_placeholder() {
        let expanded = expand_hostnames(&strings(&["worker"]), 3, 1).unwrap();
        assert_eq!(expanded, strings(&["worker01", "worker02", "worker03"]));

        let single = expand_hostnames(&strings(&["worker"]), 1, 1).unwrap();
        assert_eq!(single, strings(&["worker"]));
    }

    #[test]
    fn test_expand_count_property() {
        for count in 1..=25 {
            for offset in [0, 1, 7, 99] {
                let expanded = expand_hostnames(&strings(&["host-%03d"]), count, offset).unwrap();
                assert_eq!(expanded.len(), count as usize);
                assert_eq!(expanded[0], format!("host-{offset:03}"));
                assert!(expanded.iter().all(|h| is_valid_hostname(h)));
            }
        }
    }

    #[test]
    fn test_expand_rejects_list_with_count() {
        let err = expand_hostnames(&strings(&["a", "b"]), 2, 1).unwrap_err();
        assert!(err.to_string().contains("count>1"));
    }

    #[test]
    fn test_expand_rejects_invalid_hostname() {
        let err = expand_hostnames(&strings(&["bad_host"]), 1, 1).unwrap_err();
        assert_eq!(err.to_string(), "Hostname 'bad_host' does not seem to be valid");

        // space padding produces an invalid name
        assert!(expand_hostnames(&strings(&["h%3d"]), 1, 1).is_err());
    }

    // ── Transition table ────────────────────────────────────────────

    #[test]
    fn test_transition_table() {
        use DeviceState as S;
        use DeviceTarget as T;

        assert_eq!(plan_transition(S::Inactive, T::Active), Transition::Power(DeviceAction::PowerOn));
        assert_eq!(plan_transition(S::Active, T::Active), Transition::Skip);
        assert_eq!(plan_transition(S::Provisioning, T::Active), Transition::Skip);
        assert_eq!(plan_transition(S::Rebooting, T::Active), Transition::Skip);
        assert_eq!(plan_transition(S::Failed, T::Active), Transition::Unsupported);
        assert_eq!(plan_transition(S::Queued, T::Active), Transition::Unsupported);

        assert_eq!(plan_transition(S::Active, T::Inactive), Transition::Power(DeviceAction::PowerOff));
        assert_eq!(plan_transition(S::Inactive, T::Inactive), Transition::Skip);
        assert_eq!(plan_transition(S::Provisioning, T::Inactive), Transition::Unsupported);

        assert_eq!(plan_transition(S::Active, T::Rebooted), Transition::Power(DeviceAction::Reboot));
        assert_eq!(plan_transition(S::Inactive, T::Rebooted), Transition::Power(DeviceAction::PowerOn));
        assert_eq!(plan_transition(S::Rebooting, T::Rebooted), Transition::Skip);
        assert_eq!(plan_transition(S::PoweringOff, T::Rebooted), Transition::Unsupported);

        for state in [S::Queued, S::Provisioning, S::Failed, S::Active, S::Inactive, S::Unknown] {
            assert_eq!(plan_transition(state, T::Absent), Transition::Delete);
            assert_eq!(plan_transition(state, T::Present), Transition::Skip);
        }
    }

    // ── Parameter validation ────────────────────────────────────────

    #[test]
    fn test_selection_requires_identifiers() {
        let err = params(&[], DeviceTarget::Present).selection().unwrap_err();
        assert!(err.to_string().contains("device_ids, hostnames"));
    }

    #[test]
    fn test_selection_exclusive_options() {
        let mut p = params(&["web"], DeviceTarget::Present);
        p.device_ids = vec![DEVICE_A.into()];
        assert!(p.selection().is_err());

        let p = DeviceParams {
            device_ids: vec![DEVICE_A.into()],
            count: Some(2),
            ..Default::default()
        };
        let err = p.selection().unwrap_err();
        assert_eq!(err.to_string(), "parameters are mutually exclusive: count|device_ids");
    }

    #[test]
    fn test_selection_validates_ids() {
        let p = DeviceParams {
            device_ids: vec!["not-a-uuid".into()],
            ..Default::default()
        };
        assert_eq!(
            p.selection().unwrap_err().to_string(),
            "Device ID 'not-a-uuid' does not seem to be valid"
        );
    }

    #[test]
    fn test_selection_rejects_unknown_address_family() {
        let mut p = params(&["web"], DeviceTarget::Present);
        p.wait_for_public_ipv = Some(5);
        assert!(p.selection().is_err());
    }

    #[test]
    fn test_custom_ipxe_options_require_custom_ipxe() {
        let mut p = params(&["web"], DeviceTarget::Present);
        p.operating_system = Some("ubuntu_22_04".into());
        p.plan = Some("c3.small.x86".into());
        p.always_pxe = true;
        assert!(p.creation_template().is_err());

        p.operating_system = Some(CUSTOM_IPXE.into());
        p.ipxe_script_url = Some("https://boot.example.com/ipxe".into());
        let template = p.creation_template().unwrap();
        assert!(template.always_pxe);
        assert_eq!(template.ipxe_script_url.as_deref(), Some("https://boot.example.com/ipxe"));
    }

    // ── Reconciliation ──────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_inactive_to_active_powers_on_only() {
        let mut mock = MockProvider::new();
        let mut listed = 0;
        mock.expect_list_devices()
            .withf(|project| project == PROJECT)
            .returning(move |_| {
                listed += 1;
                let state = if listed == 1 {
                    DeviceState::Inactive
                } else {
                    DeviceState::Active
                };
                Ok(vec![device(DEVICE_A, "web", state)])
            });
        mock.expect_device_action()
            .withf(|id, action| id == DEVICE_A && *action == DeviceAction::PowerOn)
            .times(1)
            .returning(|_, _| Ok(()));

        let result = act_on_devices(&mock, &params(&["web"], DeviceTarget::Active))
            .await
            .unwrap();

        assert!(result.changed);
        assert_eq!(result.devices.len(), 1);
        assert_eq!(result.devices[0].state, DeviceState::Active);
    }

    #[tokio::test]
    async fn test_active_to_active_is_noop() {
        let mut mock = MockProvider::new();
        mock.expect_list_devices()
            .returning(|_| Ok(vec![device(DEVICE_A, "web", DeviceState::Active)]));
        mock.expect_device_action().never();
        mock.expect_create_device().never();

        let result = act_on_devices(&mock, &params(&["web"], DeviceTarget::Active))
            .await
            .unwrap();

        assert!(!result.changed);
        assert_eq!(result.devices[0].hostname, "web");
    }

    #[tokio::test]
    async fn test_present_creates_missing_hostnames() {
        let mut mock = MockProvider::new();
        mock.expect_list_devices()
            .returning(|_| Ok(vec![device(DEVICE_A, "server-01", DeviceState::Active)]));
        mock.expect_create_device()
            .times(1)
            .withf(|project, req| {
                project == PROJECT
                    && req.hostname == "server-02"
                    && req.plan == "c3.small.x86"
                    && req.tags == ["ci"]
            })
            .returning(|_, req| Ok(device(DEVICE_B, &req.hostname, DeviceState::Queued)));

        let mut p = params(&["server-%02d"], DeviceTarget::Present);
        p.count = Some(2);
        p.operating_system = Some("ubuntu_22_04".into());
        p.plan = Some("c3.small.x86".into());
        p.tags = vec!["ci".into()];

        let result = act_on_devices(&mock, &p).await.unwrap();
        assert!(result.changed);
        let hostnames: Vec<_> = result.devices.iter().map(|d| d.hostname.as_str()).collect();
        assert_eq!(hostnames, ["server-02", "server-01"]);
    }

    #[tokio::test]
    async fn test_create_requires_plan_before_mutating() {
        let mut mock = MockProvider::new();
        mock.expect_list_devices().returning(|_| Ok(vec![]));
        mock.expect_create_device().never();

        let mut p = params(&["web"], DeviceTarget::Present);
        p.operating_system = Some("ubuntu_22_04".into());

        let err = act_on_devices(&mock, &p).await.unwrap_err();
        assert_eq!(err.to_string(), "plan parameter is required for new device.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_public_ipv4() {
        let mut mock = MockProvider::new();
        let mut listed = 0;
        mock.expect_list_devices().returning(move |_| {
            listed += 1;
            let mut d = device(DEVICE_A, "web", DeviceState::Provisioning);
            if listed > 2 {
                d.ip_addresses = vec![IpAddress {
                    address: "147.75.1.2".into(),
                    address_family: 4,
                    public: true,
                    ..Default::default()
                }];
            }
            Ok(if listed == 1 { vec![] } else { vec![d] })
        });
        mock.expect_create_device()
            .returning(|_, req| Ok(device(DEVICE_A, &req.hostname, DeviceState::Queued)));

        let mut p = params(&["web"], DeviceTarget::Present);
        p.operating_system = Some("ubuntu_22_04".into());
        p.plan = Some("c3.small.x86".into());
        p.wait_for_public_ipv = Some(4);

        let result = act_on_devices(&mock, &p).await.unwrap();
        assert_eq!(result.devices[0].public_ipv4.as_deref(), Some("147.75.1.2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_wait_times_out_naming_hostname() {
        let mut mock = MockProvider::new();
        mock.expect_list_devices()
            .returning(|_| Ok(vec![device(DEVICE_A, "stuck", DeviceState::Provisioning)]));

        let mut p = params(&["stuck"], DeviceTarget::Active);
        p.poll = PollConfig::with_timeout(Duration::from_secs(1));

        let start = Instant::now();
        let err = act_on_devices(&mock, &p).await.unwrap_err();
        let elapsed = start.elapsed();

        match err {
            OpError::Timeout { hostnames, .. } => assert_eq!(hostnames, ["stuck"]),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed <= p.poll.interval);
    }

    #[tokio::test]
    async fn test_unknown_transition_fails() {
        let mut mock = MockProvider::new();
        mock.expect_list_devices()
            .returning(|_| Ok(vec![device(DEVICE_A, "broken", DeviceState::Failed)]));
        mock.expect_device_action().never();

        let err = act_on_devices(&mock, &params(&["broken"], DeviceTarget::Inactive))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "I don't know how to process existing device broken from state failed to state inactive"
        );
    }

    #[tokio::test]
    async fn test_absent_deletes_by_id() {
        let mut mock = MockProvider::new();
        mock.expect_list_devices().returning(|_| {
            Ok(vec![
                device(DEVICE_A, "a", DeviceState::Active),
                device(DEVICE_B, "b", DeviceState::Provisioning),
            ])
        });
        mock.expect_delete_device()
            .withf(|id| id == DEVICE_B)
            .times(1)
            .returning(|_| Ok(()));

        let p = DeviceParams {
            project_id: Some(PROJECT.into()),
            device_ids: vec![DEVICE_B.into()],
            state: DeviceTarget::Absent,
            ..Default::default()
        };
        let result = act_on_devices(&mock, &p).await.unwrap();
        assert!(result.changed);
        assert_eq!(result.devices.len(), 1);
    }

    #[tokio::test]
    async fn test_absent_does_not_create() {
        let mut mock = MockProvider::new();
        mock.expect_list_devices().returning(|_| Ok(vec![]));
        mock.expect_create_device().never();

        let result = act_on_devices(&mock, &params(&["gone"], DeviceTarget::Absent))
            .await
            .unwrap();
        assert!(!result.changed);
        assert!(result.devices.is_empty());
    }
}
