//! Dynamic inventory built from the devices of one or more projects.
//!
//! A YAML source file names the projects to scan and the keyed groups to
//! derive from host variables. Devices are flattened into host variables,
//! grouped, and rendered in the dynamic-inventory JSON layout. Query
//! results can be cached on disk between runs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use crate::providers::resources::Device;
use crate::providers::Provider;

/// Consumer token sent with inventory API requests.
pub const CONSUMER_TOKEN: &str = "equinix-metal-inventory";

/// Group every discovered host belongs to.
pub const ROOT_GROUP: &str = "equinix_metal";

/// Accepted values of the `plugin` option.
pub const PLUGIN_NAMES: [&str; 2] = ["equinix_metal", "equinix.metal.device"];

/// Accepted source file name endings.
pub const SOURCE_SUFFIXES: [&str; 2] = ["equinix_metal.yml", "equinix_metal.yaml"];

pub const DEFAULT_CACHE_TIMEOUT_SECS: u64 = 3600;

static UNSAFE_GROUP_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]").unwrap());

fn default_cache_timeout() -> u64 {
    DEFAULT_CACHE_TIMEOUT_SECS
}

fn default_separator() -> String {
    "_".to_string()
}

/// Inventory source file.
#[derive(Debug, Clone, Deserialize)]
pub struct InventorySource {
    pub plugin: String,
    #[serde(default)]
    pub api_token: Option<String>,
    /// Project IDs to scan; empty means every visible project.
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub keyed_groups: Vec<KeyedGroup>,
    /// Fail on keyed groups whose key is missing.
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub cache: bool,
    /// Seconds a cached result stays valid; zero never expires.
    #[serde(default = "default_cache_timeout")]
    pub cache_timeout: u64,
    /// Cache directory.
    #[serde(default)]
    pub cache_connection: Option<PathBuf>,
}

/// Groups derived from the value of a host variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct KeyedGroup {
    pub key: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_separator")]
    pub separator: String,
}

impl KeyedGroup {
    /// Group names for `vars`, or `None` when the key is absent or empty.
    fn group_names(&self, vars: &Map<String, Value>) -> Option<Vec<String>> {
        let values: Vec<String> = match vars.get(&self.key)? {
            Value::Null => Vec::new(),
            Value::String(s) => vec![s.clone()],
            Value::Array(items) => items.iter().filter_map(scalar_string).collect(),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| {
                    format!("{k}{}{}", self.separator, scalar_string(v).unwrap_or_default())
                })
                .collect(),
            other => vec![other.to_string()],
        };
        let names: Vec<String> = values
            .into_iter()
            .filter(|v| !v.is_empty())
            .map(|v| safe_group_name(&format!("{}{}{v}", self.prefix, self.separator)))
            .collect();
        (!names.is_empty()).then_some(names)
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
        other => Some(other.to_string()),
    }
}

/// Replace every character outside `[A-Za-z0-9_]` with `_`.
#[must_use]
pub fn safe_group_name(name: &str) -> String {
    UNSAFE_GROUP_CHARS.replace_all(name, "_").into_owned()
}

/// Whether `path` is an existing file with an accepted name.
#[must_use]
pub fn verify_file(path: &Path) -> bool {
    let name_ok = path
        .to_str()
        .is_some_and(|p| SOURCE_SUFFIXES.iter().any(|s| p.ends_with(s)));
    if !name_ok {
        debug!(
            path = %path.display(),
            "inventory file name must end with 'equinix_metal.yml' or 'equinix_metal.yaml'"
        );
    }
    name_ok && path.is_file()
}

/// Read and check an inventory source file.
///
/// # Errors
/// Fails if the file name is not accepted, the YAML is invalid, or the
/// `plugin` option names another plugin.
pub fn load_source(path: &Path) -> Result<InventorySource> {
    if !verify_file(path) {
        bail!(
            "{} is not a valid inventory source: file name must end with 'equinix_metal.yml' or 'equinix_metal.yaml'",
            path.display()
        );
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read inventory source {}", path.display()))?;
    let source: InventorySource = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse inventory source {}", path.display()))?;

    if !PLUGIN_NAMES.contains(&source.plugin.as_str()) {
        bail!(
            "plugin must be one of {PLUGIN_NAMES:?}, got '{}'",
            source.plugin
        );
    }
    Ok(source)
}

/// Strings trimmed, null as empty string, integers and booleans as is.
/// Nested values and floats are dropped.
fn plain(value: &Value) -> Option<Value> {
    match value {
        Value::Null => Some(Value::String(String::new())),
        Value::String(s) => Some(Value::String(s.trim().to_string())),
        Value::Bool(_) => Some(value.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
        Value::Number(_) | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Flatten a device into host variables.
#[must_use]
pub fn host_vars(device: &Device) -> Map<String, Value> {
    let mut vars = Map::new();

    for (key, value) in &device.extra {
        if let Some(value) = plain(value) {
            vars.insert(safe_group_name(key), value);
        }
    }

    vars.insert("id".into(), Value::String(device.id.trim().to_string()));
    vars.insert("hostname".into(), Value::String(device.hostname.clone()));
    vars.insert("state".into(), Value::String(device.state.to_string()));
    vars.insert("locked".into(), Value::Bool(device.locked));
    vars.insert("tags".into(), json!(device.tags));
    vars.insert(
        "facility".into(),
        Value::String(device.facility.as_ref().map(|f| f.code.clone()).unwrap_or_default()),
    );
    vars.insert(
        "operating_system".into(),
        Value::String(
            device
                .operating_system
                .as_ref()
                .map(|o| o.slug.clone())
                .unwrap_or_default(),
        ),
    );
    vars.insert(
        "plan".into(),
        Value::String(device.plan.as_ref().map(|p| p.slug.clone()).unwrap_or_default()),
    );
    vars.insert(
        "project".into(),
        Value::String(
            device
                .project
                .as_ref()
                .map(|p| p.id().to_string())
                .unwrap_or_default(),
        ),
    );

    let addresses: Vec<Value> = device
        .ip_addresses
        .iter()
        .map(|ip| {
            json!({
                "address": ip.address,
                "address_family": ip.address_family,
                "public": ip.public,
                "cidr": ip.cidr,
                "enabled": ip.enabled,
                "gateway": ip.gateway,
                "global_ip": ip.global_ip,
                "manageable": ip.manageable,
                "management": ip.management,
                "netmask": ip.netmask,
                "network": ip.network,
                "tags": ip.tags,
            })
        })
        .collect();
    vars.insert("ip_addresses".into(), Value::Array(addresses));

    vars
}

/// A group of the rendered inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Group {
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub hosts: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub children: BTreeSet<String>,
}

/// Hosts, their variables and their groups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inventory {
    pub groups: BTreeMap<String, Group>,
    pub hostvars: BTreeMap<String, Map<String, Value>>,
}

impl Inventory {
    fn add_host(&mut self, group: &str, hostname: &str) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .hosts
            .insert(hostname.to_string());
        self.groups
            .entry("all".to_string())
            .or_default()
            .children
            .insert(group.to_string());
    }

    /// Group hosts and apply keyed groups.
    ///
    /// # Errors
    /// With `strict`, fails when a keyed group key is missing on a host.
    pub fn populate(hosts: Vec<Map<String, Value>>, keyed_groups: &[KeyedGroup], strict: bool) -> Result<Self> {
        let mut inventory = Self::default();
        inventory.groups.entry("all".to_string()).or_default();

        for vars in hosts {
            let Some(hostname) = vars.get("hostname").and_then(Value::as_str).map(str::to_string) else {
                warn!("Skipping device without hostname");
                continue;
            };

            inventory.add_host(ROOT_GROUP, &hostname);

            for keyed in keyed_groups {
                match keyed.group_names(&vars) {
                    Some(names) => {
                        for name in names {
                            inventory.add_host(&name, &hostname);
                        }
                    }
                    None if strict => {
                        bail!("Could not generate group for host {hostname}: key '{}' is missing or empty", keyed.key);
                    }
                    None => debug!(host = %hostname, key = %keyed.key, "Keyed group key not set"),
                }
            }

            inventory.hostvars.insert(hostname, vars);
        }

        Ok(inventory)
    }

    /// Render as dynamic-inventory JSON.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("_meta".into(), json!({ "hostvars": self.hostvars }));
        for (name, group) in &self.groups {
            out.insert(name.clone(), json!(group));
        }
        Value::Object(out)
    }
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    timestamp: DateTime<Utc>,
    hosts: Vec<Map<String, Value>>,
}

/// On-disk cache of query results, one file per source path.
#[derive(Debug, Clone)]
pub struct InventoryCache {
    dir: PathBuf,
    timeout: u64,
}

impl InventoryCache {
    #[must_use]
    pub fn new(dir: PathBuf, timeout_secs: u64) -> Self {
        Self {
            dir,
            timeout: timeout_secs,
        }
    }

    /// Cache of a source file, in `cache_connection` or the temp directory.
    #[must_use]
    pub fn for_source(source: &InventorySource) -> Self {
        let dir = source
            .cache_connection
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(CONSUMER_TOKEN));
        Self::new(dir, source.cache_timeout)
    }

    /// Cache key of a source path: plugin name plus the SHA-1 of the path.
    #[must_use]
    pub fn key(source_path: &Path) -> String {
        let digest = Sha1::digest(source_path.to_string_lossy().as_bytes());
        format!("{ROOT_GROUP}_{}", hex::encode(digest))
    }

    fn file(&self, source_path: &Path) -> PathBuf {
        self.dir.join(format!("{}.json", Self::key(source_path)))
    }

    /// Cached hosts, if present and not expired.
    #[must_use]
    pub fn load(&self, source_path: &Path, now: DateTime<Utc>) -> Option<Vec<Map<String, Value>>> {
        let file = self.file(source_path);
        let contents = std::fs::read_to_string(&file).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&contents) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "Ignoring unreadable inventory cache");
                return None;
            }
        };

        let age = now.signed_duration_since(entry.timestamp).num_seconds();
        let fresh = self.timeout == 0 || u64::try_from(age).is_ok_and(|age| age < self.timeout);
        if !fresh {
            debug!(file = %file.display(), age_secs = age, "Inventory cache expired");
            return None;
        }
        Some(entry.hosts)
    }

    /// Write hosts to the cache.
    ///
    /// # Errors
    /// Fails if the directory or file cannot be written.
    pub fn store(&self, source_path: &Path, hosts: &[Map<String, Value>], now: DateTime<Utc>) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache directory {}", self.dir.display()))?;
        let entry = CacheEntry {
            timestamp: now,
            hosts: hosts.to_vec(),
        };
        let file = self.file(source_path);
        std::fs::write(&file, serde_json::to_vec(&entry)?)
            .with_context(|| format!("Failed to write inventory cache {}", file.display()))?;
        debug!(file = %file.display(), hosts = hosts.len(), "Wrote inventory cache");
        Ok(())
    }
}

// ============================================================================
// Query
// ============================================================================

async fn project_ids(provider: &dyn Provider, source: &InventorySource) -> Result<Vec<String>> {
    let ids = if source.projects.is_empty() {
        provider
            .list_projects()
            .await
            .context("Failed to query projects from Equinix Metal API")?
            .into_iter()
            .map(|p| p.id)
            .collect()
    } else {
        source.projects.clone()
    };

    if ids.is_empty() {
        bail!("Unable to get projects list from available methods, you must specify the \"projects\" option to continue.");
    }
    Ok(ids)
}

async fn query_hosts(provider: &dyn Provider, source: &InventorySource) -> Result<Vec<Map<String, Value>>> {
    let mut hosts = Vec::new();
    for project_id in project_ids(provider, source).await? {
        let devices = provider
            .list_devices(&project_id)
            .await
            .with_context(|| format!("Failed to query devices of project {project_id} from Equinix Metal API"))?;
        debug!(project = %project_id, devices = devices.len(), "Listed project devices");
        hosts.extend(devices.iter().map(host_vars));
    }
    Ok(hosts)
}

/// Build the inventory for a source file.
///
/// With caching enabled a fresh cache entry is used instead of querying,
/// unless `refresh` is set. Fresh query results are written back to the
/// cache.
///
/// # Errors
/// Fails on API errors, on an empty project list, on cache write errors,
/// and on missing keyed group keys in strict mode.
pub async fn build_inventory(
    provider: &dyn Provider,
    source: &InventorySource,
    source_path: &Path,
    refresh: bool,
) -> Result<Inventory> {
    let cache = source.cache.then(|| InventoryCache::for_source(source));
    let now = Utc::now();

    let cached = match &cache {
        Some(cache) if !refresh => cache.load(source_path, now),
        _ => None,
    };

    let hosts = if let Some(hosts) = cached {
        info!(hosts = hosts.len(), "Using cached inventory");
        hosts
    } else {
        let hosts = query_hosts(provider, source).await?;
        if let Some(cache) = &cache {
            cache.store(source_path, &hosts, now)?;
        }
        info!(hosts = hosts.len(), "Queried inventory");
        hosts
    };

    Inventory::populate(hosts, &source.keyed_groups, source.strict)
}
