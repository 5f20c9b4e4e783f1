//! Metal CLI - declarative resource management for Equinix Metal.
//!
//! Every command prints a JSON document on stdout. Failures print
//! `{"failed": true, "msg": ...}` and exit non-zero. Logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use equinix_metal::config::{
    env_lookup, resolve_api_token, ClientConfig, PollConfig, DEFAULT_API_URL,
    DEFAULT_WAIT_TIMEOUT_SECS, TOKEN_ENV_VARS,
};
use equinix_metal::inventory::{self, CONSUMER_TOKEN};
use equinix_metal::ops::device::{act_on_devices, DeviceParams, DeviceTarget};
use equinix_metal::ops::info::{self, DeviceFilter, PairFilter, SshKeyFilter};
use equinix_metal::ops::ip_subnet::{act_on_assignment, IpSubnetParams};
use equinix_metal::ops::project::{act_on_project, ProjectParams};
use equinix_metal::ops::sshkey::{act_on_sshkeys, SshKeyParams};
use equinix_metal::{EquinixMetal, Failure, OpError, Presence};

/// Metal CLI - Equinix Metal resource management.
#[derive(Parser)]
#[command(name = "metal", version)]
#[command(about = "Reconcile and query Equinix Metal devices, projects, SSH keys and IP subnets")]
struct Cli {
    /// API token (or set `METAL_API_TOKEN`, `PACKET_API_TOKEN` or `PACKET_TOKEN`).
    #[arg(long, alias = "auth-token", global = true)]
    api_token: Option<String>,

    /// API base URL.
    #[arg(long, env = "METAL_API_URL", default_value = DEFAULT_API_URL, global = true)]
    api_url: String,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, delete, power or reboot devices.
    Device(DeviceArgs),

    /// Register or remove an SSH key.
    Sshkey(SshKeyArgs),

    /// Assign or release an IP subnet on a device.
    IpSubnet(IpSubnetArgs),

    /// Create or delete a project.
    Project(ProjectArgs),

    /// Read-only queries.
    #[command(subcommand)]
    Info(InfoCommand),

    /// Build a dynamic inventory from a source file.
    Inventory(InventoryArgs),
}

#[derive(Args)]
struct DeviceArgs {
    /// Project the devices live in.
    #[arg(long)]
    project_id: Option<String>,

    /// Device UUIDs (comma-separated).
    #[arg(long = "device-ids", value_delimiter = ',')]
    device_ids: Vec<String>,

    /// Hostnames (comma-separated), or one template such as `web-%02d`.
    #[arg(long = "hostnames", alias = "hostname", value_delimiter = ',')]
    hostnames: Vec<String>,

    /// Number of devices to expand a single hostname into.
    #[arg(long)]
    count: Option<u32>,

    /// First number used in hostname expansion.
    #[arg(long)]
    count_offset: Option<u32>,

    /// Tags for new devices (comma-separated).
    #[arg(long, value_delimiter = ',')]
    tags: Vec<String>,

    /// Facility code for new devices.
    #[arg(long)]
    facility: Option<String>,

    /// Hardware features as a JSON object.
    #[arg(long, value_parser = parse_json_object)]
    features: Option<Map<String, Value>>,

    /// Lock new devices against deletion.
    #[arg(long, default_value = "false")]
    locked: bool,

    /// Operating system slug for new devices.
    #[arg(long)]
    operating_system: Option<String>,

    /// Plan slug for new devices.
    #[arg(long)]
    plan: Option<String>,

    /// Target state.
    #[arg(long, value_enum, default_value_t)]
    state: DeviceTarget,

    /// Userdata for new devices.
    #[arg(long)]
    user_data: Option<String>,

    /// Wait until new devices have a public address of this family (4 or 6).
    #[arg(long = "wait-for-public-ipv")]
    wait_for_public_ipv: Option<u8>,

    /// Timeout in seconds for convergence waits.
    #[arg(long, default_value_t = DEFAULT_WAIT_TIMEOUT_SECS)]
    wait_timeout: u64,

    /// iPXE script URL (`custom_ipxe` only).
    #[arg(long)]
    ipxe_script_url: Option<String>,

    /// Always boot from iPXE (`custom_ipxe` only).
    #[arg(long, default_value = "false")]
    always_pxe: bool,
}

#[derive(Args)]
struct SshKeyArgs {
    /// Target state.
    #[arg(long, value_enum, default_value_t)]
    state: Presence,

    /// Key label.
    #[arg(long, alias = "name")]
    label: Option<String>,

    /// Key UUID.
    #[arg(long)]
    id: Option<String>,

    /// Key fingerprint.
    #[arg(long)]
    fingerprint: Option<String>,

    /// Public key string.
    #[arg(long)]
    key: Option<String>,

    /// File with the public key.
    #[arg(long)]
    key_file: Option<PathBuf>,
}

#[derive(Args)]
struct IpSubnetArgs {
    /// Subnet in `address/prefix_len` form.
    #[arg(long, alias = "name")]
    cidr: String,

    /// Target device UUID.
    #[arg(long)]
    device_id: Option<String>,

    /// Target device hostname, unique in the project.
    #[arg(long)]
    hostname: Option<String>,

    /// Project to search for the device.
    #[arg(long)]
    project_id: Option<String>,

    /// Target state.
    #[arg(long, value_enum, default_value_t)]
    state: Presence,

    /// Validate only.
    #[arg(long, default_value = "false")]
    check: bool,
}

#[derive(Args)]
struct ProjectArgs {
    /// Target state.
    #[arg(long, value_enum, default_value_t)]
    state: Presence,

    /// Project name.
    #[arg(long)]
    name: Option<String>,

    /// Project UUID.
    #[arg(long)]
    id: Option<String>,

    /// Organization to create the project in.
    #[arg(long)]
    org_id: Option<String>,

    /// Payment method ID.
    #[arg(long)]
    payment_method: Option<String>,

    /// Custom data as a JSON document.
    #[arg(long)]
    custom_data: Option<String>,

    /// Validate only.
    #[arg(long, default_value = "false")]
    check: bool,
}

#[derive(Subcommand)]
enum InfoCommand {
    /// List facilities.
    Facility {
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        codes: Vec<String>,
    },

    /// List plans.
    Plan {
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        names: Vec<String>,
    },

    /// List operating systems.
    OperatingSystem {
        #[arg(long, value_delimiter = ',')]
        slugs: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        distros: Vec<String>,
    },

    /// List organizations.
    Org {
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        names: Vec<String>,
    },

    /// List projects.
    Project {
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        names: Vec<String>,
    },

    /// List SSH keys.
    Sshkey {
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
        #[arg(long, alias = "names", value_delimiter = ',')]
        labels: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        fingerprints: Vec<String>,
    },

    /// List devices of a project.
    Device {
        #[arg(long)]
        project_id: String,
        #[arg(long = "device-ids", value_delimiter = ',')]
        device_ids: Vec<String>,
        #[arg(long = "hostnames", value_delimiter = ',')]
        hostnames: Vec<String>,
    },

    /// List IP reservations of a project.
    Ip {
        #[arg(long)]
        project_id: String,
    },

    /// Show the current user.
    User,

    /// Show capacity per facility and plan.
    Capacity {
        /// Include legacy plans.
        #[arg(long, default_value = "false")]
        include_legacy: bool,
    },
}

#[derive(Args)]
struct InventoryArgs {
    /// Source file, named `*equinix_metal.yml` or `*equinix_metal.yaml`.
    source: PathBuf,

    /// Print the whole inventory (default).
    #[arg(long, default_value = "false")]
    list: bool,

    /// Print the variables of one host.
    #[arg(long, conflicts_with = "list")]
    host: Option<String>,

    /// Ignore and rewrite the cache.
    #[arg(long, default_value = "false")]
    refresh: bool,
}

fn parse_json_object(s: &str) -> Result<Map<String, Value>, String> {
    serde_json::from_str(s).map_err(|e| format!("expected a JSON object: {e}"))
}

fn connect(api_token: Option<&str>, api_url: &str, consumer_token: Option<&str>) -> Result<EquinixMetal> {
    let token = resolve_api_token(api_token, &env_lookup(&TOKEN_ENV_VARS));
    let mut config = ClientConfig::new(token)?.with_base_url(api_url)?;
    if let Some(consumer) = consumer_token {
        config = config.with_consumer_token(consumer);
    }
    debug!(base_url = %config.base_url, "Connecting to Equinix Metal API");
    EquinixMetal::new(&config).context("Failed to create API client")
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).context("Failed to serialize result")
}

async fn run(cli: Cli) -> Result<Value> {
    let token = cli.api_token.as_deref();
    let api_url = cli.api_url.as_str();

    match cli.command {
        Commands::Device(args) => {
            let provider = connect(token, api_url, None)?;
            let state = args.state;
            let params = DeviceParams {
                project_id: args.project_id,
                device_ids: args.device_ids,
                hostnames: args.hostnames,
                count: args.count,
                count_offset: args.count_offset,
                tags: args.tags,
                facility: args.facility,
                features: args.features,
                locked: args.locked,
                operating_system: args.operating_system,
                plan: args.plan,
                state,
                user_data: args.user_data,
                wait_for_public_ipv: args.wait_for_public_ipv,
                poll: PollConfig::with_timeout(Duration::from_secs(args.wait_timeout)),
                ipxe_script_url: args.ipxe_script_url,
                always_pxe: args.always_pxe,
            };
            let result = act_on_devices(&provider, &params)
                .await
                .map_err(|e| anyhow!("failed to set device state {state}, error: {e}"))?;
            to_json(&result)
        }

        Commands::Sshkey(args) => {
            let provider = connect(token, api_url, None)?;
            let params = SshKeyParams {
                state: args.state,
                label: args.label,
                id: args.id,
                fingerprint: args.fingerprint,
                key: args.key,
                key_file: args.key_file,
            };
            let result = act_on_sshkeys(&provider, &params)
                .await
                .map_err(|e| anyhow!("failed to set sshkey state: {e}"))?;
            to_json(&result)
        }

        Commands::IpSubnet(args) => {
            let provider = connect(token, api_url, None)?;
            let state = args.state;
            let params = IpSubnetParams {
                cidr: args.cidr,
                device_id: args.device_id,
                hostname: args.hostname,
                project_id: args.project_id,
                state,
                check_mode: args.check,
            };
            let result = act_on_assignment(&provider, &params)
                .await
                .map_err(|e| anyhow!("failed to set IP subnet to state {state}, error: {e}"))?;
            to_json(&result)
        }

        Commands::Project(args) => {
            let provider = connect(token, api_url, None)?;
            let state = args.state;
            let params = ProjectParams {
                state,
                name: args.name,
                id: args.id,
                org_id: args.org_id,
                payment_method: args.payment_method,
                custom_data: args.custom_data,
                check_mode: args.check,
            };
            let result = act_on_project(&provider, &params)
                .await
                .map_err(|e| anyhow!("failed to set project state {state}: {e}"))?;
            to_json(&result)
        }

        Commands::Info(query) => {
            let provider = connect(token, api_url, None)?;
            run_info(&provider, query).await
        }

        Commands::Inventory(args) => {
            let source = inventory::load_source(&args.source)?;
            let explicit = token.or(source.api_token.as_deref());
            let provider = connect(explicit, api_url, Some(CONSUMER_TOKEN))?;
            let built = inventory::build_inventory(&provider, &source, &args.source, args.refresh).await?;

            match args.host {
                Some(host) => Ok(built
                    .hostvars
                    .get(&host)
                    .map_or_else(|| json!({}), |vars| Value::Object(vars.clone()))),
                None => Ok(built.to_json()),
            }
        }
    }
}

async fn run_info(provider: &EquinixMetal, query: InfoCommand) -> Result<Value> {
    let failed = |what: &'static str| move |e: OpError| anyhow!("failed to get {what} info, error: {e}");

    match query {
        InfoCommand::Facility { ids, codes } => {
            let filter = PairFilter { ids, values: codes };
            to_json(&info::facility_info(provider, &filter).await.map_err(failed("facility"))?)
        }
        InfoCommand::Plan { ids, names } => {
            let filter = PairFilter { ids, values: names };
            to_json(&info::plan_info(provider, &filter).await.map_err(failed("plan"))?)
        }
        InfoCommand::OperatingSystem { slugs, distros } => {
            let filter = PairFilter {
                ids: slugs,
                values: distros,
            };
            to_json(
                &info::operating_system_info(provider, &filter)
                    .await
                    .map_err(failed("operating_system"))?,
            )
        }
        InfoCommand::Org { ids, names } => {
            let filter = PairFilter { ids, values: names };
            to_json(
                &info::organization_info(provider, &filter)
                    .await
                    .map_err(failed("organization"))?,
            )
        }
        InfoCommand::Project { ids, names } => {
            let filter = PairFilter { ids, values: names };
            to_json(&info::project_info(provider, &filter).await.map_err(failed("project"))?)
        }
        InfoCommand::Sshkey {
            ids,
            labels,
            fingerprints,
        } => {
            let filter = SshKeyFilter {
                ids,
                labels,
                fingerprints,
            };
            to_json(&info::sshkey_info(provider, &filter).await.map_err(failed("sshkey"))?)
        }
        InfoCommand::Device {
            project_id,
            device_ids,
            hostnames,
        } => {
            let filter = DeviceFilter {
                project_id,
                device_ids,
                hostnames,
            };
            to_json(&info::device_info(provider, &filter).await.map_err(failed("device"))?)
        }
        InfoCommand::Ip { project_id } => {
            to_json(&info::ip_info(provider, &project_id).await.map_err(failed("project IP"))?)
        }
        InfoCommand::User => to_json(&info::user_info(provider).await.map_err(failed("user"))?),
        InfoCommand::Capacity { include_legacy } => to_json(
            &info::capacity_info(provider, include_legacy)
                .await
                .map_err(failed("capacity"))?,
        ),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging; stdout carries the JSON result
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(output) => {
            println!("{output:#}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let failure = Failure::new(format!("{e:#}"));
            error!(error = %failure.msg, "Operation failed");
            println!("{:#}", json!(failure));
            ExitCode::FAILURE
        }
    }
}
