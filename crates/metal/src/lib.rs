//! Declarative resource management for Equinix Metal.
//!
//! This crate reconciles devices, projects, SSH keys and IP subnet
//! assignments against the Equinix Metal API, answers read-only catalog
//! queries, and builds a dynamic inventory from project devices.
//!
//! # Example
//!
//! ```rust,ignore
//! use equinix_metal::config::{env_lookup, resolve_api_token, ClientConfig, TOKEN_ENV_VARS};
//! use equinix_metal::ops::device::{act_on_devices, DeviceParams, DeviceTarget};
//! use equinix_metal::EquinixMetal;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let token = resolve_api_token(None, &env_lookup(&TOKEN_ENV_VARS));
//!     let provider = EquinixMetal::new(&ClientConfig::new(token)?)?;
//!
//!     // Ensure three active workers exist
//!     let result = act_on_devices(&provider, &DeviceParams {
//!         project_id: Some("89b497ee-5afc-420a-8fb5-56984898f4df".into()),
//!         hostnames: vec!["worker-%02d".into()],
//!         count: Some(3),
//!         plan: Some("c3.small.x86".into()),
//!         operating_system: Some("ubuntu_22_04".into()),
//!         facility: Some("am6".into()),
//!         state: DeviceTarget::Active,
//!         ..Default::default()
//!     }).await?;
//!
//!     println!("{}", serde_json::to_string_pretty(&result)?);
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod inventory;
pub mod ops;
pub mod providers;
pub mod serialize;
pub mod validate;

pub use config::{ClientConfig, PollConfig};
pub use error::{OpError, OpResult};
pub use ops::{Failure, Presence};
pub use providers::equinix::EquinixMetal;
pub use providers::{DeviceAction, Provider, ProviderError};
