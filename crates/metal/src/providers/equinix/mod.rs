//! Equinix Metal provider.
//!
//! Implements the [`Provider`](crate::providers::Provider) trait over the
//! Equinix Metal REST API (formerly Packet).
//!
//! API Documentation: <https://metal.equinix.com/developers/api/>

mod client;
mod models;

pub use client::EquinixMetal;
