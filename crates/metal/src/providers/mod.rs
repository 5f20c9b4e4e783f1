//! Provider abstraction over the Equinix Metal API.

pub mod equinix;
pub mod resources;
mod traits;

#[cfg(test)]
pub use traits::MockProvider;
pub use traits::{
    CreateDeviceRequest, CreateProjectRequest, CreateSshKeyRequest, DeviceAction, Provider,
    ProviderError,
};
