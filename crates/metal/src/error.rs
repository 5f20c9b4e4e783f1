//! Error types for resource operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::providers::resources::DeviceState;
use crate::providers::ProviderError;

/// Errors that can occur while reconciling or querying resources.
#[derive(Debug, Error)]
pub enum OpError {
    /// Parameters were rejected before any API call.
    #[error("{0}")]
    Validation(String),

    /// API call failed.
    #[error("{context}: {source}")]
    Api {
        context: String,
        #[source]
        source: ProviderError,
    },

    /// Resources did not reach the awaited condition in time.
    #[error("Waiting for {condition} timed out for devices: {hostnames:?}")]
    Timeout {
        condition: String,
        hostnames: Vec<String>,
    },

    /// The transition table has no entry for this state pair.
    #[error("I don't know how to process existing device {hostname} from state {current} to state {target}")]
    UnknownTransition {
        hostname: String,
        current: DeviceState,
        target: String,
    },

    /// A local key file could not be read.
    #[error("failed to read key file {}: {source}", path.display())]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl OpError {
    /// Build a validation error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Wrap a [`ProviderError`] with a description of the failed call.
///
/// ```rust,ignore
/// provider.list_ssh_keys().await.map_err(api("failed to list SSH keys"))?;
/// ```
pub fn api(context: impl Into<String>) -> impl FnOnce(ProviderError) -> OpError {
    let context = context.into();
    move |source| OpError::Api { context, source }
}

/// Result alias for operations.
pub type OpResult<T> = Result<T, OpError>;
