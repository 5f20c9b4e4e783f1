//! Resource operations.
//!
//! Each operation validates its parameters, talks to a [`Provider`], and
//! returns a serializable result carrying a `changed` flag. Failures are
//! reported through [`OpError`] and rendered with [`Failure`].
//!
//! [`Provider`]: crate::providers::Provider
//! [`OpError`]: crate::error::OpError

use serde::{Deserialize, Serialize};

use crate::error::OpError;

pub mod device;
pub mod info;
pub mod ip_subnet;
pub mod project;
pub mod sshkey;

/// Desired presence of a resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    #[default]
    Present,
    Absent,
}

impl std::fmt::Display for Presence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Present => write!(f, "present"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

/// Terminal failure status of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub failed: bool,
    pub changed: bool,
    pub msg: String,
}

impl Failure {
    /// Failure with a fully rendered message.
    #[must_use]
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            failed: true,
            changed: false,
            msg: msg.into(),
        }
    }
}

/// Fail when two options that exclude each other are both set.
pub(crate) fn exclusive(pairs: &[(&str, bool, &str, bool)]) -> Result<(), OpError> {
    for (left, left_set, right, right_set) in pairs {
        if *left_set && *right_set {
            return Err(OpError::invalid(format!(
                "parameters are mutually exclusive: {left}|{right}"
            )));
        }
    }
    Ok(())
}
