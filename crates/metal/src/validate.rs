//! Identifier syntax checks run before any API call.

use std::sync::LazyLock;

use regex::Regex;
use uuid::{Uuid, Variant};

/// Dot-separated labels of alphanumerics with internal hyphens only.
static HOSTNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(([a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9\-]*[a-zA-Z0-9])\.)*([A-Za-z0-9]|[A-Za-z0-9][A-Za-z0-9\-]*[A-Za-z0-9])$",
    )
    .unwrap()
});

/// Check that `hostname` is a valid DNS-style host name.
#[must_use]
pub fn is_valid_hostname(hostname: &str) -> bool {
    HOSTNAME.is_match(hostname)
}

/// Check that `value` is a canonical, lowercase, hyphenated v4 UUID.
#[must_use]
pub fn is_valid_uuid(value: &str) -> bool {
    let Ok(parsed) = Uuid::parse_str(value) else {
        return false;
    };

    parsed.get_version_num() == 4
        && parsed.get_variant() == Variant::RFC4122
        && parsed.hyphenated().to_string() == value
}
