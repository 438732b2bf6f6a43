//! Content fingerprints: the build-cache key.
//!
//! A fingerprint is a SHA-256 digest chained over the entry's top-level
//! configuration (minus `project`), the effective per-target project
//! configuration, and the platform's optional toolchain marker. Source
//! content is deliberately excluded: a source change must be reflected by a
//! configuration field (checksum, commit) that itself changes the digest.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use slake_schema::{Fingerprint, ManifestEntry, Target};

use crate::config::{self, ConfigError};

/// The effective per-target project configuration for an entry.
///
/// # Errors
///
/// Propagates conditional-evaluation failures.
pub fn project_configuration(
    entry: &ManifestEntry,
    target: &Target,
) -> Result<Map<String, Value>, ConfigError> {
    config::evaluate_conditionals(&entry.project, target)
}

/// Compute the cache key for building `entry` for `target`.
///
/// # Errors
///
/// Propagates conditional-evaluation failures from the project
/// configuration.
pub fn configuration_fingerprint(
    entry: &ManifestEntry,
    target: &Target,
) -> Result<Fingerprint, ConfigError> {
    let mut top = match entry.as_value() {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    top.remove("project");

    let project = project_configuration(entry, target)?;

    let mut hasher = Sha256::new();
    hasher.update(config::canonical_json(&Value::Object(top)));
    hasher.update(config::canonical_json(&Value::Object(project)));
    if let Some(marker) = target
        .platform
        .toolchain_fingerprint(&target.architecture)
    {
        hasher.update(marker);
    }

    Ok(Fingerprint::new(hasher.finalize().into()))
}
