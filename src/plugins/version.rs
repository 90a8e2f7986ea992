//! Host/plugin core version compatibility

use semver::Version;

use crate::{Error, Result};

/// Check that the host core version satisfies a plugin's requirement
///
/// The host is compatible when the major versions match exactly and the
/// host's `(minor, patch)` is at least the required `(minor, patch)`.
///
/// # Errors
///
/// Returns `Error::IncompatibleVersion` on mismatch or if either version is
/// not valid semver
pub fn check_compatibility(required: &str, host: &Version) -> Result<()> {
    let incompatible = || Error::IncompatibleVersion {
        required: required.to_string(),
        current: host.to_string(),
    };

    let required_version = Version::parse(required.trim()).map_err(|_| incompatible())?;

    if host.major != required_version.major {
        return Err(incompatible());
    }

    if (host.minor, host.patch) < (required_version.minor, required_version.patch) {
        return Err(incompatible());
    }

    Ok(())
}

/// Parse the configured host core version
///
/// # Errors
///
/// Returns `Error::Config` if the version is not valid semver
pub fn parse_host_version(version: &str) -> Result<Version> {
    Version::parse(version.trim())
        .map_err(|e| Error::Config(format!("invalid core version {version:?}: {e}")))
}
