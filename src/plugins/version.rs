//! ABI version negotiation.
//!
//! A plugin reports the ABI version it was built against. The host accepts it
//! when the major versions match and the plugin's minor version is not newer
//! than the host's.

use std::ffi::CStr;
use std::fmt;
use std::str::FromStr;

use super::error::LoadError;

/// ABI version implemented by this host.
pub const HOST_ABI_VERSION: AbiVersion = AbiVersion::new(1, 2, 0);

/// [`HOST_ABI_VERSION`] as the string plugins built with this crate report.
pub const ABI_VERSION_CSTR: &CStr = c"1.2.0";

/// A `major.minor.patch` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AbiVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl AbiVersion {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Whether a plugin targeting `self` can run on a host at `host`.
    #[must_use]
    pub fn is_compatible_with(&self, host: &Self) -> bool {
        self.major == host.major && self.minor <= host.minor
    }
}

impl fmt::Display for AbiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for AbiVersion {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LoadError::InvalidVersionFormat(s.to_string());

        let mut parts = s.trim().split('.');
        let mut next = || -> Result<u32, LoadError> {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse().map_err(|_| invalid())
        };

        let version = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

/// Check a plugin-reported version string against `host`.
///
/// # Errors
/// [`LoadError::InvalidVersionFormat`] for strings that are not
/// `major.minor.patch`, [`LoadError::IncompatibleVersion`] when the gate
/// rejects the plugin.
pub fn negotiate(reported: &str, host: &AbiVersion) -> Result<AbiVersion, LoadError> {
    let found: AbiVersion = reported.parse()?;
    if found.is_compatible_with(host) {
        Ok(found)
    } else {
        Err(LoadError::IncompatibleVersion {
            expected: host.to_string(),
            found: found.to_string(),
        })
    }
}
