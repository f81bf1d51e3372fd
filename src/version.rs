use std::fmt;
use std::str::FromStr;

use crate::error::UpgradeError;

/// An artefact version such as `0.10.0` or `1.2.0-beta.1`.
///
/// Ordering is component-wise numeric on major, minor and patch. A qualified
/// version sorts before the release it qualifies (`1.0.0-beta < 1.0.0`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(semver::Version);

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version(semver::Version::new(major, minor, patch))
    }

    pub fn parse(s: &str) -> Result<Self, UpgradeError> {
        semver::Version::parse(s.trim())
            .map(Version)
            .map_err(|e| UpgradeError::precondition(format!("'{}' is not a valid version: {}", s, e)))
    }

    /// Parses a version written in the path-safe form used inside resource
    /// file names, where `_` stands in for `.` (`0_10_0` is `0.10.0`).
    pub fn from_file_token(token: &str) -> Result<Self, UpgradeError> {
        let version = Self::parse(&token.replace('_', "."))?;
        if version.to_file_token() != token {
            return Err(UpgradeError::precondition(format!(
                "'{}' is not a canonical version token",
                token
            )));
        }
        Ok(version)
    }

    pub fn to_file_token(&self) -> String {
        self.to_string().replace('.', "_")
    }

    /// The version of this executable, which is the version being upgraded to.
    pub fn current_executable() -> Result<Self, UpgradeError> {
        Self::parse(env!("CARGO_PKG_VERSION"))
    }
}

impl FromStr for Version {
    type Err = UpgradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The span an upgrade covers: from the installed version to the version of
/// the executable doing the upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeWindow {
    installed: Version,
    executable: Version,
}

impl UpgradeWindow {
    pub fn new(installed: Version, executable: Version) -> Result<Self, UpgradeError> {
        if installed > executable {
            return Err(UpgradeError::precondition(format!(
                "installed version {} is newer than executable version {}; downgrades are not supported",
                installed, executable
            )));
        }
        Ok(Self {
            installed,
            executable,
        })
    }

    pub fn installed(&self) -> &Version {
        &self.installed
    }

    pub fn executable(&self) -> &Version {
        &self.executable
    }

    pub fn is_noop(&self) -> bool {
        self.installed == self.executable
    }

    /// True when a (from, to) step lies entirely inside this window.
    pub fn covers(&self, from: &Version, to: &Version) -> bool {
        *from >= self.installed && *to <= self.executable
    }
}
