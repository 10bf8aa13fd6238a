use std::fmt;
use std::str::FromStr;

use semver::{Version, VersionReq};
use thiserror::Error;

/// Error type for version parsing
#[derive(Debug, Error)]
pub enum VersionError {
    #[error("Invalid version '{0}'")]
    InvalidVersion(String),
    #[error("Invalid version constraint '{constraint}': {message}")]
    InvalidConstraint { constraint: String, message: String },
}

/// Parses plugin versions leniently: "2", "2.1" and "2.1.0-beta" are all
/// accepted, missing components are zero.
pub fn parse_lenient(version: &str) -> Result<Version, VersionError> {
    let trimmed = version.trim();
    if let Ok(v) = Version::parse(trimmed) {
        return Ok(v);
    }
    let (core, pre) = match trimmed.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (trimmed, None),
    };
    let mut parts = core.split('.').map(|p| p.parse::<u64>());
    let mut next = || -> Result<u64, VersionError> {
        match parts.next() {
            None => Ok(0),
            Some(Ok(n)) => Ok(n),
            Some(Err(_)) => Err(VersionError::InvalidVersion(version.to_string())),
        }
    };
    let (major, minor, patch) = (next()?, next()?, next()?);
    if parts.next().is_some() || core.is_empty() {
        return Err(VersionError::InvalidVersion(version.to_string()));
    }
    let mut v = Version::new(major, minor, patch);
    if let Some(pre) = pre {
        v.pre = semver::Prerelease::new(pre)
            .map_err(|_| VersionError::InvalidVersion(version.to_string()))?;
    }
    Ok(v)
}

/// Represents a version requirement range using semver constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionRange {
    /// The original constraint string (e.g., "^1.2.3", ">=2.0")
    constraint: String,
    req: VersionReq,
}

impl VersionRange {
    pub fn from_constraint(constraint: &str) -> Result<Self, VersionError> {
        let req = VersionReq::parse(constraint).map_err(|e| VersionError::InvalidConstraint {
            constraint: constraint.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            constraint: constraint.to_string(),
            req,
        })
    }

    pub fn includes(&self, version: &Version) -> bool {
        self.req.matches(version)
    }

    pub fn semver_req(&self) -> &VersionReq {
        &self.req
    }

    pub fn constraint_string(&self) -> &str {
        &self.constraint
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.constraint)
    }
}

impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionRange::from_constraint(s)
    }
}
