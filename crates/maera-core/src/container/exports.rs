//! Computation of the packages the host exports to bundles.
//!
//! The export list is the union of the framework support packages, the
//! runtime package list for the configured runtime version, the packages
//! found by the configured [`PackageSource`]s (filtered and versioned by
//! the scanner configuration) and the packages host components need.
use std::collections::BTreeMap;
use std::sync::Arc;

use glob::Pattern;
use log::debug;
use semver::{Version, VersionReq};

use crate::container::error::{ContainerError, ContainerResult};
use crate::container::manifest::PackageExport;
use crate::container::scanner::PackageSource;
use crate::storage::config::PackageScannerConfig;

/// Packages every bundle needs to talk to the container
pub const FRAMEWORK_SUPPORT_PACKAGES: &[(&str, &str)] = &[
    ("maera.event", "1.0.0"),
    ("maera.framework", "1.0.0"),
    ("maera.framework.tracker", "1.0.0"),
    ("maera.plugin", "1.0.0"),
    ("maera.plugin.module", "1.0.0"),
];

/// Packages provided by the host runtime, gated by runtime version
pub const DEFAULT_RUNTIME_PACKAGES: &str = include_str!("../../resources/runtime-packages.txt");

/// Runtime packages available at `runtime_version`.
///
/// Lines are package names; a `[requirement]` line applies a semver
/// requirement to the packages after it.
pub fn runtime_packages(list: &str, runtime_version: &Version) -> ContainerResult<Vec<PackageExport>> {
    let mut gate: Option<VersionReq> = None;
    let mut packages = Vec::new();
    for line in list.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(req) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let parsed = VersionReq::parse(req.trim()).map_err(|e| {
                ContainerError::InvalidRuntimePackages(format!("bad section '{}': {}", line, e))
            })?;
            gate = Some(parsed);
            continue;
        }
        if gate.as_ref().is_none_or(|g| g.matches(runtime_version)) {
            packages.push(PackageExport::new(line, Some(runtime_version.to_string())));
        }
    }
    Ok(packages)
}

fn compile(pattern: &str) -> ContainerResult<Pattern> {
    Pattern::new(pattern).map_err(|e| ContainerError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Compiled form of [`PackageScannerConfig`]
#[derive(Debug, Clone)]
pub struct PackageFilter {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
    versions: Vec<(Pattern, String)>,
    guarded: Vec<Pattern>,
}

impl PackageFilter {
    pub fn new(config: &PackageScannerConfig) -> ContainerResult<Self> {
        Ok(Self {
            includes: config.includes.iter().map(|p| compile(p)).collect::<ContainerResult<_>>()?,
            excludes: config.excludes.iter().map(|p| compile(p)).collect::<ContainerResult<_>>()?,
            versions: config
                .package_versions
                .iter()
                .map(|(p, v)| Ok((compile(p)?, v.clone())))
                .collect::<ContainerResult<_>>()?,
            guarded: config.guarded_packages.iter().map(|p| compile(p)).collect::<ContainerResult<_>>()?,
        })
    }

    /// Included (or no includes configured) and not excluded
    pub fn accepts(&self, package: &str) -> bool {
        let included = self.includes.is_empty() || self.includes.iter().any(|p| p.matches(package));
        included && !self.excludes.iter().any(|p| p.matches(package))
    }

    pub fn version_override(&self, package: &str) -> Option<&str> {
        self.versions
            .iter()
            .find(|(p, _)| p.matches(package))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_guarded(&self, package: &str) -> bool {
        self.guarded.iter().any(|p| p.matches(package))
    }
}

/// Merges every package source into one sorted export list.
///
/// A scanned package matching a guarded pattern must end up with a
/// version, either its own or an override, or the whole computation fails.
pub fn compute_exports(
    filter: &PackageFilter,
    runtime: Vec<PackageExport>,
    sources: &[Arc<dyn PackageSource>],
    host_packages: &[String],
) -> ContainerResult<Vec<PackageExport>> {
    let mut exports: BTreeMap<String, Option<String>> = FRAMEWORK_SUPPORT_PACKAGES
        .iter()
        .map(|(name, version)| (name.to_string(), Some(version.to_string())))
        .collect();

    for package in runtime {
        exports.entry(package.name).or_insert(package.version);
    }

    for source in sources {
        for package in source.packages()? {
            if !filter.accepts(&package.name) {
                continue;
            }
            let version = filter
                .version_override(&package.name)
                .map(str::to_string)
                .or(package.version);
            if version.is_none() && filter.is_guarded(&package.name) {
                return Err(ContainerError::UnversionedOverride { package: package.name });
            }
            exports.insert(package.name, version);
        }
    }

    for package in host_packages {
        exports.entry(package.clone()).or_insert(None);
    }

    debug!("Computed {} host package export(s)", exports.len());
    Ok(exports
        .into_iter()
        .map(|(name, version)| PackageExport::new(name, version))
        .collect())
}

/// `Export-Package` value for a sorted export list
pub fn export_string(exports: &[PackageExport]) -> String {
    exports.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}
