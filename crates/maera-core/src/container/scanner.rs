//! Sources of host packages offered to bundles.
use std::fmt::Debug;
use std::path::PathBuf;

use log::{debug, warn};

use crate::container::error::{ContainerError, ContainerResult};
use crate::container::manifest::{BundleManifest, PackageExport};
use crate::utils::fs::find_files_with_extension;

/// Yields the packages some part of the host provides.
pub trait PackageSource: Send + Sync + Debug {
    fn packages(&self) -> ContainerResult<Vec<PackageExport>>;
}

/// A fixed package list
#[derive(Debug, Clone, Default)]
pub struct StaticPackageSource {
    packages: Vec<PackageExport>,
}

impl StaticPackageSource {
    pub fn new(packages: Vec<PackageExport>) -> Self {
        Self { packages }
    }
}

impl PackageSource for StaticPackageSource {
    fn packages(&self) -> ContainerResult<Vec<PackageExport>> {
        Ok(self.packages.clone())
    }
}

/// Reads `Export-Package` from the manifest of every jar under a directory.
#[derive(Debug, Clone)]
pub struct ManifestPackageSource {
    directory: PathBuf,
}

impl ManifestPackageSource {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

impl PackageSource for ManifestPackageSource {
    fn packages(&self) -> ContainerResult<Vec<PackageExport>> {
        if !self.directory.is_dir() {
            debug!("Host package directory {} does not exist", self.directory.display());
            return Ok(Vec::new());
        }
        let jars = find_files_with_extension(&self.directory, "jar")
            .map_err(|e| ContainerError::io(e, "scan_host_packages", self.directory.clone()))?;
        let mut packages = Vec::new();
        for jar in jars {
            match BundleManifest::from_jar(&jar) {
                Ok(Some(manifest)) => packages.extend(manifest.export_packages()),
                Ok(None) => {}
                Err(e) => warn!("Skipping host jar {}: {}", jar.display(), e),
            }
        }
        Ok(packages)
    }
}
