//! Framework configuration and the serialization formats shared with the
//! persisted state store.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::kernel::constants;
use crate::kernel::error::{Error, Result};
use crate::storage::error::{StorageResult, StorageSystemError};

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }

    /// Like [`ConfigFormat::from_path`] but fails for unknown extensions.
    pub fn require_from_path(path: &Path) -> StorageResult<Self> {
        Self::from_path(path)
            .ok_or_else(|| StorageSystemError::UnsupportedConfigFormat(path.display().to_string()))
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> StorageResult<String> {
        let ser_err = |source: Box<dyn std::error::Error + Send + Sync>| {
            StorageSystemError::SerializationError {
                format: self.extension().to_string(),
                source,
            }
        };
        match self {
            ConfigFormat::Json => serde_json::to_string_pretty(value).map_err(|e| ser_err(Box::new(e))),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::to_string(value).map_err(|e| ser_err(Box::new(e))),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::to_string_pretty(value).map_err(|e| ser_err(Box::new(e))),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, data: &str) -> StorageResult<T> {
        let de_err = |source: Box<dyn std::error::Error + Send + Sync>| {
            StorageSystemError::DeserializationError {
                format: self.extension().to_string(),
                source,
            }
        };
        match self {
            ConfigFormat::Json => serde_json::from_str(data).map_err(|e| de_err(Box::new(e))),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(data).map_err(|e| de_err(Box::new(e))),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(data).map_err(|e| de_err(Box::new(e))),
        }
    }
}

/// Which host packages the container exports to bundles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct PackageScannerConfig {
    /// Glob patterns a scanned package must match (empty means all)
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    /// Pattern to version overrides, applied to scanned packages
    pub package_versions: BTreeMap<String, String>,
    /// Packages that must never be exported without a version
    pub guarded_packages: Vec<String>,
}

impl Default for PackageScannerConfig {
    fn default() -> Self {
        Self {
            includes: Vec::new(),
            excludes: Vec::new(),
            package_versions: BTreeMap::new(),
            guarded_packages: vec!["*.xml.parsers".to_string(), "*.xml.parsers.*".to_string()],
        }
    }
}

/// Bundle container settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct ContainerConfig {
    pub enabled: bool,
    /// Framework bundle cache, defaults to `<plugin-directory>/.maera-cache/bundles`
    pub cache_directory: Option<PathBuf>,
    /// Zip of bundles installed and started with the framework
    pub framework_bundles_zip: Option<PathBuf>,
    /// Directory of jars whose exported packages are offered to bundles
    pub host_package_directory: Option<PathBuf>,
    pub runtime_version: String,
    pub start_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
    /// Framework versions known to misbehave (semver requirements)
    pub broken_framework_versions: Vec<String>,
    pub package_scanner: PackageScannerConfig,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_directory: None,
            framework_bundles_zip: None,
            host_package_directory: None,
            runtime_version: constants::DEFAULT_RUNTIME_VERSION.to_string(),
            start_timeout_secs: constants::DEFAULT_CONTAINER_START_TIMEOUT_SECS,
            stop_timeout_secs: constants::DEFAULT_CONTAINER_STOP_TIMEOUT_SECS,
            refresh_timeout_secs: constants::DEFAULT_REFRESH_TIMEOUT_SECS,
            broken_framework_versions: Vec::new(),
            package_scanner: PackageScannerConfig::default(),
        }
    }
}

impl ContainerConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}

/// Top-level framework configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct FrameworkConfig {
    pub plugin_directory: PathBuf,
    /// Descriptor looked up inside jar artifacts
    pub descriptor_file_name: String,
    /// Persisted enable/disable overrides, defaults to `<plugin-directory>/.maera-state.json`
    pub state_file: Option<PathBuf>,
    /// Zip of plugins shipped with the host
    pub bundled_plugins_zip: Option<PathBuf>,
    pub bundled_plugins_directory: Option<PathBuf>,
    /// Seconds between hot deploy scans, 0 disables
    pub hot_deploy_poll_secs: u64,
    /// Module types allowed to load (empty means all)
    pub permitted_module_types: Vec<String>,
    pub container: ContainerConfig,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            plugin_directory: PathBuf::from(constants::DEFAULT_PLUGINS_DIR),
            descriptor_file_name: constants::DEFAULT_DESCRIPTOR_FILE_NAME.to_string(),
            state_file: None,
            bundled_plugins_zip: None,
            bundled_plugins_directory: None,
            hot_deploy_poll_secs: constants::DEFAULT_HOT_DEPLOY_POLL_SECS,
            permitted_module_types: Vec::new(),
            container: ContainerConfig::default(),
        }
    }
}

impl FrameworkConfig {
    /// Configuration with every default, rooted at `plugin_directory`
    pub fn with_plugin_directory(plugin_directory: impl Into<PathBuf>) -> Self {
        Self {
            plugin_directory: plugin_directory.into(),
            ..Self::default()
        }
    }

    /// Load from a json, yaml or toml file, chosen by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let format = ConfigFormat::require_from_path(path)?;
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::io(e, "read_config", path.to_path_buf()))?;
        Ok(format.decode(&data)?)
    }

    /// Checks the settings the framework cannot start without.
    pub fn validate(&self) -> Result<()> {
        if !self.plugin_directory.is_dir() {
            return Err(Error::Config(format!(
                "Plugin directory '{}' does not exist or is not a directory",
                self.plugin_directory.display()
            )));
        }
        if self.descriptor_file_name.trim().is_empty() {
            return Err(Error::Config("Descriptor file name must not be empty".to_string()));
        }
        if self.bundled_plugins_zip.is_some() && self.bundled_plugins_directory.is_none() {
            return Err(Error::Config(
                "A bundled plugins zip requires a bundled plugins directory".to_string(),
            ));
        }
        for requirement in &self.container.broken_framework_versions {
            semver::VersionReq::parse(requirement).map_err(|e| {
                Error::Config(format!("Invalid broken framework version '{}': {}", requirement, e))
            })?;
        }
        semver::Version::parse(&self.container.runtime_version).map_err(|e| {
            Error::Config(format!(
                "Invalid runtime version '{}': {}",
                self.container.runtime_version, e
            ))
        })?;
        Ok(())
    }

    pub fn hot_deploy_period(&self) -> Duration {
        Duration::from_secs(self.hot_deploy_poll_secs)
    }

    pub fn state_file_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.plugin_directory.join(".maera-state.json"))
    }

    pub fn cache_directory(&self) -> PathBuf {
        self.container
            .cache_directory
            .clone()
            .unwrap_or_else(|| self.plugin_directory.join(constants::CACHE_DIR_NAME).join("bundles"))
    }
}
