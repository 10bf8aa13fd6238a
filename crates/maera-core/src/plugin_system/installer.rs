use std::fmt::Debug;
use std::path::{Path, PathBuf};

use log::info;

use crate::plugin_system::artifact::{ArtifactKind, PluginArtifact};
use crate::plugin_system::error::{PluginResult, PluginSystemError};
use crate::storage::local::LocalStorageProvider;
use crate::storage::provider::StorageProvider;
use crate::utils::fs::is_hidden;

/// Puts plugin artifacts where a loader will find them.
pub trait PluginInstaller: Send + Sync + Debug {
    /// Writes `artifact` for plugin `key` and returns the installed path.
    fn install_plugin(&self, key: &str, artifact: &dyn PluginArtifact) -> PluginResult<PathBuf>;

    /// Where `artifact` would be installed
    fn target_path(&self, artifact: &dyn PluginArtifact) -> PathBuf;
}

/// Installs artifacts into a plugin directory under their own file name.
///
/// The name must be a plain, visible file name with an artifact extension
/// the directory scanner picks up.
///
/// Writes go through a temporary file in the same directory and are
/// renamed into place, so a scan never sees a half-written artifact.
#[derive(Debug, Clone)]
pub struct FilePluginInstaller {
    provider: LocalStorageProvider,
}

impl FilePluginInstaller {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            provider: LocalStorageProvider::new(directory.into()),
        }
    }

    pub fn directory(&self) -> &Path {
        self.provider.base_path()
    }

    fn file_name<'a>(&self, artifact: &'a dyn PluginArtifact) -> PluginResult<&'a Path> {
        let name = artifact.name();
        let path = Path::new(name);
        let plain = !name.contains(['/', '\\']) && path.file_name().is_some_and(|f| f == name);
        let reason = if !plain {
            "it is not a plain file name"
        } else if is_hidden(path) {
            "hidden files are not scanned"
        } else if ArtifactKind::from_path(path).is_none() {
            "it is not a .jar or .json artifact"
        } else {
            return Ok(path);
        };
        Err(PluginSystemError::InstallError {
            artifact: name.to_string(),
            message: format!("Cannot install under this name: {}", reason),
        })
    }
}

impl PluginInstaller for FilePluginInstaller {
    fn install_plugin(&self, key: &str, artifact: &dyn PluginArtifact) -> PluginResult<PathBuf> {
        let file_name = self.file_name(artifact)?;
        let bytes = artifact.to_bytes()?;
        self.provider
            .write_bytes(file_name, &bytes)
            .map_err(|e| PluginSystemError::InstallError {
                artifact: artifact.name().to_string(),
                message: e.to_string(),
            })?;
        let target = self.provider.resolve(file_name);
        info!("Installed plugin '{}' to {}", key, target.display());
        Ok(target)
    }

    fn target_path(&self, artifact: &dyn PluginArtifact) -> PathBuf {
        self.provider.resolve(Path::new(artifact.name()))
    }
}
