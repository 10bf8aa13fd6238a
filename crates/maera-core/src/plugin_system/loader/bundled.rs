use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};

use crate::plugin_system::error::{PluginResult, PluginSystemError};
use crate::plugin_system::factory::PluginFactory;
use crate::plugin_system::loader::{DirectoryPluginLoader, PluginLoader};
use crate::plugin_system::module_factory::ModuleDescriptorFactory;
use crate::plugin_system::plugin::Plugin;
use crate::utils::fs::extract_zip_if_changed;

/// Plugins shipped with the host as a zip of artifacts.
///
/// The zip is extracted into `directory` on first use and again only when
/// its contents change. Plugins loaded here are bundled and cannot be
/// uninstalled.
#[derive(Debug)]
pub struct BundledPluginLoader {
    zip: PathBuf,
    inner: DirectoryPluginLoader,
}

impl BundledPluginLoader {
    pub fn new(
        zip: impl Into<PathBuf>,
        directory: impl Into<PathBuf>,
        factories: Vec<Arc<dyn PluginFactory>>,
    ) -> Self {
        Self {
            zip: zip.into(),
            inner: DirectoryPluginLoader::new(directory, factories),
        }
    }

    pub fn directory(&self) -> &Path {
        self.inner.directory()
    }

    async fn extract(&self) -> PluginResult<()> {
        let zip = self.zip.clone();
        let dest = self.inner.directory().to_path_buf();
        let changed = tokio::task::spawn_blocking(move || extract_zip_if_changed(&zip, &dest))
            .await
            .map_err(|e| PluginSystemError::InternalError(format!("Bundled plugin extraction panicked: {}", e)))?
            .map_err(|e| PluginSystemError::loading(self.zip.display().to_string(), Some(self.zip.clone()), e))?;
        if changed {
            info!("Extracted bundled plugins from {}", self.zip.display());
        } else {
            debug!("Bundled plugins in {} are up to date", self.inner.directory().display());
        }
        Ok(())
    }
}

#[async_trait]
impl PluginLoader for BundledPluginLoader {
    fn name(&self) -> &str {
        "bundled"
    }

    async fn load_all_plugins(&self, modules: &ModuleDescriptorFactory) -> PluginResult<Vec<Plugin>> {
        self.extract().await?;
        let mut plugins = self.inner.load_all_plugins(modules).await?;
        for plugin in &mut plugins {
            plugin.set_bundled(true);
        }
        Ok(plugins)
    }
}
