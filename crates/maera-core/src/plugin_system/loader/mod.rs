//! # Plugin Loaders
//!
//! A loader knows where plugins come from and turns each artifact it finds
//! into a [`Plugin`] through the configured [`PluginFactory`] list.
//!
//! - **[`directory`]**: scans a plugin directory and diffs it between scans
//!   so hot deployment can pick up added, removed and modified artifacts.
//! - **[`single`]**: one artifact from a file or in-memory bytes.
//! - **[`bundled`]**: plugins shipped inside a zip, extracted to a cache
//!   directory and never removable.
//!
//! A problem with one artifact never stops the others from loading: it
//! yields an unloadable plugin carrying the error text instead.
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use log::warn;

use crate::plugin_system::artifact::PluginArtifact;
use crate::plugin_system::error::{PluginResult, PluginSystemError};
use crate::plugin_system::factory::PluginFactory;
use crate::plugin_system::module_factory::ModuleDescriptorFactory;
use crate::plugin_system::plugin::Plugin;

pub mod bundled;
pub mod directory;
pub mod single;

pub use bundled::BundledPluginLoader;
pub use directory::{DeploymentUnit, DirectoryPluginLoader, DirectoryScanner, ScanDelta};
pub use single::SinglePluginLoader;

#[async_trait]
pub trait PluginLoader: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Loads every plugin this loader can see, discarding any earlier state.
    async fn load_all_plugins(&self, modules: &ModuleDescriptorFactory) -> PluginResult<Vec<Plugin>>;

    /// Whether [`load_found_plugins`](Self::load_found_plugins) can pick up new artifacts
    fn supports_addition(&self) -> bool {
        false
    }

    fn supports_removal(&self) -> bool {
        false
    }

    /// Plugins for artifacts that appeared or changed since the last load.
    async fn load_found_plugins(&self, _modules: &ModuleDescriptorFactory) -> PluginResult<Vec<Plugin>> {
        Err(PluginSystemError::Unsupported(format!(
            "Loader '{}' does not support adding plugins",
            self.name()
        )))
    }

    /// Keys of plugins whose artifacts disappeared or changed since the last load.
    async fn remove_missing_plugins(&self) -> PluginResult<Vec<String>> {
        Ok(Vec::new())
    }

    /// Deletes the artifact backing `plugin`.
    async fn remove_plugin(&self, plugin: &Plugin) -> PluginResult<()> {
        Err(PluginSystemError::Unsupported(format!(
            "Loader '{}' cannot remove plugin '{}'",
            self.name(),
            plugin.key()
        )))
    }
}

/// Builds a plugin with the first factory that accepts the artifact.
///
/// Failures are recorded on an unloadable plugin keyed by the declared key,
/// or by the artifact name when no key could be read.
pub fn create_plugin(
    factories: &[Arc<dyn PluginFactory>],
    artifact: Arc<dyn PluginArtifact>,
    modules: &ModuleDescriptorFactory,
) -> Plugin {
    let claimed = factories
        .iter()
        .find_map(|f| f.can_create(artifact.as_ref()).map(|key| (f, key)));
    let Some((factory, key)) = claimed else {
        let reason = format!("No plugin factory found for plugin file {}", artifact.name());
        warn!("{}", reason);
        return Plugin::unloadable(artifact.name().to_string(), reason, Some(artifact));
    };

    match factory.create(artifact.clone(), modules) {
        Ok(plugin) => plugin,
        Err(e) => {
            warn!(
                "Unable to load plugin from {} with the {} factory: {}",
                artifact.name(),
                factory.name(),
                e
            );
            Plugin::unloadable(key, e.detail(), Some(artifact))
        }
    }
}
