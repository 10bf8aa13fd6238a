use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::kernel::constants::DEFAULT_DESCRIPTOR_FILE_NAME;
use crate::plugin_system::artifact::{ArtifactKind, BytesPluginArtifact, PluginArtifact, PluginArtifactFactory};
use crate::plugin_system::error::PluginResult;
use crate::plugin_system::factory::{PluginFactory, default_plugin_factories};
use crate::plugin_system::loader::{PluginLoader, create_plugin};
use crate::plugin_system::module_factory::ModuleDescriptorFactory;
use crate::plugin_system::plugin::Plugin;

#[derive(Debug, Clone)]
enum Source {
    File(PathBuf),
    Resource { name: String, bytes: Arc<[u8]> },
}

/// Loads exactly one plugin, from a file or from bytes the host embeds.
#[derive(Debug)]
pub struct SinglePluginLoader {
    source: Source,
    factories: Vec<Arc<dyn PluginFactory>>,
}

impl SinglePluginLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            source: Source::File(path.into()),
            factories: default_plugin_factories(DEFAULT_DESCRIPTOR_FILE_NAME),
        }
    }

    /// `name` decides the artifact kind by extension; a name without a
    /// known extension is read as a descriptor.
    pub fn from_resource(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            source: Source::Resource {
                name: name.into(),
                bytes: bytes.into(),
            },
            factories: default_plugin_factories(DEFAULT_DESCRIPTOR_FILE_NAME),
        }
    }

    pub fn with_factories(mut self, factories: Vec<Arc<dyn PluginFactory>>) -> Self {
        self.factories = factories;
        self
    }

    fn artifact(&self) -> PluginResult<Arc<dyn PluginArtifact>> {
        match &self.source {
            Source::File(path) => PluginArtifactFactory::new().from_path(path),
            Source::Resource { name, bytes } => {
                let kind = ArtifactKind::from_path(Path::new(name)).unwrap_or(ArtifactKind::Descriptor);
                Ok(Arc::new(BytesPluginArtifact::new(name.clone(), kind, bytes.clone())))
            }
        }
    }
}

#[async_trait]
impl PluginLoader for SinglePluginLoader {
    fn name(&self) -> &str {
        "single"
    }

    async fn load_all_plugins(&self, modules: &ModuleDescriptorFactory) -> PluginResult<Vec<Plugin>> {
        let artifact = self.artifact()?;
        Ok(vec![create_plugin(&self.factories, artifact, modules)])
    }
}
