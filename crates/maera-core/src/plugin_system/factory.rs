//! Plugin factories turn an artifact into a [`Plugin`].
//!
//! Each factory recognises one artifact shape. Loaders ask every factory
//! in turn and use the first one that claims the artifact.
use std::fmt::Debug;
use std::sync::Arc;

use crate::container::manifest::{BundleManifest, MANIFEST_PATH, NAME_HEADER};
use crate::plugin_system::artifact::{ArtifactKind, PluginArtifact};
use crate::plugin_system::descriptor::DescriptorParser;
use crate::plugin_system::error::{PluginResult, PluginSystemError};
use crate::plugin_system::module_factory::ModuleDescriptorFactory;
use crate::plugin_system::plugin::{Plugin, PluginKind};

pub trait PluginFactory: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Plugin key this factory would produce for `artifact`, or `None` when
    /// it does not handle the artifact. The key may be invalid; `create`
    /// reports that.
    fn can_create(&self, artifact: &dyn PluginArtifact) -> Option<String>;

    fn create(
        &self,
        artifact: Arc<dyn PluginArtifact>,
        modules: &ModuleDescriptorFactory,
    ) -> PluginResult<Plugin>;
}

/// Manifest packaged in a jar artifact, if any
pub fn artifact_manifest(artifact: &dyn PluginArtifact) -> Option<BundleManifest> {
    if artifact.kind() != ArtifactKind::Jar {
        return None;
    }
    let bytes = artifact.resource_as_bytes(MANIFEST_PATH).ok()??;
    Some(BundleManifest::parse(&String::from_utf8_lossy(&bytes)))
}

fn descriptor_key(artifact: &dyn PluginArtifact, bytes: &[u8]) -> String {
    DescriptorParser::parse(artifact.name(), bytes)
        .ok()
        .and_then(|p| p.key().map(str::to_string))
        .filter(|k| !k.trim().is_empty())
        .unwrap_or_else(|| artifact.name().to_string())
}

/// Bare `.json` descriptors; modules come from host-registered types.
#[derive(Debug, Default)]
pub struct DescriptorPluginFactory;

impl PluginFactory for DescriptorPluginFactory {
    fn name(&self) -> &'static str {
        "descriptor"
    }

    fn can_create(&self, artifact: &dyn PluginArtifact) -> Option<String> {
        if artifact.kind() != ArtifactKind::Descriptor {
            return None;
        }
        let bytes = artifact.to_bytes().ok()?;
        Some(descriptor_key(artifact, &bytes))
    }

    fn create(
        &self,
        artifact: Arc<dyn PluginArtifact>,
        modules: &ModuleDescriptorFactory,
    ) -> PluginResult<Plugin> {
        let bytes = artifact.to_bytes()?;
        let parser = DescriptorParser::parse(artifact.name(), &bytes)?;
        let key = parser.validated_key()?.to_string();
        let mut plugin = Plugin::new(key, PluginKind::Static, Some(artifact));
        parser.configure_plugin(modules, &mut plugin)?;
        Ok(plugin)
    }
}

/// Jars carrying a descriptor but no bundle plugin key header.
#[derive(Debug)]
pub struct ArtifactPluginFactory {
    descriptor_file_name: String,
}

impl ArtifactPluginFactory {
    pub fn new(descriptor_file_name: impl Into<String>) -> Self {
        Self {
            descriptor_file_name: descriptor_file_name.into(),
        }
    }
}

impl PluginFactory for ArtifactPluginFactory {
    fn name(&self) -> &'static str {
        "artifact"
    }

    fn can_create(&self, artifact: &dyn PluginArtifact) -> Option<String> {
        if artifact.kind() != ArtifactKind::Jar {
            return None;
        }
        if artifact_manifest(artifact).is_some_and(|m| m.plugin_key().is_some()) {
            return None;
        }
        let bytes = artifact.resource_as_bytes(&self.descriptor_file_name).ok()??;
        Some(descriptor_key(artifact, &bytes))
    }

    fn create(
        &self,
        artifact: Arc<dyn PluginArtifact>,
        modules: &ModuleDescriptorFactory,
    ) -> PluginResult<Plugin> {
        let bytes = artifact
            .resource_as_bytes(&self.descriptor_file_name)?
            .ok_or_else(|| {
                PluginSystemError::parse(
                    artifact.name(),
                    format!("No {} found in artifact", self.descriptor_file_name),
                )
            })?;
        let parser = DescriptorParser::parse(artifact.name(), &bytes)?;
        let key = parser.validated_key()?.to_string();
        if parser.plugins_version() >= 2 {
            return Err(PluginSystemError::parse(
                artifact.name(),
                format!(
                    "Plugin '{}' declares plugins-version {} but its manifest has no Maera-Plugin-Key header",
                    key,
                    parser.plugins_version()
                ),
            ));
        }
        let mut plugin = Plugin::new(key, PluginKind::Artifact, Some(artifact));
        parser.configure_plugin(modules, &mut plugin)?;
        Ok(plugin)
    }
}

/// Jars whose manifest carries `Maera-Plugin-Key`; their code runs in the
/// bundle container.
#[derive(Debug)]
pub struct BundlePluginFactory {
    descriptor_file_name: String,
}

impl BundlePluginFactory {
    pub fn new(descriptor_file_name: impl Into<String>) -> Self {
        Self {
            descriptor_file_name: descriptor_file_name.into(),
        }
    }
}

impl PluginFactory for BundlePluginFactory {
    fn name(&self) -> &'static str {
        "bundle"
    }

    fn can_create(&self, artifact: &dyn PluginArtifact) -> Option<String> {
        artifact_manifest(artifact)?.plugin_key().map(str::to_string)
    }

    fn create(
        &self,
        artifact: Arc<dyn PluginArtifact>,
        modules: &ModuleDescriptorFactory,
    ) -> PluginResult<Plugin> {
        let manifest = artifact_manifest(artifact.as_ref())
            .ok_or_else(|| PluginSystemError::parse(artifact.name(), "Bundle has no manifest"))?;
        let key = manifest
            .plugin_key()
            .ok_or_else(|| PluginSystemError::parse(artifact.name(), "Manifest has no Maera-Plugin-Key header"))?
            .to_string();
        if key.contains(':') {
            return Err(PluginSystemError::parse(
                artifact.name(),
                format!("Plugin keys cannot contain ':'. Key is '{}'", key),
            ));
        }

        let descriptor = artifact.resource_as_bytes(&self.descriptor_file_name)?;
        let mut plugin = Plugin::new(key.clone(), PluginKind::Bundle, Some(artifact.clone()));
        match descriptor {
            Some(bytes) => {
                let parser = DescriptorParser::parse(artifact.name(), &bytes)?;
                if parser.validated_key()? != key {
                    return Err(PluginSystemError::parse(
                        artifact.name(),
                        format!(
                            "Descriptor key '{}' does not match manifest key '{}'",
                            parser.key().unwrap_or_default(),
                            key
                        ),
                    ));
                }
                if parser.plugins_version() < 2 {
                    return Err(PluginSystemError::parse(
                        artifact.name(),
                        format!("Bundle plugin '{}' must declare plugins-version 2", key),
                    ));
                }
                parser.configure_plugin(modules, &mut plugin)?;
            }
            None => {
                plugin.set_name(manifest.header(NAME_HEADER).map(str::to_string));
                plugin.set_plugins_version(2);
            }
        }
        if plugin.version() == "0.0.0" {
            let mut info = plugin.information().clone();
            info.version = manifest.version().to_string();
            plugin.set_information(info);
        }
        Ok(plugin)
    }
}

/// The factories used for plugin directories, in precedence order.
pub fn default_plugin_factories(descriptor_file_name: &str) -> Vec<Arc<dyn PluginFactory>> {
    vec![
        Arc::new(BundlePluginFactory::new(descriptor_file_name)),
        Arc::new(ArtifactPluginFactory::new(descriptor_file_name)),
        Arc::new(DescriptorPluginFactory),
    ]
}
