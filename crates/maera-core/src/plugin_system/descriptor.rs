//! Plugin descriptor parsing.
//!
//! A descriptor is a JSON document (`maera-plugin.json` inside a jar, or a
//! bare `.json` file) naming the plugin, its information block, its
//! dependencies, resources and modules:
//!
//! ```json
//! {
//!   "key": "com.example.tools",
//!   "name": "Tools",
//!   "plugins-version": 1,
//!   "plugin-info": { "version": "1.2.0", "vendor": { "name": "Example" } },
//!   "dependencies": ["com.example.base"],
//!   "modules": [
//!     { "type": "web-item", "key": "menu", "params": { "weight": "10" } }
//!   ]
//! }
//! ```
use std::collections::HashMap;

use log::debug;
use serde::Deserialize;
use serde_json::Value;

use crate::kernel::constants::MAX_PLUGINS_VERSION;
use crate::plugin_system::dependency::PluginDependency;
use crate::plugin_system::error::{PluginResult, PluginSystemError};
use crate::plugin_system::module::{ModuleDescriptor, ModuleInfo};
use crate::plugin_system::module_factory::ModuleDescriptorFactory;
use crate::plugin_system::plugin::{Plugin, PluginInformation, ResourceDescriptor, Resources};
use crate::plugin_system::version::VersionRange;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawDescriptor {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    i18n_name_key: Option<String>,
    #[serde(default)]
    system: bool,
    #[serde(default = "default_true")]
    enabled_by_default: bool,
    #[serde(default = "default_plugins_version")]
    plugins_version: u32,
    #[serde(default)]
    plugin_info: Option<RawPluginInfo>,
    #[serde(default)]
    dependencies: Vec<RawDependency>,
    #[serde(default)]
    resources: Vec<RawResource>,
    #[serde(default)]
    modules: Vec<RawModule>,
}

fn default_true() -> bool {
    true
}

fn default_plugins_version() -> u32 {
    1
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawPluginInfo {
    description: Option<String>,
    description_key: Option<String>,
    version: Option<Value>,
    vendor: Option<RawVendor>,
    min_version: Option<f32>,
    max_version: Option<f32>,
    min_runtime_version: Option<String>,
    #[serde(default)]
    parameters: HashMap<String, Value>,
    native_library: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawVendor {
    name: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependency {
    Key(String),
    Detailed {
        key: String,
        #[serde(default)]
        version: Option<String>,
        #[serde(default = "default_true")]
        required: bool,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawResource {
    #[serde(rename = "type")]
    resource_type: String,
    name: String,
    location: Option<String>,
    content: Option<String>,
    #[serde(default)]
    params: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawModule {
    #[serde(rename = "type")]
    module_type: String,
    key: Option<String>,
    name: Option<String>,
    description: Option<String>,
    i18n_name_key: Option<String>,
    class: Option<String>,
    #[serde(default = "default_true")]
    enabled_by_default: bool,
    #[serde(default)]
    system: bool,
    #[serde(default)]
    params: HashMap<String, Value>,
    #[serde(default)]
    resources: Vec<RawResource>,
    min_runtime_version: Option<String>,
}

/// Scalars keep their plain text; anything else keeps its JSON form.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn string_map(raw: &HashMap<String, Value>) -> HashMap<String, String> {
    raw.iter().map(|(k, v)| (k.clone(), value_to_string(v))).collect()
}

/// Parsed descriptor, ready to configure a [`Plugin`].
#[derive(Debug)]
pub struct DescriptorParser {
    source_name: String,
    raw: RawDescriptor,
}

impl DescriptorParser {
    /// Parses descriptor bytes. `source_name` identifies the document in errors.
    pub fn parse(source_name: &str, bytes: &[u8]) -> PluginResult<Self> {
        let raw: RawDescriptor = serde_json::from_slice(bytes).map_err(|e| {
            PluginSystemError::parse(source_name, format!("Invalid descriptor: {}", e))
        })?;
        Ok(Self {
            source_name: source_name.to_string(),
            raw,
        })
    }

    /// Declared key, possibly empty or invalid
    pub fn key(&self) -> Option<&str> {
        self.raw.key.as_deref()
    }

    pub fn plugins_version(&self) -> u32 {
        self.raw.plugins_version
    }

    fn err(&self, message: impl Into<String>) -> PluginSystemError {
        PluginSystemError::parse(&self.source_name, message)
    }

    /// Validates the key and returns it.
    pub fn validated_key(&self) -> PluginResult<&str> {
        let key = self
            .raw
            .key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| self.err("Plugin key must be specified"))?;
        if key.contains(':') {
            return Err(self.err(format!("Plugin keys cannot contain ':'. Key is '{}'", key)));
        }
        Ok(key)
    }

    fn resources(&self, raw: &[RawResource]) -> PluginResult<Resources> {
        let mut resources = Resources::new();
        for r in raw {
            if r.location.is_none() && r.content.is_none() {
                return Err(self.err(format!(
                    "Resource '{}' must have either a location or content",
                    r.name
                )));
            }
            resources.add(ResourceDescriptor {
                resource_type: r.resource_type.clone(),
                name: r.name.clone(),
                location: r.location.clone(),
                content: r.content.clone(),
                params: string_map(&r.params),
            })?;
        }
        Ok(resources)
    }

    fn information(&self) -> PluginInformation {
        let info = self.raw.plugin_info.as_ref();
        let mut result = PluginInformation::default();
        let Some(info) = info else {
            return result;
        };
        if let Some(v) = &info.version {
            result.version = value_to_string(v);
        }
        result.description = info.description.clone();
        result.description_key = info.description_key.clone();
        if let Some(vendor) = &info.vendor {
            result.vendor_name = vendor.name.clone();
            result.vendor_url = vendor.url.clone();
        }
        result.min_version = info.min_version.unwrap_or(0.0);
        result.max_version = info.max_version.unwrap_or(0.0);
        result.min_runtime_version = info.min_runtime_version.clone();
        result.parameters = string_map(&info.parameters);
        result.native_library = info.native_library.clone();
        result
    }

    fn dependency(&self, raw: &RawDependency) -> PluginResult<PluginDependency> {
        match raw {
            RawDependency::Key(key) => Ok(PluginDependency::required_any(key)),
            RawDependency::Detailed { key, version, required } => {
                let version_range = version
                    .as_deref()
                    .map(VersionRange::from_constraint)
                    .transpose()
                    .map_err(|e| self.err(format!("Dependency on '{}': {}", key, e)))?;
                Ok(PluginDependency {
                    plugin_key: key.clone(),
                    version_range,
                    required: *required,
                })
            }
        }
    }

    /// Fills `plugin` from the descriptor and creates its modules.
    ///
    /// Modules whose type is not permitted are skipped; unknown types,
    /// missing module keys and duplicate module keys are errors.
    pub fn configure_plugin(&self, factory: &ModuleDescriptorFactory, plugin: &mut Plugin) -> PluginResult<()> {
        let key = self.validated_key()?.to_string();
        if self.raw.plugins_version > MAX_PLUGINS_VERSION {
            return Err(self.err(format!(
                "Plugin '{}' requires plugins-version {}, this framework supports up to {}",
                key, self.raw.plugins_version, MAX_PLUGINS_VERSION
            )));
        }

        plugin.set_name(self.raw.name.clone());
        plugin.set_i18n_name_key(self.raw.i18n_name_key.clone());
        plugin.set_system(self.raw.system);
        plugin.set_enabled_by_default(self.raw.enabled_by_default);
        plugin.set_plugins_version(self.raw.plugins_version);
        plugin.set_information(self.information());
        plugin.set_resources(self.resources(&self.raw.resources)?);
        for dep in &self.raw.dependencies {
            plugin.add_dependency(self.dependency(dep)?);
        }

        for raw_module in &self.raw.modules {
            let module_key = raw_module
                .key
                .as_deref()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| {
                    self.err(format!(
                        "Module of type '{}' in plugin '{}' is missing a key",
                        raw_module.module_type, key
                    ))
                })?;

            let Some(module) = factory
                .create(&raw_module.module_type)
                .map_err(|e| self.err(e.detail()))?
            else {
                debug!(
                    "Skipping module {}:{} of filtered type '{}'",
                    key, module_key, raw_module.module_type
                );
                continue;
            };

            let info = ModuleInfo {
                plugin_key: key.clone(),
                key: module_key.to_string(),
                module_type: raw_module.module_type.clone(),
                name: raw_module.name.clone(),
                description: raw_module.description.clone(),
                i18n_name_key: raw_module.i18n_name_key.clone(),
                class_name: raw_module.class.clone(),
                enabled_by_default: raw_module.enabled_by_default,
                system: raw_module.system,
                params: string_map(&raw_module.params),
                resources: self.resources(&raw_module.resources)?,
                min_runtime_version: raw_module.min_runtime_version.clone(),
            };
            let descriptor = ModuleDescriptor::new(info, module).map_err(|e| self.err(e.detail()))?;
            plugin
                .add_module_descriptor(descriptor)
                .map_err(|e| self.err(e.detail()))?;
        }
        Ok(())
    }
}
