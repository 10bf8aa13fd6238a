use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, error};
use serde::Serialize;

use crate::container::framework::BundleId;
use crate::plugin_system::artifact::PluginArtifact;
use crate::plugin_system::context::PluginContext;
use crate::plugin_system::dependency::PluginDependency;
use crate::plugin_system::error::{PluginResult, PluginSystemError};
use crate::plugin_system::module::ModuleDescriptor;
use crate::storage::state::PluginPersistentState;

/// Lifecycle state of a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PluginState {
    Installed,
    Enabling,
    Enabled,
    Disabling,
    Disabled,
    Uninstalled,
}

impl PluginState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: PluginState) -> bool {
        use PluginState::*;
        matches!(
            (self, next),
            (Installed, Enabling)
                | (Disabled, Enabling)
                | (Enabling, Enabled)
                | (Enabling, Disabled)
                | (Enabled, Disabling)
                | (Disabling, Disabled)
                | (Installed, Disabled)
                | (Installed, Uninstalled)
                | (Disabled, Uninstalled)
        )
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginState::Installed => "installed",
            PluginState::Enabling => "enabling",
            PluginState::Enabled => "enabled",
            PluginState::Disabling => "disabling",
            PluginState::Disabled => "disabled",
            PluginState::Uninstalled => "uninstalled",
        };
        f.write_str(s)
    }
}

/// How a plugin's code is provided
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PluginKind {
    /// Descriptor only; modules are host-registered types
    Static,
    /// Zip artifact with resources and optionally a native library
    Artifact,
    /// Zip artifact installed into the bundle container
    Bundle,
    /// Failed to load; carries the reason
    Unloadable { reason: String },
}

/// Descriptor `plugin-info` block
#[derive(Debug, Clone, Serialize)]
pub struct PluginInformation {
    pub description: Option<String>,
    pub description_key: Option<String>,
    pub version: String,
    pub vendor_name: Option<String>,
    pub vendor_url: Option<String>,
    /// Advisory host version bounds; recorded, not enforced
    pub min_version: f32,
    pub max_version: f32,
    pub min_runtime_version: Option<String>,
    pub parameters: HashMap<String, String>,
    /// Artifact entry holding the plugin's native library
    pub native_library: Option<String>,
}

impl Default for PluginInformation {
    fn default() -> Self {
        Self {
            description: None,
            description_key: None,
            version: "0.0.0".to_string(),
            vendor_name: None,
            vendor_url: None,
            min_version: 0.0,
            max_version: 0.0,
            min_runtime_version: None,
            parameters: HashMap::new(),
            native_library: None,
        }
    }
}

/// A named resource declared by a plugin or module
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDescriptor {
    pub resource_type: String,
    pub name: String,
    pub location: Option<String>,
    pub content: Option<String>,
    pub params: HashMap<String, String>,
}

/// Resource list with unique (type, name) pairs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resources {
    descriptors: Vec<ResourceDescriptor>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource, rejecting a duplicate type and name pair.
    pub fn add(&mut self, resource: ResourceDescriptor) -> PluginResult<()> {
        if self.get(&resource.resource_type, &resource.name).is_some() {
            return Err(PluginSystemError::parse(
                &resource.name,
                format!(
                    "Duplicate resource with type '{}' and name '{}'",
                    resource.resource_type, resource.name
                ),
            ));
        }
        self.descriptors.push(resource);
        Ok(())
    }

    pub fn get(&self, resource_type: &str, name: &str) -> Option<&ResourceDescriptor> {
        self.descriptors
            .iter()
            .find(|r| r.resource_type == resource_type && r.name == name)
    }

    pub fn of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a ResourceDescriptor> {
        self.descriptors.iter().filter(move |r| r.resource_type == resource_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// A loaded plugin: descriptor metadata, modules and runtime state.
pub struct Plugin {
    key: String,
    name: Option<String>,
    i18n_name_key: Option<String>,
    information: PluginInformation,
    plugins_version: u32,
    state: PluginState,
    kind: PluginKind,
    enabled_by_default: bool,
    system: bool,
    bundled: bool,
    date_loaded: SystemTime,
    modules: Vec<ModuleDescriptor>,
    dependencies: Vec<PluginDependency>,
    resources: Resources,
    artifact: Option<Arc<dyn PluginArtifact>>,
    context: PluginContext,
    bundle_id: Option<BundleId>,
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("key", &self.key)
            .field("version", &self.information.version)
            .field("state", &self.state)
            .field("kind", &self.kind)
            .field("modules", &self.modules.iter().map(|m| m.key()).collect::<Vec<_>>())
            .finish()
    }
}

impl Plugin {
    /// Empty plugin in the `Installed` state
    pub fn new(key: impl Into<String>, kind: PluginKind, artifact: Option<Arc<dyn PluginArtifact>>) -> Self {
        let key = key.into();
        let context = PluginContext::new(key.clone(), artifact.clone());
        Self {
            key,
            name: None,
            i18n_name_key: None,
            information: PluginInformation::default(),
            plugins_version: 1,
            state: PluginState::Installed,
            kind,
            enabled_by_default: true,
            system: false,
            bundled: false,
            date_loaded: SystemTime::now(),
            modules: Vec::new(),
            dependencies: Vec::new(),
            resources: Resources::new(),
            artifact,
            context,
            bundle_id: None,
        }
    }

    /// Placeholder for an artifact that failed to load
    pub fn unloadable(
        key: impl Into<String>,
        reason: impl Into<String>,
        artifact: Option<Arc<dyn PluginArtifact>>,
    ) -> Self {
        let mut plugin = Self::new(key, PluginKind::Unloadable { reason: reason.into() }, artifact);
        plugin.state = PluginState::Disabled;
        plugin
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.key)
    }

    pub fn i18n_name_key(&self) -> Option<&str> {
        self.i18n_name_key.as_deref()
    }

    pub fn information(&self) -> &PluginInformation {
        &self.information
    }

    pub fn version(&self) -> &str {
        &self.information.version
    }

    pub fn plugins_version(&self) -> u32 {
        self.plugins_version
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    pub fn kind(&self) -> &PluginKind {
        &self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.state == PluginState::Enabled
    }

    pub fn is_enabled_by_default(&self) -> bool {
        self.enabled_by_default
    }

    pub fn is_system(&self) -> bool {
        self.system
    }

    pub fn is_bundled(&self) -> bool {
        self.bundled
    }

    pub fn is_unloadable(&self) -> bool {
        matches!(self.kind, PluginKind::Unloadable { .. })
    }

    pub fn unloadable_reason(&self) -> Option<&str> {
        match &self.kind {
            PluginKind::Unloadable { reason } => Some(reason),
            _ => None,
        }
    }

    /// Bundled plugins and host descriptors cannot be removed at runtime
    pub fn is_uninstallable(&self) -> bool {
        !self.bundled && self.artifact.as_ref().and_then(|a| a.file()).is_some()
    }

    /// Whether uninstalling may delete the backing file
    pub fn is_deletable(&self) -> bool {
        self.is_uninstallable()
    }

    /// Plugins whose code comes from their artifact rather than the host
    pub fn is_dynamically_loaded(&self) -> bool {
        matches!(self.kind, PluginKind::Artifact | PluginKind::Bundle)
    }

    pub fn date_loaded(&self) -> SystemTime {
        self.date_loaded
    }

    pub fn artifact(&self) -> Option<&Arc<dyn PluginArtifact>> {
        self.artifact.as_ref()
    }

    pub fn context(&self) -> &PluginContext {
        &self.context
    }

    pub fn dependencies(&self) -> &[PluginDependency] {
        &self.dependencies
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn bundle_id(&self) -> Option<BundleId> {
        self.bundle_id
    }

    pub fn module_descriptors(&self) -> &[ModuleDescriptor] {
        &self.modules
    }

    pub fn module_descriptor(&self, module_key: &str) -> Option<&ModuleDescriptor> {
        self.modules.iter().find(|m| m.key() == module_key)
    }

    pub fn module_descriptors_by_type<'a>(
        &'a self,
        module_type: &'a str,
    ) -> impl Iterator<Item = &'a ModuleDescriptor> {
        self.modules.iter().filter(move |m| m.module_type() == module_type)
    }

    // -- population, used by descriptor parsing and plugin factories --

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    pub fn set_i18n_name_key(&mut self, key: Option<String>) {
        self.i18n_name_key = key;
    }

    pub fn set_information(&mut self, information: PluginInformation) {
        self.information = information;
    }

    pub fn set_plugins_version(&mut self, version: u32) {
        self.plugins_version = version;
    }

    pub fn set_enabled_by_default(&mut self, enabled: bool) {
        self.enabled_by_default = enabled;
    }

    pub fn set_system(&mut self, system: bool) {
        self.system = system;
    }

    pub fn set_bundled(&mut self, bundled: bool) {
        self.bundled = bundled;
    }

    pub fn set_resources(&mut self, resources: Resources) {
        self.resources = resources;
    }

    pub fn add_dependency(&mut self, dependency: PluginDependency) {
        self.dependencies.push(dependency);
    }

    pub(crate) fn set_bundle_id(&mut self, id: Option<BundleId>) {
        self.bundle_id = id;
    }

    /// Appends a module, rejecting duplicate module keys.
    pub fn add_module_descriptor(&mut self, descriptor: ModuleDescriptor) -> PluginResult<()> {
        if self.module_descriptor(descriptor.key()).is_some() {
            return Err(PluginSystemError::parse(
                &self.key,
                format!(
                    "Found duplicate key '{}' within plugin '{}'",
                    descriptor.key(),
                    self.key
                ),
            ));
        }
        self.modules.push(descriptor);
        Ok(())
    }

    // -- lifecycle, driven by the plugin manager --

    pub(crate) fn set_state(&mut self, next: PluginState) {
        if self.state != next && !self.state.can_transition_to(next) {
            debug!("Plugin '{}' moving {} -> {} outside the usual order", self.key, self.state, next);
        }
        self.state = next;
    }

    /// Enables the modules the persisted state allows, in declaration order.
    ///
    /// On failure the modules enabled so far are switched off again and the
    /// error is returned. Returns the complete keys that were enabled.
    pub(crate) fn enable_modules(&mut self, state: &PluginPersistentState) -> PluginResult<Vec<String>> {
        if let (Some(entry), PluginKind::Artifact) = (self.information.native_library.clone(), &self.kind) {
            self.context.load_native_library(&entry)?;
        }

        let mut enabled = Vec::new();
        for index in 0..self.modules.len() {
            let module = &mut self.modules[index];
            let complete_key = module.complete_key();
            if !state.is_enabled(&complete_key, module.is_enabled_by_default()) {
                continue;
            }
            if let Err(e) = module.enable(&self.context) {
                error!("Failed to enable module {}: {}", complete_key, e);
                for done in self.modules[..index].iter_mut().rev() {
                    done.disable(&self.context);
                }
                self.context.release();
                return Err(e);
            }
            enabled.push(complete_key);
        }
        Ok(enabled)
    }

    /// Disables every enabled module in reverse declaration order.
    /// Returns the complete keys that were disabled.
    pub(crate) fn disable_modules(&mut self) -> Vec<String> {
        let mut disabled = Vec::new();
        for module in self.modules.iter_mut().rev() {
            if module.is_enabled() {
                module.disable(&self.context);
                disabled.push(module.complete_key());
            }
        }
        self.context.release();
        disabled
    }

    /// Switches one module on. Returns false when it was already enabled.
    pub(crate) fn enable_module(&mut self, module_key: &str) -> PluginResult<bool> {
        let complete_key = format!("{}:{}", self.key, module_key);
        let module = self
            .modules
            .iter_mut()
            .find(|m| m.key() == module_key)
            .ok_or(PluginSystemError::ModuleNotFound(complete_key))?;
        if module.is_enabled() {
            return Ok(false);
        }
        module.enable(&self.context)?;
        Ok(true)
    }

    /// Switches one module off. Returns false when it was not enabled.
    pub(crate) fn disable_module(&mut self, module_key: &str) -> PluginResult<bool> {
        let complete_key = format!("{}:{}", self.key, module_key);
        let module = self
            .modules
            .iter_mut()
            .find(|m| m.key() == module_key)
            .ok_or(PluginSystemError::ModuleNotFound(complete_key))?;
        if !module.is_enabled() {
            return Ok(false);
        }
        module.disable(&self.context);
        Ok(true)
    }

    /// Turns this plugin into an unloadable one after a lifecycle failure.
    pub(crate) fn degrade(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        error!("Plugin '{}' is now unloadable: {}", self.key, reason);
        self.disable_modules();
        self.kind = PluginKind::Unloadable { reason };
        self.state = PluginState::Disabled;
    }

    /// Destroys modules and releases native resources; the plugin is finished.
    pub(crate) fn close(&mut self) {
        self.disable_modules();
        for module in self.modules.iter_mut() {
            module.destroy();
        }
        self.state = PluginState::Uninstalled;
    }
}

/// Serializable view of a plugin for listings
#[derive(Debug, Clone, Serialize)]
pub struct PluginSummary {
    pub key: String,
    pub name: String,
    pub version: String,
    pub state: PluginState,
    pub kind: PluginKind,
    pub bundled: bool,
    pub modules: Vec<ModuleSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleSummary {
    pub complete_key: String,
    pub module_type: String,
    pub enabled: bool,
}

impl From<&Plugin> for PluginSummary {
    fn from(plugin: &Plugin) -> Self {
        Self {
            key: plugin.key.clone(),
            name: plugin.name().to_string(),
            version: plugin.version().to_string(),
            state: plugin.state,
            kind: plugin.kind.clone(),
            bundled: plugin.bundled,
            modules: plugin
                .modules
                .iter()
                .map(|m| ModuleSummary {
                    complete_key: m.complete_key(),
                    module_type: m.module_type().to_string(),
                    enabled: m.is_enabled(),
                })
                .collect(),
        }
    }
}
