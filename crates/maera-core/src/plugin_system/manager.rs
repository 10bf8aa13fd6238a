//! # Plugin Manager
//!
//! [`DefaultPluginManager`] owns the plugin registry and drives every
//! lifecycle transition: loading at init, enabling and disabling with
//! dependency ordering, installs, uninstalls and directory rescans.
//!
//! Its surface is split over three traits so callers can depend on just the
//! part they use: [`PluginAccessor`] for reads, [`PluginController`] for state
//! changes and [`PluginLifecycle`] for framework start, restart and shutdown.
//!
//! All state-changing operations run under one operation lock, so they are
//! serialised. Readers take the registry lock only and never observe a
//! half-finished operation. Events are published once both locks are
//! released, which lets handlers call back into the manager.
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::{Mutex, RwLock};

use crate::container::ContainerManager;
use crate::event::{EventManager, FrameworkEvent, PluginEvent};
use crate::kernel::component::KernelComponent;
use crate::kernel::constants::DEFAULT_DESCRIPTOR_FILE_NAME;
use crate::kernel::error::{Error, KernelLifecyclePhase, Result};
use crate::plugin_system::artifact::PluginArtifact;
use crate::plugin_system::dependency::{enabled_dependents, resolve_enable_order};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::factory::{PluginFactory, default_plugin_factories};
use crate::plugin_system::installer::PluginInstaller;
use crate::plugin_system::loader::PluginLoader;
use crate::plugin_system::module::{ModuleDescriptor, ModuleInfo, split_complete_key};
use crate::plugin_system::module_factory::ModuleDescriptorFactory;
use crate::plugin_system::plugin::{Plugin, PluginKind, PluginState, PluginSummary};
use crate::plugin_system::registry::PluginRegistry;
use crate::storage::state::{PluginPersistentState, PluginStateStore};

/// Read access to plugins and modules
#[async_trait]
pub trait PluginAccessor: Send + Sync {
    async fn plugin(&self, key: &str) -> Option<PluginSummary>;

    /// Every registered plugin, in load order
    async fn plugins(&self) -> Vec<PluginSummary>;

    async fn enabled_plugins(&self) -> Vec<PluginSummary>;

    async fn is_plugin_enabled(&self, key: &str) -> bool;

    async fn is_plugin_module_enabled(&self, complete_key: &str) -> bool;

    async fn plugin_state(&self, key: &str) -> Option<PluginState>;

    async fn module_descriptor(&self, complete_key: &str) -> Option<ModuleInfo>;

    /// Enabled modules of `module_type` in enabled plugins
    async fn enabled_module_descriptors_by_type(&self, module_type: &str) -> Vec<ModuleInfo>;

    /// Keys of the plugins that declare a required dependency on `key`
    async fn dependent_plugins(&self, key: &str) -> Vec<String>;
}

/// Plugin and module state changes
#[async_trait]
pub trait PluginController: Send + Sync {
    /// Enables the plugins and everything they require, dependencies first.
    async fn enable_plugins(&self, keys: &[String]) -> Result<()>;

    /// Disables a plugin and its enabled dependents, remembering the choice.
    async fn disable_plugin(&self, key: &str) -> Result<()>;

    async fn disable_plugin_without_persisting(&self, key: &str) -> Result<()>;

    async fn enable_plugin_module(&self, complete_key: &str) -> Result<()>;

    async fn disable_plugin_module(&self, complete_key: &str) -> Result<()>;

    /// Validates then installs all artifacts, or none of them.
    /// Returns the installed plugin keys.
    async fn install_plugins(&self, artifacts: Vec<Arc<dyn PluginArtifact>>) -> Result<Vec<String>>;

    async fn uninstall(&self, key: &str) -> Result<()>;

    /// Picks up artifacts added, changed or removed since the last scan.
    /// Returns the number of plugins loaded.
    async fn scan_for_new_plugins(&self) -> Result<usize>;
}

/// Framework start, restart and shutdown
#[async_trait]
pub trait PluginLifecycle: Send + Sync {
    async fn init(&self) -> Result<()>;

    async fn shutdown(&self) -> Result<()>;

    /// Disables then re-enables every enabled plugin without reloading.
    async fn warm_restart(&self) -> Result<()>;
}

#[derive(Debug, Default)]
struct OperationState {
    initialized: bool,
    persistent: PluginPersistentState,
}

/// Builder for [`DefaultPluginManager`]
pub struct PluginManagerBuilder {
    store: Arc<dyn PluginStateStore>,
    modules: Arc<ModuleDescriptorFactory>,
    event_manager: Arc<dyn EventManager>,
    loaders: Vec<Arc<dyn PluginLoader>>,
    installer: Option<Arc<dyn PluginInstaller>>,
    factories: Option<Vec<Arc<dyn PluginFactory>>>,
    container: Option<Arc<ContainerManager>>,
}

impl PluginManagerBuilder {
    /// Adds a loader; loaders run in the order they are added.
    pub fn loader(mut self, loader: Arc<dyn PluginLoader>) -> Self {
        self.loaders.push(loader);
        self
    }

    pub fn installer(mut self, installer: Arc<dyn PluginInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    /// Factories used to validate artifacts before installing them
    pub fn plugin_factories(mut self, factories: Vec<Arc<dyn PluginFactory>>) -> Self {
        self.factories = Some(factories);
        self
    }

    /// Container that hosts bundle plugins
    pub fn container(mut self, container: Arc<ContainerManager>) -> Self {
        self.container = Some(container);
        self
    }

    pub fn build(self) -> DefaultPluginManager {
        DefaultPluginManager {
            name: "DefaultPluginManager",
            registry: RwLock::new(PluginRegistry::new()),
            lifecycle: Mutex::new(()),
            operations: Mutex::new(OperationState::default()),
            store: self.store,
            modules: self.modules,
            event_manager: self.event_manager,
            loaders: self.loaders,
            installer: self.installer,
            factories: self
                .factories
                .unwrap_or_else(|| default_plugin_factories(DEFAULT_DESCRIPTOR_FILE_NAME)),
            container: self.container,
        }
    }
}

/// Default implementation of the plugin manager traits
pub struct DefaultPluginManager {
    name: &'static str,
    registry: RwLock<PluginRegistry>,
    /// Held for the whole of init, shutdown and warm restart
    lifecycle: Mutex<()>,
    operations: Mutex<OperationState>,
    store: Arc<dyn PluginStateStore>,
    modules: Arc<ModuleDescriptorFactory>,
    event_manager: Arc<dyn EventManager>,
    loaders: Vec<Arc<dyn PluginLoader>>,
    installer: Option<Arc<dyn PluginInstaller>>,
    factories: Vec<Arc<dyn PluginFactory>>,
    container: Option<Arc<ContainerManager>>,
}

impl fmt::Debug for DefaultPluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultPluginManager")
            .field("name", &self.name)
            .field("loaders", &self.loaders)
            .field("installer", &self.installer)
            .field("has_container", &self.container.is_some())
            .finish_non_exhaustive()
    }
}

fn ensure_initialized(ops: &OperationState) -> Result<()> {
    if ops.initialized {
        Ok(())
    } else {
        Err(PluginSystemError::IllegalState("Plugin manager has not been initialised".to_string()).into())
    }
}

fn requires_enabled(registry: &PluginRegistry, plugin: &Plugin) -> Option<String> {
    plugin
        .dependencies()
        .iter()
        .filter(|d| d.required)
        .find(|d| !registry.get(&d.plugin_key).is_some_and(Plugin::is_enabled))
        .map(|d| d.plugin_key.clone())
}

impl DefaultPluginManager {
    pub fn builder(
        store: Arc<dyn PluginStateStore>,
        modules: Arc<ModuleDescriptorFactory>,
        event_manager: Arc<dyn EventManager>,
    ) -> PluginManagerBuilder {
        PluginManagerBuilder {
            store,
            modules,
            event_manager,
            loaders: Vec::new(),
            installer: None,
            factories: None,
            container: None,
        }
    }

    pub fn module_descriptor_factory(&self) -> &Arc<ModuleDescriptorFactory> {
        &self.modules
    }

    pub fn container(&self) -> Option<&Arc<ContainerManager>> {
        self.container.as_ref()
    }

    pub async fn is_initialized(&self) -> bool {
        self.operations.lock().await.initialized
    }

    /// Runs `f` against a module, looked up by complete key.
    pub async fn with_module_descriptor<R>(
        &self,
        complete_key: &str,
        f: impl FnOnce(&ModuleDescriptor) -> R + Send,
    ) -> Option<R> {
        let registry = self.registry.read().await;
        registry.module_descriptor(complete_key).map(f)
    }

    /// Runs `f` against every enabled module of `module_type` in an enabled plugin.
    pub async fn for_each_enabled_module(&self, module_type: &str, mut f: impl FnMut(&ModuleDescriptor) + Send) {
        let registry = self.registry.read().await;
        for plugin in registry.plugins_in_order().filter(|p| p.is_enabled()) {
            for module in plugin.module_descriptors_by_type(module_type).filter(|m| m.is_enabled()) {
                f(module);
            }
        }
    }

    /// Saves `next` and adopts it as the in-memory state. On failure the
    /// in-memory state keeps matching the store.
    fn commit(&self, ops: &mut OperationState, next: PluginPersistentState) -> Result<()> {
        if let Err(e) = self.store.save(&next) {
            error!("Failed to save plugin state: {}", e);
            return Err(e.into());
        }
        ops.persistent = next;
        Ok(())
    }

    async fn publish(&self, events: Vec<PluginEvent>) {
        for event in events {
            let report = self.event_manager.dispatch(&event).await;
            for failure in report.failures {
                warn!("Handler failed for {:?}: {}", event, failure);
            }
        }
    }

    async fn publish_framework(&self, event: FrameworkEvent) {
        let report = self.event_manager.dispatch(&event).await;
        for failure in report.failures {
            warn!("Handler failed for {:?}: {}", event, failure);
        }
    }

    async fn start_plugin_bundle(&self, plugin: &mut Plugin) -> Result<()> {
        let container = self
            .container
            .as_ref()
            .filter(|c| c.is_running())
            .ok_or_else(|| {
                PluginSystemError::IllegalState(format!(
                    "Bundle container is not running, cannot enable bundle plugin '{}'",
                    plugin.key()
                ))
            })?;
        if let Some(id) = plugin.bundle_id() {
            match container.start_bundle(id) {
                Ok(()) => return Ok(()),
                Err(e) => debug!("Reinstalling bundle for '{}': {}", plugin.key(), e),
            }
        }
        let artifact = plugin.artifact().cloned().ok_or_else(|| {
            PluginSystemError::IllegalState(format!("Bundle plugin '{}' has no artifact", plugin.key()))
        })?;
        let bytes = artifact.to_bytes()?;
        let location = artifact
            .file()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| artifact.name().to_string());
        let bundle = container.install_bundle_bytes(&location, bytes).await?;
        plugin.set_bundle_id(Some(bundle.id));
        container.start_bundle(bundle.id)?;
        Ok(())
    }

    fn stop_plugin_bundle(&self, plugin: &Plugin) {
        let (Some(id), Some(container)) = (plugin.bundle_id(), self.container.as_ref()) else {
            return;
        };
        if container.is_running() {
            if let Err(e) = container.stop_bundle(id) {
                warn!("Failed to stop bundle {} of plugin '{}': {}", id, plugin.key(), e);
            }
        }
    }

    async fn enable_one(&self, plugin: &mut Plugin, persistent: &PluginPersistentState, events: &mut Vec<PluginEvent>) {
        plugin.set_state(PluginState::Enabling);
        if matches!(plugin.kind(), PluginKind::Bundle) {
            if let Err(e) = self.start_plugin_bundle(plugin).await {
                plugin.degrade(e.to_string());
                return;
            }
        }
        match plugin.enable_modules(persistent) {
            Ok(modules) => {
                plugin.set_state(PluginState::Enabled);
                info!("Enabled plugin '{}' ({} module(s))", plugin.key(), modules.len());
                events.extend(
                    modules
                        .into_iter()
                        .map(|complete_key| PluginEvent::ModuleEnabled { complete_key }),
                );
                events.push(PluginEvent::Enabled {
                    plugin_key: plugin.key().to_string(),
                });
            }
            Err(e) => {
                self.stop_plugin_bundle(plugin);
                plugin.degrade(e.detail());
            }
        }
    }

    /// Enables `order` front to back. A plugin whose required dependencies are
    /// not enabled by the time its turn comes is skipped. Returns the keys
    /// that ended up enabled, including ones that already were.
    async fn enable_in_order(
        &self,
        registry: &mut PluginRegistry,
        persistent: &PluginPersistentState,
        order: &[String],
        events: &mut Vec<PluginEvent>,
    ) -> Vec<String> {
        let mut enabled = Vec::new();
        for key in order {
            let Some(plugin) = registry.get(key) else {
                continue;
            };
            if plugin.is_enabled() {
                enabled.push(key.clone());
                continue;
            }
            if plugin.is_unloadable() {
                continue;
            }
            if let Some(missing) = requires_enabled(registry, plugin) {
                warn!("Not enabling '{}': required plugin '{}' is not enabled", key, missing);
                continue;
            }
            let Some(plugin) = registry.get_mut(key) else {
                continue;
            };
            self.enable_one(plugin, persistent, events).await;
            if plugin.is_enabled() {
                enabled.push(key.clone());
            }
        }
        enabled
    }

    /// Enables the listed plugins the persisted state or their defaults allow.
    /// Dependencies are never pulled in against the stored state.
    async fn enable_per_state(
        &self,
        registry: &mut PluginRegistry,
        persistent: &PluginPersistentState,
        keys: &[String],
        events: &mut Vec<PluginEvent>,
    ) {
        let wanted: Vec<String> = keys
            .iter()
            .filter(|k| {
                registry
                    .get(k)
                    .is_some_and(|p| !p.is_unloadable() && persistent.is_enabled(k, p.is_enabled_by_default()))
            })
            .cloned()
            .collect();
        let plan = resolve_enable_order(registry, &wanted);
        for (key, e) in &plan.failures {
            warn!("Plugin '{}' cannot be enabled: {}", key, e);
        }
        let order: Vec<String> = plan.order.into_iter().filter(|k| wanted.contains(k)).collect();
        self.enable_in_order(registry, persistent, &order, events).await;
    }

    fn disable_one(&self, plugin: &mut Plugin, events: &mut Vec<PluginEvent>) {
        if !plugin.is_enabled() {
            return;
        }
        plugin.set_state(PluginState::Disabling);
        let modules = plugin.disable_modules();
        self.stop_plugin_bundle(plugin);
        plugin.set_state(PluginState::Disabled);
        info!("Disabled plugin '{}'", plugin.key());
        events.extend(
            modules
                .into_iter()
                .map(|complete_key| PluginEvent::ModuleDisabled { complete_key }),
        );
        events.push(PluginEvent::Disabled {
            plugin_key: plugin.key().to_string(),
        });
    }

    /// Disables `key` after its enabled dependents. Returns the dependents
    /// that were switched off.
    fn disable_with_dependents(
        &self,
        registry: &mut PluginRegistry,
        key: &str,
        events: &mut Vec<PluginEvent>,
    ) -> Vec<String> {
        let dependents = enabled_dependents(registry, key);
        for dependent in &dependents {
            if let Some(plugin) = registry.get_mut(dependent) {
                info!("Disabling '{}' because it requires '{}'", dependent, key);
                self.disable_one(plugin, events);
            }
        }
        if let Some(plugin) = registry.get_mut(key) {
            self.disable_one(plugin, events);
        }
        dependents
    }

    /// Takes a plugin out of service and out of the registry. Returns the
    /// dependents that had to be disabled.
    fn discard(&self, registry: &mut PluginRegistry, key: &str, events: &mut Vec<PluginEvent>) -> Vec<String> {
        let dependents = self.disable_with_dependents(registry, key, events);
        if let Some(mut plugin) = registry.unregister(key) {
            plugin.close();
        }
        if let Some(container) = self.container.as_ref().filter(|c| c.is_running()) {
            if let Err(e) = container.uninstall_bundle_for_plugin(key) {
                warn!("Failed to uninstall bundle of plugin '{}': {}", key, e);
            }
        }
        dependents
    }

    /// Registers freshly loaded plugins, replacing any with the same key.
    /// Returns the new keys and the dependents of replaced plugins that had
    /// to be disabled.
    fn register_loaded(
        &self,
        registry: &mut PluginRegistry,
        plugins: Vec<Plugin>,
        loader: usize,
        events: &mut Vec<PluginEvent>,
    ) -> (Vec<String>, Vec<String>) {
        let mut keys = Vec::new();
        let mut dependents = Vec::new();
        for plugin in plugins {
            let key = plugin.key().to_string();
            if let Some(reason) = plugin.unloadable_reason() {
                warn!("Plugin '{}' is unloadable: {}", key, reason);
            }
            if registry.contains(&key) {
                dependents.extend(self.disable_with_dependents(registry, &key, events));
            }
            if let Some(mut previous) = registry.replace(plugin, Some(loader)) {
                info!("Plugin '{}' replaced by a newly loaded artifact", key);
                previous.close();
            }
            keys.push(key);
        }
        dependents.retain(|d| !keys.contains(d));
        (keys, dependents)
    }

    async fn load_all(&self, ops: &OperationState) -> Result<Vec<PluginEvent>> {
        let mut registry = self.registry.write().await;
        let mut events = Vec::new();
        for (index, loader) in self.loaders.iter().enumerate() {
            let plugins = match loader.load_all_plugins(&self.modules).await {
                Ok(plugins) => plugins,
                Err(e) => {
                    error!("Loader '{}' failed: {}", loader.name(), e);
                    for mut plugin in registry.drain() {
                        plugin.close();
                    }
                    return Err(e.into());
                }
            };
            debug!("Loader '{}' found {} plugin(s)", loader.name(), plugins.len());
            self.register_loaded(&mut registry, plugins, index, &mut events);
        }
        let keys = registry.keys_in_order();
        self.enable_per_state(&mut registry, &ops.persistent, &keys, &mut events)
            .await;
        info!("Loaded {} plugin(s)", registry.len());
        Ok(events)
    }

    async fn scan(&self, ops: &OperationState, events: &mut Vec<PluginEvent>) -> Result<usize> {
        let mut registry = self.registry.write().await;
        let mut found = 0;
        for (index, loader) in self.loaders.iter().enumerate() {
            if !loader.supports_addition() {
                continue;
            }
            let mut removed = Vec::new();
            let mut reenable = Vec::new();
            for key in loader.remove_missing_plugins().await? {
                if registry.loader_index(&key) != Some(index) {
                    continue;
                }
                info!("Artifact of plugin '{}' is gone or changed, removing it", key);
                reenable.extend(self.discard(&mut registry, &key, events));
                removed.push(key);
            }

            let plugins = loader.load_found_plugins(&self.modules).await?;
            found += plugins.len();
            let (loaded, dependents) = self.register_loaded(&mut registry, plugins, index, events);
            events.extend(
                loaded
                    .iter()
                    .map(|k| PluginEvent::Installed { plugin_key: k.clone() }),
            );
            events.extend(
                removed
                    .iter()
                    .filter(|k| !registry.contains(k))
                    .map(|k| PluginEvent::Uninstalled { plugin_key: k.clone() }),
            );
            reenable.extend(dependents);
            reenable.retain(|k| registry.contains(k) && !loaded.contains(k));
            let mut keys = loaded;
            keys.extend(reenable);
            self.enable_per_state(&mut registry, &ops.persistent, &keys, events)
                .await;
        }
        Ok(found)
    }

    async fn disable(&self, key: &str, persist: bool) -> Result<()> {
        let mut ops = self.operations.lock().await;
        ensure_initialized(&ops)?;
        let mut events = Vec::new();
        {
            let mut registry = self.registry.write().await;
            let Some(plugin) = registry.get(key) else {
                return Err(PluginSystemError::PluginNotFound(key.to_string()).into());
            };
            let default = plugin.is_enabled_by_default();
            if persist {
                let mut next = ops.persistent.clone();
                next.set_enabled(key, false, default);
                self.commit(&mut ops, next)?;
            }
            self.disable_with_dependents(&mut registry, key, &mut events);
        }
        drop(ops);
        self.publish(events).await;
        Ok(())
    }

    async fn set_module_enabled(&self, complete_key: &str, enable: bool) -> Result<()> {
        let (plugin_key, module_key) = split_complete_key(complete_key)?;
        let mut ops = self.operations.lock().await;
        ensure_initialized(&ops)?;
        let mut events = Vec::new();
        let saved = {
            let mut registry = self.registry.write().await;
            let plugin = registry
                .get_mut(plugin_key)
                .ok_or_else(|| PluginSystemError::PluginNotFound(plugin_key.to_string()))?;
            let default = plugin
                .module_descriptor(module_key)
                .ok_or_else(|| PluginSystemError::ModuleNotFound(complete_key.to_string()))?
                .is_enabled_by_default();
            if plugin.is_enabled() {
                let changed = if enable {
                    plugin.enable_module(module_key)?
                } else {
                    plugin.disable_module(module_key)?
                };
                if changed {
                    let complete_key = complete_key.to_string();
                    events.push(if enable {
                        PluginEvent::ModuleEnabled { complete_key }
                    } else {
                        PluginEvent::ModuleDisabled { complete_key }
                    });
                }
            }
            let mut next = ops.persistent.clone();
            next.set_enabled(complete_key, enable, default);
            self.commit(&mut ops, next)
        };
        drop(ops);
        self.publish(events).await;
        saved
    }

    /// Checks every artifact before anything is written
    async fn validate_install(&self, artifacts: &[Arc<dyn PluginArtifact>]) -> Result<Vec<String>> {
        let registry = self.registry.read().await;
        let mut keys: Vec<String> = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let factory = self
                .factories
                .iter()
                .find(|f| f.can_create(artifact.as_ref()).is_some())
                .ok_or_else(|| PluginSystemError::InstallError {
                    artifact: artifact.name().to_string(),
                    message: format!("No plugin factory found for plugin file {}", artifact.name()),
                })?;
            let mut plugin = factory.create(artifact.clone(), &self.modules)?;
            plugin.close();
            let key = plugin.key().to_string();
            if keys.contains(&key) {
                return Err(PluginSystemError::InstallError {
                    artifact: artifact.name().to_string(),
                    message: format!("Plugin '{}' appears more than once in one install", key),
                }
                .into());
            }
            if let Some(existing) = registry.get(&key) {
                let removable = registry
                    .loader_index(&key)
                    .and_then(|i| self.loaders.get(i))
                    .is_some_and(|l| l.supports_removal());
                if !existing.is_uninstallable() || !removable {
                    return Err(PluginSystemError::InstallError {
                        artifact: artifact.name().to_string(),
                        message: format!("Plugin '{}' is already installed and cannot be replaced", key),
                    }
                    .into());
                }
            }
            keys.push(key);
        }
        Ok(keys)
    }

    async fn write_artifacts(
        &self,
        installer: &dyn PluginInstaller,
        artifacts: &[Arc<dyn PluginArtifact>],
        keys: &[String],
    ) -> Result<Vec<PathBuf>> {
        let mut written: Vec<(PathBuf, Option<Vec<u8>>)> = Vec::new();
        for (artifact, key) in artifacts.iter().zip(keys) {
            let target = installer.target_path(artifact.as_ref());
            let previous = tokio::fs::read(&target).await.ok();
            match installer.install_plugin(key, artifact.as_ref()) {
                Ok(path) => written.push((path, previous)),
                Err(e) => {
                    warn!("Install of '{}' failed, rolling back {} file(s)", key, written.len());
                    for (path, previous) in written.into_iter().rev() {
                        let undo = match previous {
                            Some(bytes) => tokio::fs::write(&path, bytes).await,
                            None => tokio::fs::remove_file(&path).await,
                        };
                        if let Err(re) = undo {
                            error!("Failed to roll back {}: {}", path.display(), re);
                        }
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(written.into_iter().map(|(path, _)| path).collect())
    }

    /// Deletes artifacts of upgraded plugins that were stored under another name
    async fn remove_superseded(&self, keys: &[String], installed: &[PathBuf]) {
        let registry = self.registry.read().await;
        for (key, new_path) in keys.iter().zip(installed) {
            let Some(old_path) = registry.get(key).and_then(|p| p.artifact()).and_then(|a| a.file()) else {
                continue;
            };
            let old = tokio::fs::canonicalize(old_path)
                .await
                .unwrap_or_else(|_| old_path.to_path_buf());
            let new = tokio::fs::canonicalize(new_path)
                .await
                .unwrap_or_else(|_| new_path.clone());
            if old != new {
                info!("Removing superseded artifact {} of plugin '{}'", old.display(), key);
                if let Err(e) = tokio::fs::remove_file(&old).await {
                    warn!("Failed to remove {}: {}", old.display(), e);
                }
            }
        }
    }
}

#[async_trait]
impl KernelComponent for DefaultPluginManager {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.init().await
    }

    async fn stop(&self) -> Result<()> {
        if self.is_initialized().await {
            self.shutdown().await
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PluginAccessor for DefaultPluginManager {
    async fn plugin(&self, key: &str) -> Option<PluginSummary> {
        self.registry.read().await.get(key).map(PluginSummary::from)
    }

    async fn plugins(&self) -> Vec<PluginSummary> {
        self.registry
            .read()
            .await
            .plugins_in_order()
            .map(PluginSummary::from)
            .collect()
    }

    async fn enabled_plugins(&self) -> Vec<PluginSummary> {
        self.registry
            .read()
            .await
            .plugins_in_order()
            .filter(|p| p.is_enabled())
            .map(PluginSummary::from)
            .collect()
    }

    async fn is_plugin_enabled(&self, key: &str) -> bool {
        self.registry.read().await.get(key).is_some_and(Plugin::is_enabled)
    }

    async fn is_plugin_module_enabled(&self, complete_key: &str) -> bool {
        self.registry
            .read()
            .await
            .module_descriptor(complete_key)
            .is_some_and(ModuleDescriptor::is_enabled)
    }

    async fn plugin_state(&self, key: &str) -> Option<PluginState> {
        self.registry.read().await.get(key).map(Plugin::state)
    }

    async fn module_descriptor(&self, complete_key: &str) -> Option<ModuleInfo> {
        self.registry
            .read()
            .await
            .module_descriptor(complete_key)
            .map(|m| m.info().clone())
    }

    async fn enabled_module_descriptors_by_type(&self, module_type: &str) -> Vec<ModuleInfo> {
        let mut infos = Vec::new();
        self.for_each_enabled_module(module_type, |m| infos.push(m.info().clone()))
            .await;
        infos
    }

    async fn dependent_plugins(&self, key: &str) -> Vec<String> {
        self.registry
            .read()
            .await
            .plugins_in_order()
            .filter(|p| p.dependencies().iter().any(|d| d.required && d.plugin_key == key))
            .map(|p| p.key().to_string())
            .collect()
    }
}

#[async_trait]
impl PluginController for DefaultPluginManager {
    async fn enable_plugins(&self, keys: &[String]) -> Result<()> {
        let mut ops = self.operations.lock().await;
        ensure_initialized(&ops)?;
        let mut events = Vec::new();
        let (saved, not_enabled) = {
            let mut registry = self.registry.write().await;
            for key in keys {
                let plugin = registry
                    .get(key)
                    .ok_or_else(|| PluginSystemError::PluginNotFound(key.clone()))?;
                if let Some(reason) = plugin.unloadable_reason() {
                    return Err(PluginSystemError::IllegalState(format!(
                        "Plugin '{}' is unloadable: {}",
                        key, reason
                    ))
                    .into());
                }
            }
            let plan = resolve_enable_order(&registry, keys);
            if let Some((_, e)) = plan.failures.into_iter().next() {
                return Err(PluginSystemError::from(e).into());
            }
            let enabled = self
                .enable_in_order(&mut registry, &ops.persistent, &plan.order, &mut events)
                .await;
            let mut next = ops.persistent.clone();
            for key in &enabled {
                if let Some(plugin) = registry.get(key) {
                    next.set_enabled(key, true, plugin.is_enabled_by_default());
                }
            }
            let saved = self.commit(&mut ops, next);
            let not_enabled = keys.iter().find(|k| !enabled.contains(*k)).map(|k| {
                let reason = registry
                    .get(k)
                    .and_then(Plugin::unloadable_reason)
                    .unwrap_or("a required plugin is not enabled")
                    .to_string();
                (k.clone(), reason)
            });
            (saved, not_enabled)
        };
        drop(ops);
        self.publish(events).await;
        saved?;
        match not_enabled {
            Some((key, reason)) => Err(PluginSystemError::IllegalState(format!(
                "Plugin '{}' could not be enabled: {}",
                key, reason
            ))
            .into()),
            None => Ok(()),
        }
    }

    async fn disable_plugin(&self, key: &str) -> Result<()> {
        self.disable(key, true).await
    }

    async fn disable_plugin_without_persisting(&self, key: &str) -> Result<()> {
        self.disable(key, false).await
    }

    async fn enable_plugin_module(&self, complete_key: &str) -> Result<()> {
        self.set_module_enabled(complete_key, true).await
    }

    async fn disable_plugin_module(&self, complete_key: &str) -> Result<()> {
        self.set_module_enabled(complete_key, false).await
    }

    async fn install_plugins(&self, artifacts: Vec<Arc<dyn PluginArtifact>>) -> Result<Vec<String>> {
        let ops = self.operations.lock().await;
        ensure_initialized(&ops)?;
        let installer = self
            .installer
            .clone()
            .ok_or_else(|| PluginSystemError::Unsupported("No plugin installer is configured".to_string()))?;

        let keys = self.validate_install(&artifacts).await?;
        let installed = self.write_artifacts(installer.as_ref(), &artifacts, &keys).await?;
        self.remove_superseded(&keys, &installed).await;

        let mut events = Vec::new();
        let scanned = self.scan(&ops, &mut events).await;
        let missing: Vec<(&String, &PathBuf)> = {
            let registry = self.registry.read().await;
            keys.iter()
                .zip(&installed)
                .filter(|(k, _)| !registry.contains(k))
                .collect()
        };
        for (key, path) in &missing {
            warn!("Installed plugin '{}' was not picked up by any loader, removing {}", key, path.display());
            if let Err(e) = tokio::fs::remove_file(path).await {
                error!("Failed to remove {}: {}", path.display(), e);
            }
        }
        drop(ops);
        self.publish(events).await;
        scanned?;

        if let Some((key, path)) = missing.first() {
            return Err(PluginSystemError::InstallError {
                artifact: path.display().to_string(),
                message: format!("Plugin '{}' was not picked up by any loader", key),
            }
            .into());
        }
        info!("Installed {} plugin(s)", keys.len());
        Ok(keys)
    }

    async fn uninstall(&self, key: &str) -> Result<()> {
        let mut ops = self.operations.lock().await;
        ensure_initialized(&ops)?;
        let mut events = Vec::new();
        let saved = {
            let mut registry = self.registry.write().await;
            let plugin = registry
                .get(key)
                .ok_or_else(|| PluginSystemError::PluginNotFound(key.to_string()))?;
            if !plugin.is_uninstallable() {
                return Err(PluginSystemError::Unsupported(format!("Plugin '{}' cannot be uninstalled", key)).into());
            }
            let loader = registry
                .loader_index(key)
                .and_then(|i| self.loaders.get(i))
                .filter(|l| l.supports_removal())
                .cloned()
                .ok_or_else(|| {
                    PluginSystemError::Unsupported(format!(
                        "Plugin '{}' was not loaded by a loader that can remove it",
                        key
                    ))
                })?;

            // Nothing has changed yet if the artifact cannot be removed
            loader.remove_plugin(plugin).await?;
            self.discard(&mut registry, key, &mut events);
            events.push(PluginEvent::Uninstalled {
                plugin_key: key.to_string(),
            });
            let mut next = ops.persistent.clone();
            next.remove_plugin(key);
            self.commit(&mut ops, next)
        };
        drop(ops);
        info!("Uninstalled plugin '{}'", key);
        self.publish(events).await;
        saved
    }

    async fn scan_for_new_plugins(&self) -> Result<usize> {
        let ops = self.operations.lock().await;
        ensure_initialized(&ops)?;
        let mut events = Vec::new();
        let found = self.scan(&ops, &mut events).await?;
        drop(ops);
        self.publish(events).await;
        if found > 0 {
            info!("Scan found {} new or changed plugin(s)", found);
        }
        Ok(found)
    }
}

#[async_trait]
impl PluginLifecycle for DefaultPluginManager {
    async fn init(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut ops = self.operations.lock().await;
            if ops.initialized {
                return Err(PluginSystemError::IllegalState("Plugin manager is already initialised".to_string()).into());
            }
            ops.persistent = self.store.load()?;
            ops.initialized = true;
        }

        info!("Plugin framework starting");
        let report = self.event_manager.dispatch(&FrameworkEvent::Starting).await;
        if let Some(failure) = report.into_first_failure() {
            self.operations.lock().await.initialized = false;
            return Err(Error::KernelLifecycleError {
                phase: KernelLifecyclePhase::Initialize,
                component_name: Some(self.name.to_string()),
                message: "Framework start was aborted by a starting handler".to_string(),
                source: Some(Box::new(failure.into())),
            });
        }

        let events = {
            let mut ops = self.operations.lock().await;
            match self.load_all(&ops).await {
                Ok(events) => events,
                Err(e) => {
                    ops.initialized = false;
                    return Err(e);
                }
            }
        };
        self.publish(events).await;
        self.publish_framework(FrameworkEvent::Started).await;
        info!("Plugin framework started");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        ensure_initialized(&*self.operations.lock().await)?;
        info!("Plugin framework shutting down");
        self.publish_framework(FrameworkEvent::ShuttingDown).await;

        let mut events = Vec::new();
        {
            let mut ops = self.operations.lock().await;
            let mut registry = self.registry.write().await;
            for key in registry.keys_in_order().iter().rev() {
                if let Some(plugin) = registry.get_mut(key) {
                    self.disable_one(plugin, &mut events);
                }
            }
            for mut plugin in registry.drain() {
                plugin.close();
            }
            ops.initialized = false;
        }
        self.publish(events).await;
        self.publish_framework(FrameworkEvent::Shutdown).await;
        info!("Plugin framework shut down");
        Ok(())
    }

    async fn warm_restart(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        ensure_initialized(&*self.operations.lock().await)?;
        info!("Plugin framework warm restarting");
        self.publish_framework(FrameworkEvent::WarmRestarting).await;

        let mut events = Vec::new();
        {
            let ops = self.operations.lock().await;
            ensure_initialized(&ops)?;
            let mut registry = self.registry.write().await;
            let enabled: Vec<String> = registry
                .plugins_in_order()
                .filter(|p| p.is_enabled())
                .map(|p| p.key().to_string())
                .collect();
            for key in enabled.iter().rev() {
                if let Some(plugin) = registry.get_mut(key) {
                    self.disable_one(plugin, &mut events);
                }
            }
            let plan = resolve_enable_order(&registry, &enabled);
            self.enable_in_order(&mut registry, &ops.persistent, &plan.order, &mut events)
                .await;
        }
        self.publish(events).await;
        self.publish_framework(FrameworkEvent::WarmRestarted).await;
        info!("Plugin framework warm restarted");
        Ok(())
    }
}
