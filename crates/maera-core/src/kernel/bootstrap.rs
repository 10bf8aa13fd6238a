//! # Framework bootstrap
//!
//! [`PluginFramework`] turns a [`FrameworkConfig`] into a wired set of kernel
//! components and drives them through their lifecycle. Components are kept
//! in a [`DependencyRegistry`] and started in registration order: event
//! manager, bundle container (when enabled), plugin manager, hot deployer.
//! Shutdown walks the same list backwards.
use std::sync::Arc;

use log::{error, info};
use tokio::sync::Mutex;

use crate::container::ContainerManager;
use crate::container::scanner::ManifestPackageSource;
use crate::event::{DefaultEventManager, EventManager};
use crate::kernel::component::{DependencyRegistry, KernelComponent};
use crate::kernel::constants;
use crate::kernel::error::{Error, KernelLifecyclePhase, Result};
use crate::plugin_system::factory::default_plugin_factories;
use crate::plugin_system::installer::FilePluginInstaller;
use crate::plugin_system::loader::bundled::BundledPluginLoader;
use crate::plugin_system::loader::directory::DirectoryPluginLoader;
use crate::plugin_system::{
    DefaultPluginManager, HotDeployer, ModuleDescriptorFactory, PluginAccessor, PluginController,
};
use crate::storage::{FilePluginStateStore, FrameworkConfig, PluginStateStore};

/// The assembled plugin framework
#[derive(Debug)]
pub struct PluginFramework {
    config: FrameworkConfig,
    dependencies: DependencyRegistry,
    events: Arc<DefaultEventManager>,
    modules: Arc<ModuleDescriptorFactory>,
    plugins: Arc<DefaultPluginManager>,
    container: Option<Arc<ContainerManager>>,
    hot_deployer: Arc<HotDeployer>,
    running: Mutex<bool>,
}

impl PluginFramework {
    /// Builds every component from `config`. Nothing is loaded until [`start`](Self::start).
    pub fn new(config: FrameworkConfig) -> Result<Self> {
        Self::with_module_factory(config, Arc::new(ModuleDescriptorFactory::new()))
    }

    /// Like [`new`](Self::new), with module types already registered on `modules`.
    pub fn with_module_factory(config: FrameworkConfig, modules: Arc<ModuleDescriptorFactory>) -> Result<Self> {
        info!("Initializing {} v{}", constants::APP_NAME, constants::APP_VERSION);
        config.validate()?;

        if !config.permitted_module_types.is_empty() {
            modules.set_permitted_module_types(config.permitted_module_types.iter());
        }

        let store: Arc<dyn PluginStateStore> = Arc::new(FilePluginStateStore::new(&config.state_file_path())?);
        let events = Arc::new(DefaultEventManager::new());
        let event_manager: Arc<dyn EventManager> = events.clone();

        let factories = default_plugin_factories(&config.descriptor_file_name);
        let mut builder = DefaultPluginManager::builder(store, modules.clone(), event_manager.clone())
            .plugin_factories(factories.clone())
            .installer(Arc::new(FilePluginInstaller::new(&config.plugin_directory)));

        // Bundled plugins load first so directory plugins can depend on them
        if let (Some(zip), Some(directory)) = (&config.bundled_plugins_zip, &config.bundled_plugins_directory) {
            builder = builder.loader(Arc::new(BundledPluginLoader::new(zip, directory, factories.clone())));
        }
        builder = builder.loader(Arc::new(DirectoryPluginLoader::new(&config.plugin_directory, factories)));

        let container = if config.container.enabled {
            let mut container =
                ContainerManager::new(config.container.clone(), config.cache_directory(), event_manager)?;
            if let Some(host_packages) = &config.container.host_package_directory {
                container = container.with_package_source(Arc::new(ManifestPackageSource::new(host_packages)));
            }
            let container = Arc::new(container);
            builder = builder.container(container.clone());
            Some(container)
        } else {
            None
        };

        let plugins = Arc::new(builder.build());
        let controller: Arc<dyn PluginController> = plugins.clone();
        let hot_deployer = Arc::new(HotDeployer::new(controller, config.hot_deploy_period()));

        let mut dependencies = DependencyRegistry::new();
        dependencies.register_instance(events.clone());
        if let Some(container) = &container {
            dependencies.register_instance(container.clone());
        }
        dependencies.register_instance(plugins.clone());
        dependencies.register_instance(hot_deployer.clone());

        Ok(Self {
            config,
            dependencies,
            events,
            modules,
            plugins,
            container,
            hot_deployer,
            running: Mutex::new(false),
        })
    }

    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    pub fn plugin_manager(&self) -> &Arc<DefaultPluginManager> {
        &self.plugins
    }

    /// Read-only view of the plugin manager
    pub fn accessor(&self) -> Arc<dyn PluginAccessor> {
        self.plugins.clone()
    }

    pub fn event_manager(&self) -> &Arc<DefaultEventManager> {
        &self.events
    }

    pub fn module_descriptor_factory(&self) -> &Arc<ModuleDescriptorFactory> {
        &self.modules
    }

    pub fn container(&self) -> Option<&Arc<ContainerManager>> {
        self.container.as_ref()
    }

    pub fn hot_deployer(&self) -> &Arc<HotDeployer> {
        &self.hot_deployer
    }

    /// Gets a component by its concrete type.
    pub fn component<T: KernelComponent + 'static>(&self) -> Option<Arc<T>> {
        self.dependencies.get_concrete::<T>()
    }

    pub async fn is_running(&self) -> bool {
        *self.running.lock().await
    }

    /// Initializes then starts every component. Starting the plugin manager
    /// loads and enables plugins.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if *running {
            return Err(Error::lifecycle(KernelLifecyclePhase::Start, "Framework is already running"));
        }
        let components = self.dependencies.components_in_order();

        for component in &components {
            info!("Initializing component: {}", component.name());
            component
                .initialize()
                .await
                .map_err(|e| wrap(KernelLifecyclePhase::Initialize, component.as_ref(), e))?;
        }
        // Registered per start; stopping the event manager drops them
        if let Some(container) = &self.container {
            container.register_listeners().await;
        }

        for (index, component) in components.iter().enumerate() {
            info!("Starting component: {}", component.name());
            if let Err(e) = component.start().await {
                error!("Component {} failed to start: {}", component.name(), e);
                // Unwind whatever already started
                for started in components[..index].iter().rev() {
                    if let Err(stop_err) = started.stop().await {
                        error!("Error stopping component {}: {}", started.name(), stop_err);
                    }
                }
                return Err(wrap(KernelLifecyclePhase::Start, component.as_ref(), e));
            }
        }

        *running = true;
        info!("{} started", constants::APP_NAME);
        Ok(())
    }

    /// Stops every component in reverse order. All components are stopped
    /// even when one fails; the first failure is returned.
    pub async fn shutdown(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if !*running {
            return Ok(());
        }
        let mut first_error = None;
        for component in self.dependencies.components_in_order().iter().rev() {
            info!("Stopping component: {}", component.name());
            if let Err(e) = component.stop().await {
                error!("Error stopping component {}: {}", component.name(), e);
                if first_error.is_none() {
                    first_error = Some(wrap(KernelLifecyclePhase::Shutdown, component.as_ref(), e));
                }
            }
        }
        *running = false;
        info!("{} stopped", constants::APP_NAME);
        first_error.map_or(Ok(()), Err)
    }
}

fn wrap(phase: KernelLifecyclePhase, component: &dyn KernelComponent, source: Error) -> Error {
    Error::KernelLifecycleError {
        message: format!("Component {} failed: {}", component.name(), source),
        phase,
        component_name: Some(component.name().to_string()),
        source: Some(Box::new(source)),
    }
}
