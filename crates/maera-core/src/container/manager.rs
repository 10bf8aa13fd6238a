use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::{Mutex, OnceCell, watch};

use crate::container::cache::BundleCache;
use crate::container::error::{ContainerError, ContainerResult};
use crate::container::exports::{PackageFilter, compute_exports, export_string, runtime_packages, DEFAULT_RUNTIME_PACKAGES};
use crate::container::framework::{
    BundleId, BundleInfo, Framework, FrameworkConfiguration, FrameworkFactories, FrameworkFactory,
    FrameworkNotification, DEFAULT_FRAMEWORK_BOOTSTRAP,
};
use crate::container::host::{HostComponentProvider, HostComponentRegistrar, HostComponentRegistration};
use crate::container::manifest::BundleManifest;
use crate::container::scanner::PackageSource;
use crate::container::tracker::{ServiceTracker, TrackerSet};
use crate::event::error::EventSystemError;
use crate::event::{AsyncEventHandler, ContainerEvent, Event, EventManager, FrameworkEvent, HandlerResult, PluginEvent};
use crate::kernel::component::KernelComponent;
use crate::kernel::error::Result;
use crate::storage::config::ContainerConfig;
use crate::utils::fs::{extract_zip_if_changed, find_files_with_extension};

/// Interface name the event manager is published under
pub const EVENT_MANAGER_SERVICE: &str = "maera.event.EventManager";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerState::Stopped => "stopped",
            ContainerState::Starting => "starting",
            ContainerState::Running => "running",
            ContainerState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Owns the bundle framework: computes host exports, starts and stops the
/// framework and mediates bundle installation and package refreshes.
///
/// Start, stop and destroy are serialized by one lifecycle lock. The export
/// string is computed on first start and kept for the life of the manager.
pub struct ContainerManager {
    config: ContainerConfig,
    cache: BundleCache,
    factory: Arc<dyn FrameworkFactory>,
    event_manager: Arc<dyn EventManager>,
    package_sources: Vec<Arc<dyn PackageSource>>,
    host_providers: Vec<Arc<dyn HostComponentProvider>>,
    runtime_packages: String,
    start_timeout: Duration,
    stop_timeout: Duration,
    refresh_timeout: Duration,

    lifecycle: Mutex<()>,
    state: RwLock<ContainerState>,
    framework: RwLock<Option<Arc<dyn Framework>>>,
    exports: OnceCell<String>,
    trackers: Arc<TrackerSet>,
    // Bumped on every PackagesRefreshed notification
    refreshed: Arc<watch::Sender<u64>>,
}

impl fmt::Debug for ContainerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerManager")
            .field("state", &self.state())
            .field("factory", &self.factory.name())
            .field("cache", &self.cache.directory())
            .finish()
    }
}

impl ContainerManager {
    /// Manager using the framework named by the default bootstrap resource.
    pub fn new(
        config: ContainerConfig,
        cache_directory: impl Into<PathBuf>,
        event_manager: Arc<dyn EventManager>,
    ) -> ContainerResult<Self> {
        let factory = FrameworkFactories::with_defaults().from_bootstrap(DEFAULT_FRAMEWORK_BOOTSTRAP)?;
        Ok(Self::with_factory(config, cache_directory, event_manager, factory))
    }

    pub fn with_factory(
        config: ContainerConfig,
        cache_directory: impl Into<PathBuf>,
        event_manager: Arc<dyn EventManager>,
        factory: Arc<dyn FrameworkFactory>,
    ) -> Self {
        let (refreshed, _) = watch::channel(0u64);
        Self {
            start_timeout: config.start_timeout(),
            stop_timeout: config.stop_timeout(),
            refresh_timeout: config.refresh_timeout(),
            config,
            cache: BundleCache::new(cache_directory),
            factory,
            event_manager,
            package_sources: Vec::new(),
            host_providers: Vec::new(),
            runtime_packages: DEFAULT_RUNTIME_PACKAGES.to_string(),
            lifecycle: Mutex::new(()),
            state: RwLock::new(ContainerState::Stopped),
            framework: RwLock::new(None),
            exports: OnceCell::new(),
            trackers: TrackerSet::new(),
            refreshed: Arc::new(refreshed),
        }
    }

    pub fn with_package_source(mut self, source: Arc<dyn PackageSource>) -> Self {
        self.package_sources.push(source);
        self
    }

    pub fn with_host_component_provider(mut self, provider: Arc<dyn HostComponentProvider>) -> Self {
        self.host_providers.push(provider);
        self
    }

    /// Replaces the runtime package list resource
    pub fn with_runtime_packages(mut self, list: impl Into<String>) -> Self {
        self.runtime_packages = list.into();
        self
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn state(&self) -> ContainerState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ContainerState) {
        debug!("Container {} -> {}", self.state(), state);
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn is_running(&self) -> bool {
        self.state() == ContainerState::Running
    }

    /// Export string computed by the first start, if it happened
    pub fn export_string(&self) -> Option<String> {
        self.exports.get().cloned()
    }

    pub fn tracker_count(&self) -> usize {
        self.trackers.len()
    }

    fn running_framework(&self) -> ContainerResult<Arc<dyn Framework>> {
        let state = self.state();
        if state != ContainerState::Running {
            return Err(ContainerError::NotRunning { state: state.to_string() });
        }
        self.framework
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ContainerError::NotRunning { state: state.to_string() })
    }

    fn host_components(&self) -> HostComponentRegistrar {
        let mut registrar = HostComponentRegistrar::new();
        registrar.register(
            HostComponentRegistration::new("eventManager", Arc::new(self.event_manager.clone()))
                .with_interface(EVENT_MANAGER_SERVICE)
                .with_package("maera.event"),
        );
        for provider in &self.host_providers {
            provider.provide(&mut registrar);
        }
        registrar
    }

    fn compute_export_string(&self, registrar: &HostComponentRegistrar) -> ContainerResult<String> {
        let runtime_version = semver::Version::parse(&self.config.runtime_version).map_err(|e| {
            ContainerError::InvalidRuntimePackages(format!(
                "runtime version '{}': {}",
                self.config.runtime_version, e
            ))
        })?;
        let filter = PackageFilter::new(&self.config.package_scanner)?;
        let runtime = runtime_packages(&self.runtime_packages, &runtime_version)?;
        let exports = compute_exports(&filter, runtime, &self.package_sources, &registrar.packages())?;
        Ok(export_string(&exports))
    }

    fn check_framework(&self, framework: &dyn Framework) -> ContainerResult<()> {
        let capabilities = framework.capabilities();
        if !capabilities.package_refresh || !capabilities.service_registry {
            return Err(ContainerError::UnsupportedFramework {
                framework: framework.name().to_string(),
                reason: "package refresh and a service registry are required".to_string(),
            });
        }
        let version = framework.version();
        for broken in &self.config.broken_framework_versions {
            let req = semver::VersionReq::parse(broken).map_err(|e| ContainerError::UnsupportedFramework {
                framework: framework.name().to_string(),
                reason: format!("invalid broken version requirement '{}': {}", broken, e),
            })?;
            if req.matches(&version) {
                return Err(ContainerError::UnsupportedFramework {
                    framework: framework.name().to_string(),
                    reason: format!("version {} is known to be broken ({})", version, broken),
                });
            }
        }
        Ok(())
    }

    /// Starts the framework. Does nothing when already running.
    pub async fn start(&self) -> ContainerResult<()> {
        let guard = self.lifecycle.lock().await;
        if self.state() == ContainerState::Running {
            return Ok(());
        }
        self.set_state(ContainerState::Starting);
        match self.start_framework().await {
            Ok(framework) => {
                *self.framework.write().unwrap_or_else(|e| e.into_inner()) = Some(framework);
                self.set_state(ContainerState::Running);
            }
            Err(e) => {
                error!("Bundle container failed to start: {}", e);
                self.set_state(ContainerState::Stopped);
                return Err(e);
            }
        }
        drop(guard);

        info!("Bundle container started");
        let report = self.event_manager.dispatch(&ContainerEvent::Started).await;
        for failure in report.failures {
            warn!("Listener failed on container start: {}", failure);
        }
        Ok(())
    }

    async fn start_framework(&self) -> ContainerResult<Arc<dyn Framework>> {
        let registrar = self.host_components();
        let exports = self
            .exports
            .get_or_try_init(|| async { self.compute_export_string(&registrar) })
            .await?
            .clone();

        let framework = self.factory.create()?;
        self.check_framework(framework.as_ref())?;
        self.cache.validate(&exports)?;
        framework.init(&FrameworkConfiguration {
            system_packages: exports,
            storage_directory: self.cache.directory().join("store"),
            properties: BTreeMap::new(),
        })?;

        let refreshed = Arc::downgrade(&self.refreshed);
        framework.add_listener(Arc::new(move |notification: &FrameworkNotification| {
            if *notification == FrameworkNotification::PackagesRefreshed {
                if let Some(sender) = refreshed.upgrade() {
                    sender.send_modify(|generation| *generation += 1);
                }
            }
        }));

        let starting = framework.clone();
        let seconds = self.start_timeout.as_secs();
        match tokio::time::timeout(self.start_timeout, tokio::task::spawn_blocking(move || starting.start())).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join)) => return Err(ContainerError::FrameworkFailure(format!("start task failed: {}", join))),
            Err(_) => return Err(ContainerError::StartTimeout { seconds }),
        }

        for registration in registrar.registrations() {
            for interface in &registration.interfaces {
                framework.register_service(
                    interface,
                    registration.instance.clone(),
                    registration.properties.clone(),
                    None,
                )?;
            }
        }

        if let Some(zip) = &self.config.framework_bundles_zip {
            self.install_framework_bundles(framework.as_ref(), zip)?;
        }
        Ok(framework)
    }

    fn install_framework_bundles(&self, framework: &dyn Framework, zip: &Path) -> ContainerResult<()> {
        let dir = self.cache.directory().join("framework-bundles");
        extract_zip_if_changed(zip, &dir).map_err(|e| ContainerError::io(e, "extract_framework_bundles", zip.to_path_buf()))?;
        let jars = find_files_with_extension(&dir, "jar")
            .map_err(|e| ContainerError::io(e, "list_framework_bundles", dir.clone()))?;

        let mut installed = Vec::new();
        for jar in jars.iter().filter(|j| j.parent() == Some(dir.as_path())) {
            let bytes = std::fs::read(jar).map_err(|e| ContainerError::io(e, "read_bundle", jar.clone()))?;
            installed.push(framework.install_bundle(&jar.display().to_string(), bytes)?);
        }
        for bundle in installed.iter().filter(|b| !b.is_fragment()) {
            framework.start_bundle(bundle.id)?;
        }
        info!("Installed {} framework bundle(s)", installed.len());
        Ok(())
    }

    /// Stops the framework, waiting at most the stop timeout.
    ///
    /// Failures are logged, not returned; [`ContainerEvent::Stopped`] is
    /// published whenever a running container was asked to stop.
    pub async fn stop(&self) {
        let guard = self.lifecycle.lock().await;
        if self.state() != ContainerState::Running {
            return;
        }
        self.set_state(ContainerState::Stopping);
        self.trackers.close_all();
        let framework = self.framework.write().unwrap_or_else(|e| e.into_inner()).take();

        if let Some(framework) = framework {
            let wait = self.stop_timeout;
            let stopping = tokio::task::spawn_blocking(move || framework.stop(wait));
            match tokio::time::timeout(wait + Duration::from_secs(1), stopping).await {
                Ok(Ok(Ok(true))) => info!("Bundle container stopped"),
                Ok(Ok(Ok(false))) => warn!("Framework did not finish stopping within {:?}", wait),
                Ok(Ok(Err(e))) => error!("Framework failed to stop: {}", e),
                Ok(Err(join)) => error!("Framework stop task failed: {}", join),
                Err(_) => warn!("Gave up waiting for the framework to stop after {:?}", wait),
            }
        }
        self.set_state(ContainerState::Stopped);
        drop(guard);

        let report = self.event_manager.dispatch(&ContainerEvent::Stopped).await;
        for failure in report.failures {
            warn!("Listener failed on container stop: {}", failure);
        }
    }

    /// Stops the container if needed and releases trackers. Safe to repeat.
    pub async fn destroy(&self) {
        self.stop().await;
        self.trackers.close_all();
    }

    /// Installs a bundle from a jar on disk.
    pub async fn install_bundle(&self, path: &Path) -> ContainerResult<BundleInfo> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ContainerError::io(e, "read_bundle", path.to_path_buf()))?;
        self.install_bundle_bytes(&path.display().to_string(), bytes).await
    }

    /// Installs a bundle, replacing any bundle with the same plugin key,
    /// then refreshes packages.
    pub async fn install_bundle_bytes(&self, location: &str, bytes: Vec<u8>) -> ContainerResult<BundleInfo> {
        let framework = self.running_framework()?;
        let manifest = BundleManifest::from_jar_bytes(&bytes, location)?.ok_or_else(|| ContainerError::InvalidBundle {
            location: location.to_string(),
            message: "no META-INF/MANIFEST.MF".to_string(),
        })?;
        if let Some(key) = manifest.plugin_key() {
            for old in framework.bundles().into_iter().filter(|b| b.plugin_key() == Some(key)) {
                info!("Uninstalling bundle {} ({}) before reinstalling '{}'", old.symbolic_name, old.id, key);
                framework.uninstall_bundle(old.id)?;
            }
        }
        let info = framework.install_bundle(location, bytes)?;
        self.refresh_packages().await?;
        Ok(info)
    }

    pub fn start_bundle(&self, id: BundleId) -> ContainerResult<()> {
        self.running_framework()?.start_bundle(id)
    }

    pub fn stop_bundle(&self, id: BundleId) -> ContainerResult<()> {
        self.running_framework()?.stop_bundle(id)
    }

    /// Uninstalls every bundle carrying `plugin_key`; returns how many.
    pub fn uninstall_bundle_for_plugin(&self, plugin_key: &str) -> ContainerResult<usize> {
        let framework = self.running_framework()?;
        let mut count = 0;
        for bundle in framework.bundles().into_iter().filter(|b| b.plugin_key() == Some(plugin_key)) {
            framework.uninstall_bundle(bundle.id)?;
            count += 1;
        }
        Ok(count)
    }

    /// Installed bundles; empty while the container is not running
    pub fn bundles(&self) -> Vec<BundleInfo> {
        self.running_framework().map(|f| f.bundles()).unwrap_or_default()
    }

    /// Requests a package refresh and waits for it to complete.
    ///
    /// Returns `Ok(false)` when the framework did not report completion
    /// within the refresh timeout; the caller carries on regardless.
    pub async fn refresh_packages(&self) -> ContainerResult<bool> {
        let framework = self.running_framework()?;
        let mut generation = self.refreshed.subscribe();
        let seen = *generation.borrow_and_update();
        framework.refresh_packages()?;

        let wait = async {
            while generation.changed().await.is_ok() {
                if *generation.borrow_and_update() != seen {
                    return true;
                }
            }
            false
        };
        match tokio::time::timeout(self.refresh_timeout, wait).await {
            Ok(done) => Ok(done),
            Err(_) => {
                warn!("Package refresh did not complete within {:?}, continuing", self.refresh_timeout);
                Ok(false)
            }
        }
    }

    /// Tracker over the services registered under `interface`.
    pub fn service_tracker(&self, interface: &str) -> ContainerResult<ServiceTracker> {
        let framework = self.running_framework()?;
        Ok(self.trackers.open(interface, framework))
    }

    /// Subscribes the container to framework and plugin events: it starts
    /// on framework start, stops on framework shutdown and refreshes
    /// packages when a plugin is uninstalled.
    pub async fn register_listeners(self: &Arc<Self>) {
        let handler = Arc::new(ContainerEventBridge {
            container: Arc::downgrade(self),
        });
        for name in [FrameworkEvent::STARTING, FrameworkEvent::SHUTDOWN, PluginEvent::UNINSTALLED] {
            self.event_manager.register_handler(name, handler.clone()).await;
        }
    }
}

struct ContainerEventBridge {
    container: Weak<ContainerManager>,
}

#[async_trait]
impl AsyncEventHandler for ContainerEventBridge {
    async fn handle(&self, event: &dyn Event) -> HandlerResult {
        let Some(container) = self.container.upgrade() else {
            return Ok(());
        };
        if let Some(framework_event) = event.as_any().downcast_ref::<FrameworkEvent>() {
            match framework_event {
                FrameworkEvent::Starting => container
                    .start()
                    .await
                    .map_err(|e| EventSystemError::handler_failed(event.name(), e))?,
                FrameworkEvent::Shutdown => container.stop().await,
                _ => {}
            }
        } else if let Some(PluginEvent::Uninstalled { plugin_key }) = event.as_any().downcast_ref::<PluginEvent>() {
            if container.is_running() {
                debug!("Refreshing packages after '{}' was uninstalled", plugin_key);
                if let Err(e) = container.refresh_packages().await {
                    warn!("Package refresh after uninstall failed: {}", e);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl KernelComponent for ContainerManager {
    fn name(&self) -> &'static str {
        "ContainerManager"
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    // Started by the FrameworkStarting event
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.destroy().await;
        Ok(())
    }
}
