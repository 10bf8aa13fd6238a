//! The seam between the container manager and a bundle framework.
//!
//! A [`Framework`] hosts bundles: it installs them, resolves their package
//! imports against the host exports and other bundles, starts and stops
//! them, and keeps a service registry shared with the host. Frameworks are
//! created by a [`FrameworkFactory`] chosen through a bootstrap resource.
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::container::embedded::EmbeddedFrameworkFactory;
use crate::container::error::{ContainerError, ContainerResult};
use crate::container::manifest::BundleManifest;

pub type BundleId = u64;

/// Bundle lifecycle as seen by the framework
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BundleState {
    Installed,
    Resolved,
    Starting,
    Active,
    Stopping,
    Uninstalled,
}

#[derive(Debug, Clone)]
pub struct BundleInfo {
    pub id: BundleId,
    pub location: String,
    pub symbolic_name: String,
    pub version: String,
    pub state: BundleState,
    pub manifest: BundleManifest,
}

impl BundleInfo {
    /// Plugin key from the manifest, if this bundle backs a plugin
    pub fn plugin_key(&self) -> Option<&str> {
        self.manifest.plugin_key()
    }

    pub fn is_fragment(&self) -> bool {
        self.manifest.is_fragment()
    }
}

/// Framework-level notifications delivered to listeners, possibly from a
/// framework-owned thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameworkNotification {
    Started,
    Stopped,
    /// A package refresh requested through [`Framework::refresh_packages`] completed
    PackagesRefreshed,
    BundleInstalled(BundleId),
    BundleStarted(BundleId),
    BundleStopped(BundleId),
    BundleUninstalled(BundleId),
    Error(String),
}

pub type FrameworkListener = Arc<dyn Fn(&FrameworkNotification) + Send + Sync>;

/// What a framework implementation supports. The container needs both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameworkCapabilities {
    pub package_refresh: bool,
    pub service_registry: bool,
}

/// Settings handed to [`Framework::init`]
#[derive(Debug, Clone, Default)]
pub struct FrameworkConfiguration {
    /// Packages the host exports, as an `Export-Package` value
    pub system_packages: String,
    /// Where the framework may keep installed bundles
    pub storage_directory: PathBuf,
    pub properties: BTreeMap<String, String>,
}

pub type ServiceObject = Arc<dyn Any + Send + Sync>;

/// A registered service
#[derive(Clone)]
pub struct ServiceReference {
    pub id: u64,
    pub interface: String,
    /// Owning bundle; `None` for services the host registered
    pub bundle: Option<BundleId>,
    pub properties: BTreeMap<String, String>,
    pub service: ServiceObject,
}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("id", &self.id)
            .field("interface", &self.interface)
            .field("bundle", &self.bundle)
            .field("properties", &self.properties)
            .finish()
    }
}

impl ServiceReference {
    /// The service object as `T`, if it is one
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.service.clone().downcast::<T>().ok()
    }
}

pub trait Framework: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn version(&self) -> semver::Version;

    fn capabilities(&self) -> FrameworkCapabilities;

    fn init(&self, config: &FrameworkConfiguration) -> ContainerResult<()>;

    /// May block; the container calls it from a blocking task.
    fn start(&self) -> ContainerResult<()>;

    /// Stops the framework, waiting at most `wait`. Returns `false` when
    /// shutdown did not complete in time.
    fn stop(&self, wait: Duration) -> ContainerResult<bool>;

    fn add_listener(&self, listener: FrameworkListener);

    fn install_bundle(&self, location: &str, bytes: Vec<u8>) -> ContainerResult<BundleInfo>;

    fn start_bundle(&self, id: BundleId) -> ContainerResult<()>;

    fn stop_bundle(&self, id: BundleId) -> ContainerResult<()>;

    fn uninstall_bundle(&self, id: BundleId) -> ContainerResult<()>;

    fn bundles(&self) -> Vec<BundleInfo>;

    /// Starts an asynchronous re-resolution of all bundles. Completion is
    /// signalled with [`FrameworkNotification::PackagesRefreshed`].
    fn refresh_packages(&self) -> ContainerResult<()>;

    fn register_service(
        &self,
        interface: &str,
        service: ServiceObject,
        properties: BTreeMap<String, String>,
        bundle: Option<BundleId>,
    ) -> ContainerResult<u64>;

    fn unregister_service(&self, id: u64) -> ContainerResult<()>;

    fn services(&self, interface: &str) -> Vec<ServiceReference>;
}

pub trait FrameworkFactory: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn create(&self) -> ContainerResult<Arc<dyn Framework>>;
}

/// Bootstrap resource naming the default framework factory
pub const DEFAULT_FRAMEWORK_BOOTSTRAP: &str = include_str!("../../resources/framework-factory.txt");

/// Factory name from a bootstrap resource: the first line that is neither
/// blank nor a `#` comment.
pub fn bootstrap_factory_name(resource: &str) -> ContainerResult<&str> {
    resource
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .ok_or_else(|| ContainerError::InvalidBootstrap("no factory name found".to_string()))
}

/// Framework factories by name
#[derive(Debug, Default)]
pub struct FrameworkFactories {
    factories: HashMap<String, Arc<dyn FrameworkFactory>>,
}

impl FrameworkFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in embedded framework
    pub fn with_defaults() -> Self {
        let mut factories = Self::new();
        factories.register(Arc::new(EmbeddedFrameworkFactory));
        factories
    }

    pub fn register(&mut self, factory: Arc<dyn FrameworkFactory>) {
        self.factories.insert(factory.name().to_string(), factory);
    }

    pub fn get(&self, name: &str) -> ContainerResult<Arc<dyn FrameworkFactory>> {
        self.factories
            .get(name)
            .cloned()
            .ok_or_else(|| ContainerError::FactoryNotFound(name.to_string()))
    }

    /// Resolves the factory a bootstrap resource names.
    pub fn from_bootstrap(&self, resource: &str) -> ContainerResult<Arc<dyn FrameworkFactory>> {
        self.get(bootstrap_factory_name(resource)?)
    }
}
