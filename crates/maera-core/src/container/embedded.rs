//! In-process bundle framework.
//!
//! Bundles are jar bytes with a manifest. Resolution checks that every
//! mandatory `Import-Package` is satisfied by the host exports or by another
//! installed bundle; nothing is executed. Package refresh runs on its own
//! thread and reports completion through the listeners.
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};

use crate::container::error::{ContainerError, ContainerResult};
use crate::container::framework::{
    BundleId, BundleInfo, BundleState, Framework, FrameworkCapabilities, FrameworkConfiguration,
    FrameworkFactory, FrameworkListener, FrameworkNotification, ServiceObject, ServiceReference,
};
use crate::container::manifest::{BundleManifest, PackageExport, split_clauses};

pub const EMBEDDED_FRAMEWORK_NAME: &str = "maera.embedded";

#[derive(Debug, Default)]
struct EmbeddedState {
    initialized: bool,
    running: bool,
    system_exports: Vec<PackageExport>,
    storage_directory: Option<PathBuf>,
    next_bundle_id: BundleId,
    bundles: BTreeMap<BundleId, BundleInfo>,
    next_service_id: u64,
    services: BTreeMap<u64, ServiceReference>,
}

impl EmbeddedState {
    fn bundle(&self, id: BundleId) -> ContainerResult<&BundleInfo> {
        self.bundles.get(&id).ok_or(ContainerError::BundleNotFound(id))
    }

    /// Package names visible to `id`: host exports plus other bundles' exports
    fn visible_packages(&self, id: BundleId) -> HashSet<String> {
        let mut packages: HashSet<String> = self.system_exports.iter().map(|e| e.name.clone()).collect();
        for (other, bundle) in &self.bundles {
            if *other != id {
                packages.extend(bundle.manifest.export_packages().into_iter().map(|e| e.name));
            }
        }
        packages
    }

    fn missing_imports(&self, id: BundleId) -> ContainerResult<Vec<String>> {
        let bundle = self.bundle(id)?;
        let visible = self.visible_packages(id);
        let own: HashSet<String> = bundle.manifest.export_packages().into_iter().map(|e| e.name).collect();
        Ok(bundle
            .manifest
            .import_packages()
            .into_iter()
            .filter(|i| !i.optional && !visible.contains(&i.name) && !own.contains(&i.name))
            .map(|i| i.name)
            .collect())
    }

    fn remove_services_of(&mut self, id: BundleId) {
        self.services.retain(|_, s| s.bundle != Some(id));
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<EmbeddedState>,
    listeners: Mutex<Vec<FrameworkListener>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, EmbeddedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Must be called without the state lock held
    fn notify(&self, notification: FrameworkNotification) {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner()).clone();
        for listener in listeners {
            listener(&notification);
        }
    }

    fn refresh(&self) {
        let mut stopped = Vec::new();
        {
            let mut state = self.state();
            let ids: Vec<BundleId> = state.bundles.keys().copied().collect();
            for id in ids {
                let Ok(missing) = state.missing_imports(id) else {
                    continue;
                };
                let Some(bundle) = state.bundles.get_mut(&id) else {
                    continue;
                };
                match (bundle.state, missing.is_empty()) {
                    (BundleState::Installed, true) => bundle.state = BundleState::Resolved,
                    (BundleState::Active, false) | (BundleState::Resolved, false) => {
                        warn!(
                            "Bundle {} lost package(s) {} during refresh",
                            bundle.symbolic_name,
                            missing.join(", ")
                        );
                        if bundle.state == BundleState::Active {
                            stopped.push(id);
                        }
                        bundle.state = BundleState::Installed;
                    }
                    _ => {}
                }
            }
            for id in &stopped {
                state.remove_services_of(*id);
            }
        }
        for id in stopped {
            self.notify(FrameworkNotification::BundleStopped(id));
        }
        self.notify(FrameworkNotification::PackagesRefreshed);
    }
}

/// The built-in framework
#[derive(Clone, Default)]
pub struct EmbeddedFramework {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for EmbeddedFramework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state();
        f.debug_struct("EmbeddedFramework")
            .field("running", &state.running)
            .field("bundles", &state.bundles.len())
            .field("services", &state.services.len())
            .finish()
    }
}

impl EmbeddedFramework {
    pub fn new() -> Self {
        Self::default()
    }

    fn running_state(&self) -> ContainerResult<MutexGuard<'_, EmbeddedState>> {
        let state = self.shared.state();
        if !state.running {
            return Err(ContainerError::NotRunning {
                state: "framework stopped".to_string(),
            });
        }
        Ok(state)
    }
}

impl Framework for EmbeddedFramework {
    fn name(&self) -> &str {
        EMBEDDED_FRAMEWORK_NAME
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(1, 0, 0)
    }

    fn capabilities(&self) -> FrameworkCapabilities {
        FrameworkCapabilities {
            package_refresh: true,
            service_registry: true,
        }
    }

    fn init(&self, config: &FrameworkConfiguration) -> ContainerResult<()> {
        let mut state = self.shared.state();
        state.system_exports = split_clauses(&config.system_packages)
            .iter()
            .filter_map(|c| PackageExport::parse(c))
            .collect();
        if !config.storage_directory.as_os_str().is_empty() {
            std::fs::create_dir_all(&config.storage_directory)
                .map_err(|e| ContainerError::io(e, "create_storage", config.storage_directory.clone()))?;
            state.storage_directory = Some(config.storage_directory.clone());
        }
        state.next_bundle_id = 1;
        state.initialized = true;
        debug!("Embedded framework initialised with {} host export(s)", state.system_exports.len());
        Ok(())
    }

    fn start(&self) -> ContainerResult<()> {
        {
            let mut state = self.shared.state();
            if !state.initialized {
                return Err(ContainerError::FrameworkFailure("framework was not initialised".to_string()));
            }
            state.running = true;
        }
        self.shared.notify(FrameworkNotification::Started);
        Ok(())
    }

    fn stop(&self, _wait: Duration) -> ContainerResult<bool> {
        {
            let mut state = self.shared.state();
            if !state.running {
                return Ok(true);
            }
            state.running = false;
            for bundle in state.bundles.values_mut() {
                if bundle.state == BundleState::Active {
                    bundle.state = BundleState::Resolved;
                }
            }
            state.services.clear();
        }
        self.shared.notify(FrameworkNotification::Stopped);
        Ok(true)
    }

    fn add_listener(&self, listener: FrameworkListener) {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    fn install_bundle(&self, location: &str, bytes: Vec<u8>) -> ContainerResult<BundleInfo> {
        let manifest = BundleManifest::from_jar_bytes(&bytes, location)?.ok_or_else(|| {
            ContainerError::InvalidBundle {
                location: location.to_string(),
                message: "no META-INF/MANIFEST.MF".to_string(),
            }
        })?;
        let symbolic_name = manifest
            .symbolic_name()
            .ok_or_else(|| ContainerError::InvalidBundle {
                location: location.to_string(),
                message: "manifest has no Bundle-SymbolicName".to_string(),
            })?
            .to_string();

        let info = {
            let mut state = self.running_state()?;
            let duplicate = state
                .bundles
                .values()
                .any(|b| b.symbolic_name == symbolic_name && b.version == manifest.version());
            if duplicate {
                return Err(ContainerError::InvalidBundle {
                    location: location.to_string(),
                    message: format!("{} {} is already installed", symbolic_name, manifest.version()),
                });
            }
            let id = state.next_bundle_id;
            state.next_bundle_id += 1;
            if let Some(dir) = &state.storage_directory {
                let path = dir.join(format!("bundle-{}.jar", id));
                std::fs::write(&path, &bytes).map_err(|e| ContainerError::io(e, "store_bundle", path))?;
            }
            let info = BundleInfo {
                id,
                location: location.to_string(),
                symbolic_name,
                version: manifest.version().to_string(),
                state: BundleState::Installed,
                manifest,
            };
            state.bundles.insert(id, info.clone());
            info
        };
        debug!("Installed bundle {} ({}) from {}", info.symbolic_name, info.id, location);
        self.shared.notify(FrameworkNotification::BundleInstalled(info.id));
        Ok(info)
    }

    fn start_bundle(&self, id: BundleId) -> ContainerResult<()> {
        {
            let mut state = self.running_state()?;
            let bundle = state.bundle(id)?;
            if bundle.state == BundleState::Active {
                return Ok(());
            }
            if bundle.is_fragment() {
                return Err(ContainerError::InvalidBundle {
                    location: bundle.location.clone(),
                    message: "fragment bundles cannot be started".to_string(),
                });
            }
            let name = bundle.symbolic_name.clone();
            let missing = state.missing_imports(id)?;
            if !missing.is_empty() {
                return Err(ContainerError::Unresolved { bundle: name, missing });
            }
            if let Some(bundle) = state.bundles.get_mut(&id) {
                bundle.state = BundleState::Active;
            }
        }
        self.shared.notify(FrameworkNotification::BundleStarted(id));
        Ok(())
    }

    fn stop_bundle(&self, id: BundleId) -> ContainerResult<()> {
        {
            let mut state = self.running_state()?;
            state.bundle(id)?;
            state.remove_services_of(id);
            if let Some(bundle) = state.bundles.get_mut(&id) {
                if bundle.state != BundleState::Active {
                    return Ok(());
                }
                bundle.state = BundleState::Resolved;
            }
        }
        self.shared.notify(FrameworkNotification::BundleStopped(id));
        Ok(())
    }

    fn uninstall_bundle(&self, id: BundleId) -> ContainerResult<()> {
        {
            let mut state = self.running_state()?;
            state.bundle(id)?;
            state.remove_services_of(id);
            state.bundles.remove(&id);
            if let Some(dir) = &state.storage_directory {
                let path = dir.join(format!("bundle-{}.jar", id));
                if let Err(e) = std::fs::remove_file(&path) {
                    debug!("Could not remove stored bundle {}: {}", path.display(), e);
                }
            }
        }
        self.shared.notify(FrameworkNotification::BundleUninstalled(id));
        Ok(())
    }

    fn bundles(&self) -> Vec<BundleInfo> {
        self.shared.state().bundles.values().cloned().collect()
    }

    fn refresh_packages(&self) -> ContainerResult<()> {
        drop(self.running_state()?);
        let shared = self.shared.clone();
        std::thread::Builder::new()
            .name("maera-package-refresh".to_string())
            .spawn(move || shared.refresh())
            .map_err(|e| ContainerError::FrameworkFailure(format!("cannot spawn refresh thread: {}", e)))?;
        Ok(())
    }

    fn register_service(
        &self,
        interface: &str,
        service: ServiceObject,
        properties: BTreeMap<String, String>,
        bundle: Option<BundleId>,
    ) -> ContainerResult<u64> {
        let mut state = self.running_state()?;
        if let Some(id) = bundle {
            state.bundle(id)?;
        }
        state.next_service_id += 1;
        let id = state.next_service_id;
        state.services.insert(
            id,
            ServiceReference {
                id,
                interface: interface.to_string(),
                bundle,
                properties,
                service,
            },
        );
        Ok(id)
    }

    fn unregister_service(&self, id: u64) -> ContainerResult<()> {
        self.shared.state().services.remove(&id);
        Ok(())
    }

    fn services(&self, interface: &str) -> Vec<ServiceReference> {
        self.shared
            .state()
            .services
            .values()
            .filter(|s| s.interface == interface)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct EmbeddedFrameworkFactory;

impl FrameworkFactory for EmbeddedFrameworkFactory {
    fn name(&self) -> &str {
        EMBEDDED_FRAMEWORK_NAME
    }

    fn create(&self) -> ContainerResult<Arc<dyn Framework>> {
        Ok(Arc::new(EmbeddedFramework::new()))
    }
}
