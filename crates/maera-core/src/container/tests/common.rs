use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::container::embedded::EmbeddedFramework;
use crate::container::error::ContainerResult;
use crate::container::framework::{
    BundleId, BundleInfo, Framework, FrameworkCapabilities, FrameworkConfiguration, FrameworkFactory,
    FrameworkListener, ServiceObject, ServiceReference,
};
use crate::container::manager::ContainerManager;
use crate::event::{DefaultEventManager, EventManager};
use crate::storage::config::ContainerConfig;

/// Jar holding only a manifest with `headers`
pub fn bundle_jar(headers: &[(&str, &str)]) -> Vec<u8> {
    let mut manifest = String::from("Manifest-Version: 1.0\n");
    for (name, value) in headers {
        manifest.push_str(&format!("{}: {}\n", name, value));
    }
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("META-INF/MANIFEST.MF", zip::write::SimpleFileOptions::default())
        .unwrap();
    writer.write_all(manifest.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}

pub fn jar_without_manifest() -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("readme.txt", zip::write::SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"no manifest").unwrap();
    writer.finish().unwrap().into_inner()
}

/// Bundle backing plugin `key`
pub fn plugin_bundle(key: &str, version: &str) -> Vec<u8> {
    bundle_jar(&[
        ("Maera-Plugin-Key", key),
        ("Bundle-SymbolicName", key),
        ("Bundle-Version", version),
    ])
}

pub fn container(cache: &Path) -> (Arc<ContainerManager>, Arc<DefaultEventManager>) {
    let events = Arc::new(DefaultEventManager::new());
    let event_manager: Arc<dyn EventManager> = events.clone();
    let manager = ContainerManager::new(ContainerConfig::default(), cache, event_manager).unwrap();
    (Arc::new(manager), events)
}

/// Embedded framework with adjustable capabilities that can be told to
/// swallow package refresh requests
#[derive(Debug)]
pub struct TestFramework {
    inner: EmbeddedFramework,
    capabilities: FrameworkCapabilities,
    silent_refresh: bool,
}

impl Framework for TestFramework {
    fn name(&self) -> &str {
        "test"
    }

    fn version(&self) -> semver::Version {
        self.inner.version()
    }

    fn capabilities(&self) -> FrameworkCapabilities {
        self.capabilities
    }

    fn init(&self, config: &FrameworkConfiguration) -> ContainerResult<()> {
        self.inner.init(config)
    }

    fn start(&self) -> ContainerResult<()> {
        self.inner.start()
    }

    fn stop(&self, wait: Duration) -> ContainerResult<bool> {
        self.inner.stop(wait)
    }

    fn add_listener(&self, listener: FrameworkListener) {
        self.inner.add_listener(listener)
    }

    fn install_bundle(&self, location: &str, bytes: Vec<u8>) -> ContainerResult<BundleInfo> {
        self.inner.install_bundle(location, bytes)
    }

    fn start_bundle(&self, id: BundleId) -> ContainerResult<()> {
        self.inner.start_bundle(id)
    }

    fn stop_bundle(&self, id: BundleId) -> ContainerResult<()> {
        self.inner.stop_bundle(id)
    }

    fn uninstall_bundle(&self, id: BundleId) -> ContainerResult<()> {
        self.inner.uninstall_bundle(id)
    }

    fn bundles(&self) -> Vec<BundleInfo> {
        self.inner.bundles()
    }

    fn refresh_packages(&self) -> ContainerResult<()> {
        if self.silent_refresh {
            return Ok(());
        }
        self.inner.refresh_packages()
    }

    fn register_service(
        &self,
        interface: &str,
        service: ServiceObject,
        properties: BTreeMap<String, String>,
        bundle: Option<BundleId>,
    ) -> ContainerResult<u64> {
        self.inner.register_service(interface, service, properties, bundle)
    }

    fn unregister_service(&self, id: u64) -> ContainerResult<()> {
        self.inner.unregister_service(id)
    }

    fn services(&self, interface: &str) -> Vec<ServiceReference> {
        self.inner.services(interface)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TestFrameworkFactory {
    pub capabilities: FrameworkCapabilities,
    pub silent_refresh: bool,
}

impl TestFrameworkFactory {
    /// Full capabilities, refresh never completes
    pub fn silent() -> Self {
        Self {
            capabilities: FrameworkCapabilities {
                package_refresh: true,
                service_registry: true,
            },
            silent_refresh: true,
        }
    }
}

impl FrameworkFactory for TestFrameworkFactory {
    fn name(&self) -> &str {
        "test"
    }

    fn create(&self) -> ContainerResult<Arc<dyn Framework>> {
        Ok(Arc::new(TestFramework {
            inner: EmbeddedFramework::new(),
            capabilities: self.capabilities,
            silent_refresh: self.silent_refresh,
        }))
    }
}
