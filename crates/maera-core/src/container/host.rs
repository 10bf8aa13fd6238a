//! Host components: services the host application offers to bundles.
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::container::framework::ServiceObject;

/// One service instance the host publishes into the container
#[derive(Clone)]
pub struct HostComponentRegistration {
    pub name: String,
    /// Interface names the service is registered under
    pub interfaces: Vec<String>,
    /// Packages bundles need to use the service; always exported
    pub packages: Vec<String>,
    pub properties: BTreeMap<String, String>,
    pub instance: ServiceObject,
}

impl Debug for HostComponentRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostComponentRegistration")
            .field("name", &self.name)
            .field("interfaces", &self.interfaces)
            .field("packages", &self.packages)
            .finish()
    }
}

impl HostComponentRegistration {
    pub fn new<T: Any + Send + Sync>(name: impl Into<String>, instance: Arc<T>) -> Self {
        Self {
            name: name.into(),
            interfaces: Vec::new(),
            packages: Vec::new(),
            properties: BTreeMap::new(),
            instance,
        }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.packages.push(package.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Collects registrations from the host's providers
#[derive(Debug, Default)]
pub struct HostComponentRegistrar {
    registrations: Vec<HostComponentRegistration>,
}

impl HostComponentRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, registration: HostComponentRegistration) {
        self.registrations.push(registration);
    }

    pub fn registrations(&self) -> &[HostComponentRegistration] {
        &self.registrations
    }

    /// Packages referenced by any registration, sorted and deduplicated
    pub fn packages(&self) -> Vec<String> {
        let mut packages: Vec<String> = self
            .registrations
            .iter()
            .flat_map(|r| r.packages.iter().cloned())
            .collect();
        packages.sort();
        packages.dedup();
        packages
    }
}

/// Implemented by the host to contribute components at container start.
pub trait HostComponentProvider: Send + Sync + Debug {
    fn provide(&self, registrar: &mut HostComponentRegistrar);
}
