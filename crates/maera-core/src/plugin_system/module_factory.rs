//! Registry of module types.
//!
//! Descriptor parsing asks this registry to build a [`Module`] for each
//! module element. Reads vastly outnumber registrations, so both maps are
//! copy-on-write snapshots behind a lock that is only held long enough to
//! clone an `Arc`.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use log::{debug, info};

use crate::plugin_system::error::{PluginResult, PluginSystemError};
use crate::plugin_system::module::Module;

/// Builds a fresh module instance for a registered type
pub type ModuleConstructor = Arc<dyn Fn() -> Box<dyn Module> + Send + Sync>;

#[derive(Default)]
pub struct ModuleDescriptorFactory {
    constructors: RwLock<Arc<HashMap<String, ModuleConstructor>>>,
    // Empty means every registered type is permitted
    permitted: RwLock<Arc<HashSet<String>>>,
}

impl fmt::Debug for ModuleDescriptorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<String> = self.constructors_snapshot().keys().cloned().collect();
        types.sort();
        f.debug_struct("ModuleDescriptorFactory")
            .field("types", &types)
            .field("permitted", &self.permitted_snapshot())
            .finish()
    }
}

impl ModuleDescriptorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn constructors_snapshot(&self) -> Arc<HashMap<String, ModuleConstructor>> {
        self.constructors.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn permitted_snapshot(&self) -> Arc<HashSet<String>> {
        self.permitted.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Registers (or replaces) the constructor for `module_type`.
    pub fn register<F>(&self, module_type: &str, constructor: F)
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        let mut guard = self.constructors.write().unwrap_or_else(|e| e.into_inner());
        let mut next = HashMap::clone(&guard);
        if next.insert(module_type.to_string(), Arc::new(constructor)).is_some() {
            info!("Replaced module type '{}'", module_type);
        } else {
            debug!("Registered module type '{}'", module_type);
        }
        *guard = Arc::new(next);
    }

    pub fn unregister(&self, module_type: &str) -> bool {
        let mut guard = self.constructors.write().unwrap_or_else(|e| e.into_inner());
        if !guard.contains_key(module_type) {
            return false;
        }
        let mut next = HashMap::clone(&guard);
        next.remove(module_type);
        *guard = Arc::new(next);
        true
    }

    pub fn has_module_descriptor(&self, module_type: &str) -> bool {
        self.constructors_snapshot().contains_key(module_type)
    }

    /// Restricts creation to `types`. An empty list lifts the restriction.
    pub fn set_permitted_module_types<I, S>(&self, types: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let next: HashSet<String> = types.into_iter().map(Into::into).collect();
        *self.permitted.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(next);
    }

    /// The permitted types, sorted; empty when unrestricted
    pub fn permitted_module_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.permitted_snapshot().iter().cloned().collect();
        types.sort();
        types
    }

    pub fn is_permitted(&self, module_type: &str) -> bool {
        let permitted = self.permitted_snapshot();
        permitted.is_empty() || permitted.contains(module_type)
    }

    /// Creates a module of `module_type`.
    ///
    /// Types outside the permitted list yield `Ok(None)` and are skipped by
    /// the parser. Unknown permitted types are a parse error.
    pub fn create(&self, module_type: &str) -> PluginResult<Option<Box<dyn Module>>> {
        if !self.is_permitted(module_type) {
            debug!("Module type '{}' is not permitted, skipping", module_type);
            return Ok(None);
        }
        match self.constructors_snapshot().get(module_type) {
            Some(constructor) => Ok(Some(constructor())),
            None => Err(PluginSystemError::parse(
                module_type,
                format!("Could not find descriptor for module type '{}'", module_type),
            )),
        }
    }
}
