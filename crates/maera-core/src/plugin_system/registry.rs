use std::collections::HashMap;

use crate::plugin_system::error::{PluginResult, PluginSystemError};
use crate::plugin_system::module::ModuleDescriptor;
use crate::plugin_system::plugin::Plugin;

/// Registry of the plugins known to a manager.
///
/// Keeps registration order, which is loader order, and remembers which
/// loader produced each plugin so removal can be delegated back to it.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    /// Registered plugins by key
    plugins: HashMap<String, Plugin>,
    /// Keys in registration order
    order: Vec<String>,
    /// Index of the loader each plugin came from, `None` for direct additions
    loaders: HashMap<String, usize>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin; the key must not be taken.
    pub fn register(&mut self, plugin: Plugin, loader: Option<usize>) -> PluginResult<()> {
        let key = plugin.key().to_string();
        if self.plugins.contains_key(&key) {
            return Err(PluginSystemError::IllegalState(format!(
                "Plugin already registered: {}",
                key
            )));
        }
        if let Some(index) = loader {
            self.loaders.insert(key.clone(), index);
        }
        self.order.push(key.clone());
        self.plugins.insert(key, plugin);
        Ok(())
    }

    /// Swaps in a new plugin for an existing key, keeping its position.
    /// Returns the previous plugin, or `None` when the key was new.
    pub fn replace(&mut self, plugin: Plugin, loader: Option<usize>) -> Option<Plugin> {
        let key = plugin.key().to_string();
        match loader {
            Some(index) => {
                self.loaders.insert(key.clone(), index);
            }
            None => {
                self.loaders.remove(&key);
            }
        }
        if !self.plugins.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.plugins.insert(key, plugin)
    }

    pub fn unregister(&mut self, key: &str) -> Option<Plugin> {
        let plugin = self.plugins.remove(key)?;
        self.order.retain(|k| k != key);
        self.loaders.remove(key);
        Some(plugin)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.plugins.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Plugin> {
        self.plugins.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Plugin> {
        self.plugins.get_mut(key)
    }

    /// Plugins in registration order
    pub fn plugins_in_order(&self) -> impl Iterator<Item = &Plugin> {
        self.order.iter().filter_map(|k| self.plugins.get(k))
    }

    pub fn keys_in_order(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn loader_index(&self, key: &str) -> Option<usize> {
        self.loaders.get(key).copied()
    }

    /// Looks up a module by its complete key
    pub fn module_descriptor(&self, complete_key: &str) -> Option<&ModuleDescriptor> {
        let (plugin_key, module_key) = complete_key.split_once(':')?;
        self.plugins.get(plugin_key)?.module_descriptor(module_key)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Removes every plugin, returning them in registration order.
    pub fn drain(&mut self) -> Vec<Plugin> {
        let order = std::mem::take(&mut self.order);
        self.loaders.clear();
        let mut drained: Vec<Plugin> = order.iter().filter_map(|k| self.plugins.remove(k)).collect();
        drained.extend(self.plugins.drain().map(|(_, p)| p));
        drained
    }
}
