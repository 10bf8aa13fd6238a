//! Persisted enable/disable overrides for plugins and modules.
//!
//! Only deviations from a plugin's or module's declared default are
//! stored. Writing a value equal to the default removes the entry, so
//! [`PluginPersistentState::is_enabled`] falls back to the descriptor.
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::storage::config::ConfigFormat;
use crate::storage::error::StorageResult;
use crate::storage::local::LocalStorageProvider;
use crate::storage::provider::StorageProvider;

/// Immutable-by-convention snapshot of persisted overrides.
///
/// Keys are plugin keys or module complete keys (`plugin:module`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginPersistentState {
    #[serde(default)]
    overrides: BTreeMap<String, bool>,
}

impl PluginPersistentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw override for `key`, if one was stored.
    pub fn get(&self, key: &str) -> Option<bool> {
        self.overrides.get(key).copied()
    }

    /// Effective enabled flag: the stored override, else `default`.
    pub fn is_enabled(&self, key: &str, default: bool) -> bool {
        self.get(key).unwrap_or(default)
    }

    /// Stores `enabled` for `key`, dropping the entry when it matches `default`.
    pub fn set_enabled(&mut self, key: &str, enabled: bool, default: bool) {
        if enabled == default {
            self.overrides.remove(key);
        } else {
            self.overrides.insert(key.to_string(), enabled);
        }
    }

    /// Removes the plugin's entry and every entry for its modules.
    pub fn remove_plugin(&mut self, plugin_key: &str) {
        let module_prefix = format!("{}:", plugin_key);
        self.overrides
            .retain(|k, _| k != plugin_key && !k.starts_with(&module_prefix));
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.overrides.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Load/save seam for persisted plugin state.
pub trait PluginStateStore: Send + Sync + Debug {
    fn load(&self) -> StorageResult<PluginPersistentState>;
    fn save(&self, state: &PluginPersistentState) -> StorageResult<()>;
}

/// Keeps state in memory only; used for tests and embedded hosts.
#[derive(Debug, Default)]
pub struct MemoryPluginStateStore {
    state: Mutex<PluginPersistentState>,
}

impl MemoryPluginStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PluginPersistentState) -> Self {
        Self { state: Mutex::new(state) }
    }
}

impl PluginStateStore for MemoryPluginStateStore {
    fn load(&self) -> StorageResult<PluginPersistentState> {
        Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, state: &PluginPersistentState) -> StorageResult<()> {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state.clone();
        Ok(())
    }
}

/// Stores state in a single file whose format follows its extension.
#[derive(Debug)]
pub struct FilePluginStateStore {
    provider: LocalStorageProvider,
    file_name: PathBuf,
    format: ConfigFormat,
}

impl FilePluginStateStore {
    pub fn new(path: &Path) -> StorageResult<Self> {
        let format = ConfigFormat::require_from_path(path)?;
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let file_name = path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("maera-state.{}", format.extension())));
        Ok(Self {
            provider: LocalStorageProvider::new(parent),
            file_name,
            format,
        })
    }

    pub fn path(&self) -> PathBuf {
        self.provider.resolve(&self.file_name)
    }
}

impl PluginStateStore for FilePluginStateStore {
    fn load(&self) -> StorageResult<PluginPersistentState> {
        if !self.provider.is_file(&self.file_name) {
            debug!("No persisted plugin state at {}", self.path().display());
            return Ok(PluginPersistentState::default());
        }
        let data = self.provider.read_to_string(&self.file_name)?;
        self.format.decode(&data)
    }

    fn save(&self, state: &PluginPersistentState) -> StorageResult<()> {
        let data = self.format.encode(state)?;
        self.provider.write_string(&self.file_name, &data)
    }
}
