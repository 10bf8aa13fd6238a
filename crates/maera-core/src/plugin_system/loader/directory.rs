use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::fs;
use tokio::sync::Mutex;

use crate::plugin_system::artifact::{ArtifactKind, PluginArtifactFactory};
use crate::plugin_system::error::{PluginResult, PluginSystemError};
use crate::plugin_system::factory::PluginFactory;
use crate::plugin_system::loader::{PluginLoader, create_plugin};
use crate::plugin_system::module_factory::ModuleDescriptorFactory;
use crate::plugin_system::plugin::Plugin;
use crate::utils::fs::is_hidden;

/// One artifact file as seen by the last scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentUnit {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Differences found by a scan
#[derive(Debug, Default, Clone)]
pub struct ScanDelta {
    pub added: Vec<DeploymentUnit>,
    pub removed: Vec<DeploymentUnit>,
    pub modified: Vec<DeploymentUnit>,
}

impl ScanDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Tracks the plugin artifacts at the top level of a directory.
///
/// Units are keyed by canonical path and iterate in lexicographic order.
/// Dotfiles and files that are not `.jar`/`.json` artifacts are ignored.
#[derive(Debug)]
pub struct DirectoryScanner {
    directory: PathBuf,
    units: BTreeMap<PathBuf, DeploymentUnit>,
}

impl DirectoryScanner {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            units: BTreeMap::new(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Re-reads the directory and reports what changed since the last scan.
    pub async fn scan(&mut self) -> PluginResult<ScanDelta> {
        let current = self.read_units().await?;
        let mut delta = ScanDelta::default();

        for (path, unit) in &current {
            match self.units.get(path) {
                None => delta.added.push(unit.clone()),
                Some(old) if old.modified != unit.modified => delta.modified.push(unit.clone()),
                Some(_) => {}
            }
        }
        for (path, unit) in &self.units {
            if !current.contains_key(path) {
                delta.removed.push(unit.clone());
            }
        }
        if !delta.is_empty() {
            debug!(
                "Scan of {}: {} added, {} removed, {} modified",
                self.directory.display(),
                delta.added.len(),
                delta.removed.len(),
                delta.modified.len()
            );
        }
        self.units = current;
        Ok(delta)
    }

    async fn read_units(&self) -> PluginResult<BTreeMap<PathBuf, DeploymentUnit>> {
        let dir_err = |e: std::io::Error| {
            PluginSystemError::loading(self.directory.display().to_string(), Some(self.directory.clone()), e)
        };
        let mut entries = fs::read_dir(&self.directory).await.map_err(dir_err)?;
        let mut units = BTreeMap::new();
        while let Some(entry) = entries.next_entry().await.map_err(dir_err)? {
            let path = entry.path();
            if is_hidden(&path) || ArtifactKind::from_path(&path).is_none() {
                continue;
            }
            // Entries can vanish between listing and stat
            let Ok(metadata) = fs::metadata(&path).await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let canonical = fs::canonicalize(&path).await.unwrap_or(path);
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            units.insert(
                canonical.clone(),
                DeploymentUnit {
                    path: canonical,
                    modified,
                },
            );
        }
        Ok(units)
    }

    /// Units found by the last scan, in lexicographic order
    pub fn deployment_units(&self) -> impl Iterator<Item = &DeploymentUnit> {
        self.units.values()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Forgets a unit so the next scan reports it as added if it still exists.
    pub fn forget(&mut self, path: &Path) {
        self.units.remove(path);
    }
}

#[derive(Debug)]
struct LoadedUnit {
    key: String,
    modified: SystemTime,
}

#[derive(Debug)]
struct DirectoryState {
    scanner: DirectoryScanner,
    loaded: HashMap<PathBuf, LoadedUnit>,
    /// Artifacts declaring a key another artifact already provides. They are
    /// retried once the owning artifact is gone.
    shadowed: HashMap<PathBuf, LoadedUnit>,
}

impl DirectoryState {
    fn owns_key(&self, key: &str) -> bool {
        self.loaded.values().any(|l| l.key == key)
    }

    /// True for new or changed files, and for shadowed files whose key has
    /// lost its owner.
    fn is_pending(&self, unit: &DeploymentUnit) -> bool {
        match self.shadowed.get(&unit.path) {
            Some(s) if s.modified == unit.modified => !self.owns_key(&s.key),
            _ => self
                .loaded
                .get(&unit.path)
                .is_none_or(|l| l.modified != unit.modified),
        }
    }
}

/// Loads plugins from the artifacts in a directory and supports hot
/// deployment: new files are added, deleted files removed and modified
/// files removed and added again.
#[derive(Debug)]
pub struct DirectoryPluginLoader {
    directory: PathBuf,
    factories: Vec<Arc<dyn PluginFactory>>,
    artifacts: PluginArtifactFactory,
    state: Mutex<DirectoryState>,
}

impl DirectoryPluginLoader {
    pub fn new(directory: impl Into<PathBuf>, factories: Vec<Arc<dyn PluginFactory>>) -> Self {
        let directory = directory.into();
        Self {
            state: Mutex::new(DirectoryState {
                scanner: DirectoryScanner::new(directory.clone()),
                loaded: HashMap::new(),
                shadowed: HashMap::new(),
            }),
            directory,
            factories,
            artifacts: PluginArtifactFactory::new(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Number of artifacts seen by the last scan
    pub async fn deployment_unit_count(&self) -> usize {
        self.state.lock().await.scanner.len()
    }

    fn load_unit(&self, unit: &DeploymentUnit, modules: &ModuleDescriptorFactory) -> PluginResult<Plugin> {
        let artifact = self.artifacts.from_path(&unit.path)?;
        Ok(create_plugin(&self.factories, artifact, modules))
    }

    /// Loads `units` in order. A unit whose key is already provided by
    /// another artifact of this directory is set aside as shadowed.
    fn load_units(
        &self,
        units: &[DeploymentUnit],
        state: &mut DirectoryState,
        modules: &ModuleDescriptorFactory,
    ) -> PluginResult<Vec<Plugin>> {
        let mut plugins = Vec::new();
        for unit in units {
            let mut plugin = self.load_unit(unit, modules)?;
            let record = LoadedUnit {
                key: plugin.key().to_string(),
                modified: unit.modified,
            };
            let owner = state
                .loaded
                .iter()
                .find(|(path, l)| l.key == record.key && **path != unit.path)
                .map(|(path, _)| path.clone());
            if let Some(owner) = owner {
                warn!(
                    "Ignoring {}: plugin '{}' is already loaded from {}",
                    unit.path.display(),
                    record.key,
                    owner.display()
                );
                plugin.close();
                state.shadowed.insert(unit.path.clone(), record);
                continue;
            }
            state.shadowed.remove(&unit.path);
            state.loaded.insert(unit.path.clone(), record);
            plugins.push(plugin);
        }
        Ok(plugins)
    }
}

#[async_trait]
impl PluginLoader for DirectoryPluginLoader {
    fn name(&self) -> &str {
        "directory"
    }

    async fn load_all_plugins(&self, modules: &ModuleDescriptorFactory) -> PluginResult<Vec<Plugin>> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.loaded.clear();
        state.shadowed.clear();
        state.scanner = DirectoryScanner::new(self.directory.clone());
        state.scanner.scan().await?;
        let units: Vec<DeploymentUnit> = state.scanner.deployment_units().cloned().collect();
        let plugins = self.load_units(&units, state, modules)?;
        info!("Loaded {} plugin(s) from {}", plugins.len(), self.directory.display());
        Ok(plugins)
    }

    fn supports_addition(&self) -> bool {
        true
    }

    fn supports_removal(&self) -> bool {
        true
    }

    async fn load_found_plugins(&self, modules: &ModuleDescriptorFactory) -> PluginResult<Vec<Plugin>> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.scanner.scan().await?;
        let pending: Vec<DeploymentUnit> = state
            .scanner
            .deployment_units()
            .filter(|unit| state.is_pending(unit))
            .cloned()
            .collect();
        self.load_units(&pending, state, modules)
    }

    async fn remove_missing_plugins(&self) -> PluginResult<Vec<String>> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.scanner.scan().await?;
        let current: HashMap<&Path, SystemTime> = state
            .scanner
            .deployment_units()
            .map(|u| (u.path.as_path(), u.modified))
            .collect();
        let stale: Vec<PathBuf> = state
            .loaded
            .iter()
            .filter(|(path, l)| current.get(path.as_path()) != Some(&l.modified))
            .map(|(path, _)| path.clone())
            .collect();
        state.shadowed.retain(|path, _| current.contains_key(path.as_path()));

        let mut keys = Vec::new();
        for path in stale {
            if let Some(unit) = state.loaded.remove(&path) {
                debug!("Artifact {} is gone or changed, removing '{}'", path.display(), unit.key);
                keys.push(unit.key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn remove_plugin(&self, plugin: &Plugin) -> PluginResult<()> {
        let file = plugin.artifact().and_then(|a| a.file()).ok_or_else(|| {
            PluginSystemError::Unsupported(format!("Plugin '{}' has no artifact file to remove", plugin.key()))
        })?;
        let canonical = fs::canonicalize(file).await.unwrap_or_else(|_| file.to_path_buf());

        let mut state = self.state.lock().await;
        let owned = state.loaded.get(&canonical).is_some_and(|l| l.key == plugin.key());
        if !owned {
            return Err(PluginSystemError::IllegalState(format!(
                "Plugin '{}' was not loaded from {}",
                plugin.key(),
                self.directory.display()
            )));
        }
        match fs::remove_file(&canonical).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PluginSystemError::loading(plugin.key(), Some(canonical), e)),
        }
        state.loaded.remove(&canonical);
        state.scanner.forget(&canonical);
        info!("Removed artifact {} of plugin '{}'", canonical.display(), plugin.key());
        Ok(())
    }
}
