//! Per-plugin execution context.
//!
//! A [`PluginContext`] gives module code access to its plugin's artifact
//! resources and, when the descriptor names one, a native library shipped
//! inside the artifact. Lifecycle hooks run inside a [`ScopeGuard`] so code
//! called from a hook can ask which plugin it is running for via
//! [`current_plugin_key`].
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use libloading::Library;
use log::{debug, warn};
use tempfile::TempDir;

use crate::plugin_system::artifact::PluginArtifact;
use crate::plugin_system::error::{PluginResult, PluginSystemError};

thread_local! {
    static SCOPE_STACK: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Key of the plugin whose hook is running on this thread, if any.
pub fn current_plugin_key() -> Option<String> {
    SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Marks the current thread as running on behalf of a plugin until dropped.
///
/// Guards nest; dropping restores the previous plugin. Not `Send`, so a
/// guard cannot outlive the thread that created it.
#[must_use = "the scope ends when the guard is dropped"]
pub struct ScopeGuard {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPE_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.len() != self.depth {
                warn!(
                    "Plugin scope stack out of order (expected depth {}, found {})",
                    self.depth,
                    stack.len()
                );
            }
            stack.truncate(self.depth.saturating_sub(1));
        });
    }
}

struct NativeState {
    library: Option<Arc<Library>>,
    // Keeps the extracted library file alive while it is loaded
    work_dir: Option<TempDir>,
}

struct ContextInner {
    plugin_key: String,
    artifact: Option<Arc<dyn PluginArtifact>>,
    native: Mutex<NativeState>,
}

/// Shared handle to a plugin's resources and native code.
#[derive(Clone)]
pub struct PluginContext {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin_key", &self.inner.plugin_key)
            .field("artifact", &self.inner.artifact.as_ref().map(|a| a.name().to_string()))
            .field("native_loaded", &self.native_library().is_some())
            .finish()
    }
}

impl PluginContext {
    /// Context for a plugin backed by an artifact
    pub fn new(plugin_key: impl Into<String>, artifact: Option<Arc<dyn PluginArtifact>>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                plugin_key: plugin_key.into(),
                artifact,
                native: Mutex::new(NativeState { library: None, work_dir: None }),
            }),
        }
    }

    /// Context for code compiled into the host
    pub fn host(plugin_key: impl Into<String>) -> Self {
        Self::new(plugin_key, None)
    }

    pub fn plugin_key(&self) -> &str {
        &self.inner.plugin_key
    }

    pub fn artifact(&self) -> Option<&Arc<dyn PluginArtifact>> {
        self.inner.artifact.as_ref()
    }

    /// Enter this plugin's scope on the current thread.
    pub fn enter(&self) -> ScopeGuard {
        let depth = SCOPE_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(self.inner.plugin_key.clone());
            stack.len()
        });
        ScopeGuard { depth, _not_send: PhantomData }
    }

    pub fn has_resource(&self, name: &str) -> bool {
        self.inner
            .artifact
            .as_ref()
            .map(|a| a.does_resource_exist(name))
            .unwrap_or(false)
    }

    /// Bytes of a resource packaged with the plugin
    pub fn resource(&self, name: &str) -> PluginResult<Option<Vec<u8>>> {
        match &self.inner.artifact {
            Some(artifact) => artifact.resource_as_bytes(name),
            None => Ok(None),
        }
    }

    fn native(&self) -> std::sync::MutexGuard<'_, NativeState> {
        self.inner.native.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn native_library(&self) -> Option<Arc<Library>> {
        self.native().library.clone()
    }

    /// Extracts `entry` from the artifact and loads it as a native library.
    ///
    /// Loading twice is a no-op.
    pub fn load_native_library(&self, entry: &str) -> PluginResult<Arc<Library>> {
        let mut native = self.native();
        if let Some(lib) = &native.library {
            return Ok(lib.clone());
        }

        let native_err = |message: String| PluginSystemError::NativeLibrary {
            plugin_key: self.inner.plugin_key.clone(),
            message,
        };
        let bytes = self
            .resource(entry)?
            .ok_or_else(|| native_err(format!("resource '{}' not found in artifact", entry)))?;

        let work_dir = tempfile::Builder::new()
            .prefix("maera-native-")
            .tempdir()
            .map_err(|e| native_err(format!("cannot create work directory: {}", e)))?;
        let file_name = PathBuf::from(entry)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("native.lib"));
        let lib_path = work_dir.path().join(file_name);
        std::fs::write(&lib_path, &bytes)
            .map_err(|e| native_err(format!("cannot extract '{}': {}", entry, e)))?;

        // SAFETY: loading runs the library's initialisers; the artifact is trusted
        // once it has been installed.
        let library = unsafe { Library::new(&lib_path) }
            .map_err(|e| native_err(format!("cannot load '{}': {}", lib_path.display(), e)))?;
        let library = Arc::new(library);
        debug!("Loaded native library {} for plugin '{}'", entry, self.inner.plugin_key);

        native.library = Some(library.clone());
        native.work_dir = Some(work_dir);
        Ok(library)
    }

    /// Unloads the native library and deletes its extracted copy.
    pub fn release(&self) {
        let mut native = self.native();
        if native.library.take().is_some() {
            debug!("Released native library for plugin '{}'", self.inner.plugin_key);
        }
        native.work_dir = None;
    }
}
