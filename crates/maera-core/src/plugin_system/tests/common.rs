//! Shared fixtures for plugin system tests.
use std::any::Any;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tempfile::TempDir;

use crate::event::{DefaultEventManager, Event, PluginEvent};
use crate::kernel::constants::DEFAULT_DESCRIPTOR_FILE_NAME;
use crate::plugin_system::context::PluginContext;
use crate::plugin_system::error::{PluginResult, PluginSystemError};
use crate::plugin_system::factory::default_plugin_factories;
use crate::plugin_system::installer::FilePluginInstaller;
use crate::plugin_system::loader::DirectoryPluginLoader;
use crate::plugin_system::manager::DefaultPluginManager;
use crate::plugin_system::module::{Module, ModuleInfo, StateAware};
use crate::plugin_system::module_factory::ModuleDescriptorFactory;
use crate::storage::error::{StorageResult, StorageSystemError};
use crate::storage::state::{MemoryPluginStateStore, PluginPersistentState, PluginStateStore};

/// Ordered log of module hook calls, shared by every recording module
#[derive(Debug, Default)]
pub struct Recorder {
    calls: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn push(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Records `enable:<complete key>` and `disable:<complete key>`
#[derive(Debug)]
pub struct RecordingModule {
    recorder: Arc<Recorder>,
    complete_key: String,
    fail_on_enable: bool,
}

impl Module for RecordingModule {
    fn init(&mut self, info: &ModuleInfo) -> PluginResult<()> {
        self.complete_key = info.complete_key();
        Ok(())
    }

    fn as_state_aware(&self) -> Option<&dyn StateAware> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl StateAware for RecordingModule {
    fn enabled(&self, _context: &PluginContext) -> PluginResult<()> {
        if self.fail_on_enable {
            return Err(PluginSystemError::InternalError("refusing to start".to_string()));
        }
        self.recorder.push(format!("enable:{}", self.complete_key));
        Ok(())
    }

    fn disabled(&self, _context: &PluginContext) {
        self.recorder.push(format!("disable:{}", self.complete_key));
    }
}

/// Module type registry with `recording`, `failing` and `plain` types
pub fn module_factory(recorder: &Arc<Recorder>) -> Arc<ModuleDescriptorFactory> {
    let factory = ModuleDescriptorFactory::new();
    let r = recorder.clone();
    factory.register("recording", move || {
        Box::new(RecordingModule {
            recorder: r.clone(),
            complete_key: String::new(),
            fail_on_enable: false,
        })
    });
    let r = recorder.clone();
    factory.register("failing", move || {
        Box::new(RecordingModule {
            recorder: r.clone(),
            complete_key: String::new(),
            fail_on_enable: true,
        })
    });
    factory.register("plain", || Box::new(PlainModule));
    Arc::new(factory)
}

#[derive(Debug)]
pub struct PlainModule;

impl Module for PlainModule {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Descriptor for `key` with one `recording` module per entry of `modules`
pub fn descriptor(key: &str, modules: &[&str]) -> Value {
    json!({
        "key": key,
        "name": format!("{} plugin", key),
        "plugin-info": { "version": "1.0.0" },
        "modules": modules
            .iter()
            .map(|m| json!({ "type": "recording", "key": m }))
            .collect::<Vec<_>>(),
    })
}

pub fn write_descriptor(dir: &Path, file_name: &str, descriptor: &Value) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, serde_json::to_vec_pretty(descriptor).unwrap()).unwrap();
    path
}

/// Zip archive holding `entries`
pub fn jar_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Jar with the descriptor stored under the default descriptor name
pub fn descriptor_jar(descriptor: &Value) -> Vec<u8> {
    let bytes = serde_json::to_vec(descriptor).unwrap();
    jar_bytes(&[(DEFAULT_DESCRIPTOR_FILE_NAME, &bytes)])
}

pub fn write_file(dir: &Path, file_name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Event subjects in publication order, as `name subject`
#[derive(Debug, Default)]
pub struct EventLog {
    entries: Mutex<Vec<String>>,
}

impl EventLog {
    pub async fn attach(events: &DefaultEventManager) -> Arc<Self> {
        let log = Arc::new(Self::default());
        let sink = log.clone();
        events
            .register_sync_type_handler::<PluginEvent, _>(move |event: &PluginEvent| {
                sink.entries
                    .lock()
                    .unwrap()
                    .push(format!("{} {}", event.name(), event.subject()));
                Ok(())
            })
            .await;
        log
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries.lock().unwrap().iter().filter(|e| *e == entry).count()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

/// In-memory store whose saves can be made to fail
#[derive(Debug, Default)]
pub struct SwitchableStateStore {
    inner: MemoryPluginStateStore,
    failing: AtomicBool,
}

impl SwitchableStateStore {
    pub fn fail_saves(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl PluginStateStore for SwitchableStateStore {
    fn load(&self) -> StorageResult<PluginPersistentState> {
        self.inner.load()
    }

    fn save(&self, state: &PluginPersistentState) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageSystemError::OperationFailed {
                operation: "save".to_string(),
                path: None,
                message: "disk full".to_string(),
            });
        }
        self.inner.save(state)
    }
}

/// A manager over one plugin directory with an in-memory state store
pub struct Harness {
    pub dir: TempDir,
    pub recorder: Arc<Recorder>,
    pub events: Arc<DefaultEventManager>,
    pub store: Arc<SwitchableStateStore>,
    pub manager: Arc<DefaultPluginManager>,
}

impl Harness {
    pub fn plugin_dir(&self) -> PathBuf {
        self.dir.path().join("plugins")
    }

    pub fn new() -> Self {
        Self::with_store(MemoryPluginStateStore::new())
    }

    pub fn with_store(store: MemoryPluginStateStore) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let plugins = dir.path().join("plugins");
        std::fs::create_dir_all(&plugins).unwrap();
        let recorder = Arc::new(Recorder::default());
        let events = Arc::new(DefaultEventManager::new());
        let store = Arc::new(SwitchableStateStore {
            inner: store,
            failing: AtomicBool::new(false),
        });
        let factories = default_plugin_factories(DEFAULT_DESCRIPTOR_FILE_NAME);
        let manager = DefaultPluginManager::builder(store.clone(), module_factory(&recorder), events.clone())
            .loader(Arc::new(DirectoryPluginLoader::new(&plugins, factories.clone())))
            .installer(Arc::new(FilePluginInstaller::new(&plugins)))
            .plugin_factories(factories)
            .build();
        Self {
            dir,
            recorder,
            events,
            store,
            manager: Arc::new(manager),
        }
    }

    /// Writes `<key>.json` into the plugin directory
    pub fn add_descriptor(&self, key: &str, descriptor: &Value) -> PathBuf {
        write_descriptor(&self.plugin_dir(), &format!("{}.json", key), descriptor)
    }
}
