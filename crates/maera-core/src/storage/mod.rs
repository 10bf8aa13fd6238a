//! # Maera Core Storage
//!
//! Filesystem access, framework configuration and persisted plugin state.
pub mod config;
pub mod error;
pub mod local;
pub mod provider;
pub mod state;

pub use config::{ConfigFormat, ContainerConfig, FrameworkConfig, PackageScannerConfig};
pub use local::LocalStorageProvider;
pub use provider::StorageProvider;
pub use state::{
    FilePluginStateStore, MemoryPluginStateStore, PluginPersistentState, PluginStateStore,
};
