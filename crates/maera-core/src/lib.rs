pub mod container;
pub mod event;
pub mod kernel;
pub mod plugin_system;
pub mod storage;
pub mod utils;

// Re-export the types hosts use most
pub use container::{ContainerError, ContainerManager};
pub use event::{ContainerEvent, DefaultEventManager, Event, EventManager, FrameworkEvent, PluginEvent};
pub use kernel::PluginFramework;
pub use kernel::error::Error as KernelError;
pub use plugin_system::{
    DefaultPluginManager, ModuleDescriptorFactory, Plugin, PluginAccessor, PluginController, PluginLifecycle,
    PluginState, PluginSummary, PluginSystemError,
};
pub use storage::FrameworkConfig;
