use std::any::Any;

use crate::event::Event;

/// Framework lifecycle events published by the plugin manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameworkEvent {
    /// Published before any plugin is loaded; infrastructure starts here
    Starting,
    /// All plugins have been loaded and enabled
    Started,
    /// Published before plugins are disabled for shutdown
    ShuttingDown,
    /// All plugins have been shut down; infrastructure stops here
    Shutdown,
    WarmRestarting,
    WarmRestarted,
}

impl FrameworkEvent {
    pub const STARTING: &'static str = "framework.starting";
    pub const STARTED: &'static str = "framework.started";
    pub const SHUTTING_DOWN: &'static str = "framework.shutting_down";
    pub const SHUTDOWN: &'static str = "framework.shutdown";
    pub const WARM_RESTARTING: &'static str = "framework.warm_restarting";
    pub const WARM_RESTARTED: &'static str = "framework.warm_restarted";
}

impl Event for FrameworkEvent {
    fn name(&self) -> &'static str {
        match self {
            FrameworkEvent::Starting => Self::STARTING,
            FrameworkEvent::Started => Self::STARTED,
            FrameworkEvent::ShuttingDown => Self::SHUTTING_DOWN,
            FrameworkEvent::Shutdown => Self::SHUTDOWN,
            FrameworkEvent::WarmRestarting => Self::WARM_RESTARTING,
            FrameworkEvent::WarmRestarted => Self::WARM_RESTARTED,
        }
    }

    fn clone_event(&self) -> Box<dyn Event> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Plugin and module state change notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginEvent {
    Installed { plugin_key: String },
    Enabled { plugin_key: String },
    Disabled { plugin_key: String },
    Uninstalled { plugin_key: String },
    ModuleEnabled { complete_key: String },
    ModuleDisabled { complete_key: String },
}

impl PluginEvent {
    pub const INSTALLED: &'static str = "plugin.installed";
    pub const ENABLED: &'static str = "plugin.enabled";
    pub const DISABLED: &'static str = "plugin.disabled";
    pub const UNINSTALLED: &'static str = "plugin.uninstalled";
    pub const MODULE_ENABLED: &'static str = "plugin.module_enabled";
    pub const MODULE_DISABLED: &'static str = "plugin.module_disabled";

    /// Plugin key or module complete key this event is about
    pub fn subject(&self) -> &str {
        match self {
            PluginEvent::Installed { plugin_key }
            | PluginEvent::Enabled { plugin_key }
            | PluginEvent::Disabled { plugin_key }
            | PluginEvent::Uninstalled { plugin_key } => plugin_key,
            PluginEvent::ModuleEnabled { complete_key }
            | PluginEvent::ModuleDisabled { complete_key } => complete_key,
        }
    }
}

impl Event for PluginEvent {
    fn name(&self) -> &'static str {
        match self {
            PluginEvent::Installed { .. } => Self::INSTALLED,
            PluginEvent::Enabled { .. } => Self::ENABLED,
            PluginEvent::Disabled { .. } => Self::DISABLED,
            PluginEvent::Uninstalled { .. } => Self::UNINSTALLED,
            PluginEvent::ModuleEnabled { .. } => Self::MODULE_ENABLED,
            PluginEvent::ModuleDisabled { .. } => Self::MODULE_DISABLED,
        }
    }

    fn clone_event(&self) -> Box<dyn Event> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Bundle container lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    Started,
    /// Always published when the container stops, even if the framework failed to stop cleanly
    Stopped,
}

impl ContainerEvent {
    pub const STARTED: &'static str = "container.started";
    pub const STOPPED: &'static str = "container.stopped";
}

impl Event for ContainerEvent {
    fn name(&self) -> &'static str {
        match self {
            ContainerEvent::Started => Self::STARTED,
            ContainerEvent::Stopped => Self::STOPPED,
        }
    }

    fn clone_event(&self) -> Box<dyn Event> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
