//! Module descriptors: the typed, individually switchable units a plugin
//! contributes.
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use log::{debug, warn};
use serde::Serialize;

use crate::plugin_system::context::PluginContext;
use crate::plugin_system::error::{PluginResult, PluginSystemError};
use crate::plugin_system::plugin::Resources;

/// Module implementation created by a registered module type.
pub trait Module: Send + Sync + fmt::Debug {
    /// Called once, after the module's descriptor has been parsed
    fn init(&mut self, _info: &ModuleInfo) -> PluginResult<()> {
        Ok(())
    }

    /// Modules that react to being switched on and off return themselves here
    fn as_state_aware(&self) -> Option<&dyn StateAware> {
        None
    }

    /// Called when the owning plugin is discarded
    fn destroy(&mut self) {}

    fn as_any(&self) -> &dyn Any;
}

/// Enable/disable callbacks for a module.
pub trait StateAware: Send + Sync {
    fn enabled(&self, context: &PluginContext) -> PluginResult<()>;
    fn disabled(&self, context: &PluginContext);
}

/// Descriptor metadata for one module.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModuleInfo {
    pub plugin_key: String,
    pub key: String,
    pub module_type: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub i18n_name_key: Option<String>,
    pub class_name: Option<String>,
    pub enabled_by_default: bool,
    pub system: bool,
    pub params: HashMap<String, String>,
    #[serde(skip)]
    pub resources: Resources,
    pub min_runtime_version: Option<String>,
}

impl ModuleInfo {
    /// `plugin_key:module_key`
    pub fn complete_key(&self) -> String {
        format!("{}:{}", self.plugin_key, self.key)
    }
}

/// Splits a complete key into plugin key and module key.
pub fn split_complete_key(complete_key: &str) -> PluginResult<(&str, &str)> {
    match complete_key.split_once(':') {
        Some((plugin, module)) if !plugin.is_empty() && !module.is_empty() => Ok((plugin, module)),
        _ => Err(PluginSystemError::ModuleNotFound(format!(
            "'{}' is not a complete key (expected plugin:module)",
            complete_key
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModuleState {
    Disabled,
    Enabled,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// A parsed module together with its implementation and state.
#[derive(Debug)]
pub struct ModuleDescriptor {
    info: ModuleInfo,
    state: ModuleState,
    module: Box<dyn Module>,
}

impl ModuleDescriptor {
    /// Runs the module's `init` hook and wraps it in a disabled descriptor.
    pub fn new(info: ModuleInfo, mut module: Box<dyn Module>) -> PluginResult<Self> {
        let complete_key = info.complete_key();
        module.init(&info).map_err(|e| {
            PluginSystemError::parse(&complete_key, format!("Module init failed: {}", e))
        })?;
        Ok(Self {
            info,
            state: ModuleState::Disabled,
            module,
        })
    }

    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    pub fn key(&self) -> &str {
        &self.info.key
    }

    pub fn complete_key(&self) -> String {
        self.info.complete_key()
    }

    pub fn module_type(&self) -> &str {
        &self.info.module_type
    }

    pub fn is_enabled_by_default(&self) -> bool {
        self.info.enabled_by_default
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state == ModuleState::Enabled
    }

    pub fn module(&self) -> &dyn Module {
        self.module.as_ref()
    }

    /// Downcast the implementation to its concrete type.
    pub fn module_as<T: 'static>(&self) -> Option<&T> {
        self.module.as_any().downcast_ref::<T>()
    }

    /// Switches the module on, calling its `enabled` hook in plugin scope.
    /// A panicking hook is reported as an error.
    pub(crate) fn enable(&mut self, context: &PluginContext) -> PluginResult<()> {
        if self.is_enabled() {
            return Ok(());
        }
        if let Some(aware) = self.module.as_state_aware() {
            let _scope = context.enter();
            match catch_unwind(AssertUnwindSafe(|| aware.enabled(context))) {
                Ok(result) => result.map_err(|e| {
                    PluginSystemError::module(self.info.complete_key(), "enable", e.to_string())
                })?,
                Err(payload) => {
                    return Err(PluginSystemError::module(
                        self.info.complete_key(),
                        "enable",
                        format!("panicked: {}", panic_message(payload.as_ref())),
                    ));
                }
            }
        }
        self.state = ModuleState::Enabled;
        debug!("Enabled module {}", self.info.complete_key());
        Ok(())
    }

    /// Switches the module off. Hook failures are logged, never propagated.
    pub(crate) fn disable(&mut self, context: &PluginContext) {
        if !self.is_enabled() {
            return;
        }
        if let Some(aware) = self.module.as_state_aware() {
            let _scope = context.enter();
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| aware.disabled(context))) {
                warn!(
                    "Module {} panicked while disabling: {}",
                    self.info.complete_key(),
                    panic_message(payload.as_ref())
                );
            }
        }
        self.state = ModuleState::Disabled;
        debug!("Disabled module {}", self.info.complete_key());
    }

    pub(crate) fn destroy(&mut self) {
        self.module.destroy();
    }
}
