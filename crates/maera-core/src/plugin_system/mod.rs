//! # Maera Core Plugin System
//!
//! Everything between a plugin artifact on disk and an enabled plugin whose
//! modules are live: descriptor parsing, plugin factories, loaders,
//! dependency ordering, persisted enablement and the manager that drives
//! the lifecycle.
//!
//! ## Key Submodules and Responsibilities:
//!
//! - **[`artifact`]**: the delivered forms of a plugin (jar on disk,
//!   descriptor file, in-memory bytes).
//! - **[`descriptor`]**: parses `maera-plugin.json` into a [`Plugin`].
//! - **[`module`]** and **[`module_factory`]**: module descriptors, the
//!   host's module type registry and its allow-list.
//! - **[`factory`]**: turns an artifact into a plugin of the right kind.
//! - **[`loader`]**: directory, single-artifact and bundled-zip loaders.
//! - **[`installer`]**: writes artifacts where a loader will find them.
//! - **[`dependency`]**: enable ordering and dependent lookup.
//! - **[`manager`]**: [`DefaultPluginManager`] and its traits.
//! - **[`hot_deploy`]**: periodic directory rescans.
//! - **[`registry`]**: the manager's plugin table.
//! - **[`version`]**: version ranges used by dependencies.
pub mod artifact;
pub mod context;
pub mod dependency;
pub mod descriptor;
pub mod error;
pub mod factory;
pub mod hot_deploy;
pub mod installer;
pub mod loader;
pub mod manager;
pub mod module;
pub mod module_factory;
pub mod plugin;
pub mod registry;
pub mod version;

pub use artifact::{ArtifactKind, PluginArtifact, PluginArtifactFactory};
pub use context::PluginContext;
pub use dependency::PluginDependency;
pub use error::{PluginResult, PluginSystemError};
pub use hot_deploy::HotDeployer;
pub use manager::{DefaultPluginManager, PluginAccessor, PluginController, PluginLifecycle};
pub use module::{Module, ModuleDescriptor, ModuleInfo, StateAware};
pub use module_factory::ModuleDescriptorFactory;
pub use plugin::{Plugin, PluginKind, PluginState, PluginSummary};
pub use registry::PluginRegistry;
pub use version::VersionRange;

#[cfg(test)]
mod tests;
