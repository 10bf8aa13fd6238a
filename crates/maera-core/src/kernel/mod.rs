//! # Maera Core Kernel
//!
//! The `kernel` module ties the subsystems together.
//!
//! - **Bootstrap**: [`PluginFramework`](bootstrap::PluginFramework) builds
//!   every component from a [`FrameworkConfig`](crate::storage::FrameworkConfig)
//!   and runs their lifecycle.
//! - **Component lifecycle**: the [`KernelComponent`](component::KernelComponent)
//!   trait and the [`DependencyRegistry`](component::DependencyRegistry) that
//!   holds components in start order.
//! - **Constants**: framework-wide defaults in [`constants`].
//! - **Errors**: the umbrella [`Error`](error::Error) and its `Result` alias.
pub mod bootstrap;
pub mod component;
pub mod constants;
pub mod error;

pub use bootstrap::PluginFramework;
pub use component::{DependencyRegistry, KernelComponent};
pub use error::{Error, Result};
