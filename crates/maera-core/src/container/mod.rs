//! # Maera Core Bundle Container
//!
//! Hosts bundle plugins inside a [`Framework`](framework::Framework) and
//! controls what the host exposes to them.
//!
//! - **[`manager`]**: [`ContainerManager`], the lifecycle owner.
//! - **[`framework`]**: the framework seam, factories and bootstrap parsing.
//! - **[`embedded`]**: the built-in in-process framework.
//! - **[`exports`]** and **[`scanner`]**: host package export computation.
//! - **[`cache`]**: the bundle cache keyed by the export string.
//! - **[`host`]**: host components published as services.
//! - **[`tracker`]**: service trackers.
//! - **[`manifest`]**: bundle manifest parsing.
pub mod cache;
pub mod embedded;
pub mod error;
pub mod exports;
pub mod framework;
pub mod host;
pub mod manager;
pub mod manifest;
pub mod scanner;
pub mod tracker;

pub use error::{ContainerError, ContainerResult};
pub use framework::{BundleId, BundleInfo, BundleState, Framework, FrameworkFactory};
pub use manager::{ContainerManager, ContainerState};
pub use tracker::ServiceTracker;

#[cfg(test)]
mod tests;
