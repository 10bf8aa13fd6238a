//! # Maera Core Container Errors
//!
//! [`ContainerError`] covers framework creation and startup, bundle
//! installation and resolution, host package export computation and the
//! bundle cache.
use std::path::PathBuf;

use thiserror::Error;

use crate::container::framework::BundleId;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Bundle container is not running (state: {state})")]
    NotRunning { state: String },

    #[error("No framework factory named '{0}' is registered")]
    FactoryNotFound(String),

    #[error("Framework bootstrap resource is empty or invalid: {0}")]
    InvalidBootstrap(String),

    #[error("Framework '{framework}' is unsupported: {reason}")]
    UnsupportedFramework { framework: String, reason: String },

    #[error("Framework did not start within {seconds}s")]
    StartTimeout { seconds: u64 },

    #[error("Framework failed: {0}")]
    FrameworkFailure(String),

    #[error("Invalid bundle '{location}': {message}")]
    InvalidBundle { location: String, message: String },

    #[error("Bundle {0} not found")]
    BundleNotFound(BundleId),

    #[error("Bundle '{bundle}' cannot be resolved: missing package(s) {}", .missing.join(", "))]
    Unresolved { bundle: String, missing: Vec<String> },

    #[error("Package '{package}' would be exported without a version, which breaks bundles importing it")]
    UnversionedOverride { package: String },

    #[error("Invalid package pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Invalid runtime package list: {0}")]
    InvalidRuntimePackages(String),

    #[error("I/O error during '{operation}' on '{path}': {source}")]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Shorthand for container results
pub type ContainerResult<T> = std::result::Result<T, ContainerError>;

impl ContainerError {
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: PathBuf) -> Self {
        ContainerError::Io {
            operation: operation.into(),
            path,
            source,
        }
    }
}
