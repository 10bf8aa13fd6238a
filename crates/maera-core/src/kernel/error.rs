//! # Maera Core Kernel Errors
//!
//! Defines the umbrella error type for the Maera plugin framework.
//!
//! Every subsystem owns a typed error enum ([`PluginSystemError`],
//! [`EventSystemError`], [`StorageSystemError`], [`ContainerError`]); this
//! module folds them into [`Error`] so lifecycle operations can use `?`
//! across subsystem boundaries.
use std::path::PathBuf;
use std::result::Result as StdResult;

use crate::container::error::ContainerError;
use crate::event::error::EventSystemError;
use crate::plugin_system::error::PluginSystemError;
use crate::storage::error::StorageSystemError;
use thiserror::Error as ThisError;

/// Custom error type for the Maera framework
#[derive(Debug, ThisError)]
pub enum Error {
    /// Specific, typed plugin system error
    #[error("Plugin system error: {0}")]
    PluginSystem(#[from] PluginSystemError),

    /// Specific, typed storage system error
    #[error("Storage system error: {0}")]
    StorageSystem(#[from] StorageSystemError),

    #[error("Event system error: {0}")]
    EventSystem(#[from] EventSystemError),

    /// Bundle container error
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    /// Error occurring during a specific kernel lifecycle phase.
    #[error("Kernel lifecycle error during {phase:?}: {message}")]
    KernelLifecycleError {
        phase: KernelLifecyclePhase,
        component_name: Option<String>,
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    /// Invalid or incomplete framework configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with message
    #[error("Error: {0}")]
    Other(String),
}

/// Represents a specific phase in the kernel's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum KernelLifecyclePhase {
    #[error("Bootstrap")]
    Bootstrap,
    #[error("Initialize")]
    Initialize,
    #[error("Start")]
    Start,
    #[error("Shutdown")]
    Shutdown,
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

// Prefer `Error::io` where the path is known.
impl From<std::io::Error> for Error {
    fn from(io_err: std::io::Error) -> Self {
        Error::StorageSystem(StorageSystemError::Io {
            source: io_err,
            path: PathBuf::new(),
            operation: "unknown".to_string(),
        })
    }
}

impl Error {
    /// Wraps an I/O error with the failing operation and path.
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: PathBuf) -> Self {
        Error::StorageSystem(StorageSystemError::io(source, operation, path))
    }

    /// Builds a lifecycle error for `phase` without an underlying cause.
    pub fn lifecycle(phase: KernelLifecyclePhase, message: impl Into<String>) -> Self {
        Error::KernelLifecycleError {
            phase,
            component_name: None,
            message: message.into(),
            source: None,
        }
    }

    /// True when the error was raised because an operation was attempted in
    /// the wrong lifecycle state (double init, container not running, ...).
    pub fn is_illegal_state(&self) -> bool {
        matches!(
            self,
            Error::PluginSystem(PluginSystemError::IllegalState(_))
                | Error::Container(ContainerError::NotRunning { .. })
                | Error::KernelLifecycleError { .. }
        )
    }
}
