//! # Maera Core Plugin System Errors
//!
//! [`PluginSystemError`] is the typed error for descriptor parsing,
//! artifact access, loading, installation and lifecycle transitions.
//! Parse failures are kept distinct from I/O failures: a parse failure
//! turns one plugin unloadable, an I/O failure aborts the whole load.
use std::path::PathBuf;

use crate::plugin_system::dependency::DependencyError;
use crate::plugin_system::version::VersionError;

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemError {
    /// Malformed or unacceptable plugin descriptor
    #[error("Failed to parse plugin descriptor '{source_name}': {message}")]
    ParseError {
        source_name: String,
        message: String,
    },

    #[error("Plugin loading failed for '{artifact}': {source}")]
    LoadingError {
        artifact: String,
        path: Option<PathBuf>,
        #[source]
        source: Box<PluginSystemErrorSource>,
    },

    #[error("Plugin '{0}' not found")]
    PluginNotFound(String),

    #[error("Module '{0}' not found")]
    ModuleNotFound(String),

    #[error("Module '{complete_key}' failed during {operation}: {message}")]
    ModuleError {
        complete_key: String,
        operation: String,
        message: String,
    },

    #[error("Install failed for '{artifact}': {message}")]
    InstallError {
        artifact: String,
        message: String,
    },

    #[error("Native library error in plugin '{plugin_key}': {message}")]
    NativeLibrary {
        plugin_key: String,
        message: String,
    },

    #[error("Dependency resolution failed: {0}")]
    DependencyResolution(#[from] DependencyError),

    #[error("Version parsing error: {0}")]
    VersionParsing(#[from] VersionError),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Internal plugin system error: {0}")]
    InternalError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemErrorSource {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error("Other: {0}")]
    Other(String),
}

/// Shorthand for plugin system results
pub type PluginResult<T> = std::result::Result<T, PluginSystemError>;

impl PluginSystemError {
    pub fn parse(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        PluginSystemError::ParseError {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn loading(
        artifact: impl Into<String>,
        path: Option<PathBuf>,
        source: impl Into<PluginSystemErrorSource>,
    ) -> Self {
        PluginSystemError::LoadingError {
            artifact: artifact.into(),
            path,
            source: Box::new(source.into()),
        }
    }

    pub fn module(
        complete_key: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        PluginSystemError::ModuleError {
            complete_key: complete_key.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// True for descriptor problems, which degrade a plugin rather than abort a load
    pub fn is_parse_error(&self) -> bool {
        matches!(self, PluginSystemError::ParseError { .. })
    }

    /// Message without the variant prefix, as recorded on unloadable plugins
    pub fn detail(&self) -> String {
        match self {
            PluginSystemError::ParseError { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
