//! Plugin system error types.

use thiserror::Error;

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors that can occur during plugin operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Plugin could not be loaded (missing, factory failed or panicked).
    #[error("Failed to load plugin '{plugin}': {reason}")]
    Load { plugin: String, reason: String },

    /// No action is registered under the path.
    #[error("No action registered for '{0}'")]
    ActionNotFound(String),

    /// Plugin name is not allowed.
    #[error("Invalid plugin name '{0}'")]
    InvalidName(String),

    /// An external plugin broke the describe/invoke contract.
    #[error("Plugin '{plugin}' protocol error: {reason}")]
    Protocol { plugin: String, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed plugin JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PluginError {
    pub(crate) fn load(plugin: &str, reason: impl Into<String>) -> Self {
        Self::Load { plugin: plugin.to_string(), reason: reason.into() }
    }

    pub(crate) fn protocol(plugin: &str, reason: impl Into<String>) -> Self {
        Self::Protocol { plugin: plugin.to_string(), reason: reason.into() }
    }
}
