//! Error types for the OWS configuration engine.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using ConfigError.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// The single error family raised while loading, expanding and readying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    // === Configuration Errors ===
    /// Malformed configuration, or a database-backed validation failure.
    #[error("{0}")]
    Config(String),

    /// A declared-unready value was read before its entry was made ready.
    #[error("The following parameters of {context} have not been initialised: {}", .names.join(", "))]
    NotReady { context: String, names: Vec<String> },

    /// A keyed cross-reference (inherited layer or style) could not be resolved.
    #[error("{0}")]
    EntryNotFound(String),

    // === Source Errors ===
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid YAML in {path:?}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl ConfigError {
    /// Shorthand for a malformed-configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        ConfigError::Config(message.into())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, ConfigError::Config(_))
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, ConfigError::NotReady { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ConfigError::EntryNotFound(_))
    }

    /// Get the HTTP status code a request handler should answer with when
    /// configuration is unusable.
    ///
    /// Readiness failures mean the live index was never reached, which is a
    /// server-side fault. Everything else is a defect in the configuration the
    /// request depended on.
    pub fn http_status_code(&self) -> u16 {
        match self {
            ConfigError::NotReady { .. } | ConfigError::Io { .. } => 500,
            ConfigError::Config(_)
            | ConfigError::EntryNotFound(_)
            | ConfigError::Json { .. }
            | ConfigError::Yaml { .. } => 400,
        }
    }
}
