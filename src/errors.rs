// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlugvisorError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("Plugin already registered: {0}")]
    DuplicatePlugin(String),

    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Plugin '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Plugin '{0}' requires root privileges (use --force to bypass)")]
    PermissionDenied(String),

    #[error("Failed to construct plugin '{name}': {source}")]
    PluginConstruction {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Plugin '{name}' failed: {source}")]
    PluginRuntime {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Process supervision error: {0}")]
    ProcessSupervision(String),

    #[error("IPC protocol error: {0}")]
    IpcProtocol(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PlugvisorError {
    pub fn runtime(name: &str, source: impl Into<anyhow::Error>) -> Self {
        PlugvisorError::PluginRuntime {
            name: name.to_string(),
            source: source.into(),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PlugvisorError>;
