// ABOUTME: Error types for the frpdeck core using thiserror.
// ABOUTME: One enum per component: codec, store, supervisor, and app config.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from converting settings to and from the agent's TOML language.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The text is not valid TOML.
    #[error("configuration text is not valid TOML: {0}")]
    Syntax(#[source] toml::de::Error),

    /// The text is valid TOML but does not describe usable settings.
    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },

    /// Settings could not be rendered as TOML.
    #[error("failed to render configuration: {0}")]
    Encode(#[source] toml::ser::Error),

    /// Failed to read a configuration file from disk.
    #[error("failed to read configuration from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write an agent file to disk.
    #[error("failed to write configuration to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CodecError {
    /// True when the text itself is malformed, as opposed to I/O or content problems.
    pub fn is_syntax(&self) -> bool {
        matches!(self, CodecError::Syntax(_))
    }
}

/// Errors from the configuration record store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Record names must contain non-whitespace characters.
    #[error("configuration name must not be empty")]
    EmptyName,

    /// Another record already uses this name.
    #[error("configuration name \"{0}\" already exists")]
    DuplicateName(String),

    /// No record has this id.
    #[error("configuration not found: {0}")]
    NotFound(String),

    /// The settings violate an agent invariant.
    #[error("invalid settings: {0}")]
    Invalid(String),

    /// Failed to serialize the snapshot.
    #[error("failed to serialize configurations: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Failed to write the snapshot to disk.
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from starting agent processes.
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The agent binary does not exist.
    #[error("agent binary not found at {0}")]
    BinaryNotFound(PathBuf),

    /// The agent configuration file does not exist.
    #[error("config file not found at {0}")]
    ConfigNotFound(PathBuf),

    /// The operating system refused to start the process.
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The supervisor task is no longer running.
    #[error("process supervisor is not running")]
    Unavailable,
}

/// Errors from loading or saving the application's own configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[source] toml::ser::Error),

    #[error("failed to write config to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not determine the {0} directory")]
    NoDirectory(&'static str),
}
