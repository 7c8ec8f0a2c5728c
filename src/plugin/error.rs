//! Error types for installation, registry and manager operations.

use std::path::PathBuf;

/// Error type for plugin installation and catalog operations.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error(
        "Plugin '{name}' requires SDK version {required}, but this host provides {current}. \
         Upgrade the host or install an older release of the plugin."
    )]
    SdkIncompatible {
        name: String,
        required: u32,
        current: u32,
    },

    #[error("Download failed for {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Checksum mismatch for {subject}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        subject: String,
        expected: String,
        actual: String,
    },

    #[error("Archive entry '{entry}' escapes the extraction directory")]
    PathTraversal { entry: String },

    #[error("Archive entry '{entry}' exceeds the maximum extracted size of {limit} bytes")]
    FileTooLarge { entry: String, limit: u64 },

    #[error("Unsupported archive format: {0}")]
    UnsupportedArchive(String),

    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("No binary for plugin '{name}' found in archive (looked for: {candidates})")]
    BinaryNotFound { name: String, candidates: String },

    #[error("Cannot read plugin binary {path}: {reason}")]
    BinaryUnreadable { path: PathBuf, reason: String },

    #[error("Plugin '{name}' is already installed (version {version})")]
    AlreadyInstalled { name: String, version: String },

    #[error("Plugin '{0}' is not installed")]
    NotInstalled(String),

    #[error("Plugin '{0}' not found in any enabled registry")]
    PluginNotFound(String),

    #[error("Failed to fetch registry '{name}': {reason}")]
    RegistryFetchFailed { name: String, reason: String },

    #[error("Registry '{0}' already exists")]
    RegistryExists(String),

    #[error("Registry '{0}' not found")]
    RegistryNotFound(String),

    #[error("Registry '{0}' is built in and cannot be modified")]
    ReservedRegistry(String),

    #[error("Invalid registry: {0}")]
    InvalidRegistry(String),

    #[error("Invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PluginError>;
