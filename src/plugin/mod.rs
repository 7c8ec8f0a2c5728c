//! External plugin support.
//!
//! Plugins are standalone executables that speak line-delimited JSON over
//! stdio. They are discovered through registries, installed from release
//! archives into the plugins directory, verified against the manifest on
//! load, and started lazily the first time a hook needs them.

pub mod archive;
pub mod checksum;
pub mod error;
pub mod hooks;
pub mod installer;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod platform;
pub mod process;
pub mod registry;
mod store;

#[cfg(test)]
mod test_support;

pub use error::{PluginError, Result};
pub use hooks::HookResult;
pub use installer::Installer;
pub use loader::{
    LoadedPlugin, PendingPluginConfig, PluginErrorKind, PluginHost, PluginLoadError, PluginLoadState,
};
pub use manager::{PluginListEntry, PluginManager, PluginStatus, UpdateResult};
pub use manifest::{InstalledPlugin, Manifest};
pub use platform::Platform;
pub use process::{PluginHandle, PluginLauncher, ProcessLauncher};
pub use registry::{PluginInfo, Registry, RegistryConfig, RegistryEntry, RegistryService};
