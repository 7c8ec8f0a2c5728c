//! Release plugin host: registry discovery, installation, and lazy loading
//! of stdio plugins dispatched on release lifecycle hooks.

pub mod config;
pub mod logging;
pub mod plugin;
pub mod utils;

pub use shipwright_plugin_sdk::{Hook, ReleaseContext};
