//! Runtime host for configured plugins.
//!
//! Plugins listed (and enabled) in the host configuration are registered as
//! pending at startup and started lazily, at most once per name, the first
//! time a hook needs them. Each name moves through a small state machine:
//!
//! ```text
//! Pending -> Loading -> Loaded
//!                    -> Failed   (cached for the life of the host)
//!         <- Loading             (the loading caller was cancelled)
//! ```
//!
//! Concurrent callers for the same name wait on the single load in flight and
//! observe its outcome. Names never registered are reported as
//! `NotRegistered` without touching any state.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use shipwright_plugin_sdk::{ConfigMap, Hook, Info, ValidationError};

use crate::config::HostConfig;
use crate::plugin::checksum::{checksums_match, sha256_file};
use crate::plugin::hooks::config_has_hook;
use crate::plugin::manifest::Manifest;
use crate::plugin::process::{PluginHandle, PluginLauncher, ProcessLauncher};
use crate::utils::paths::PluginPaths;

/// Timeout applied to `Execute` calls when the configuration sets none.
pub const DEFAULT_PLUGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on starting a plugin and completing its handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Kinds of plugin loading errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginErrorKind {
    /// The name is not an enabled plugin in the host configuration.
    NotRegistered,
    /// The configured name contains path separators.
    InvalidName,
    /// The binary on disk does not match the manifest checksum.
    ChecksumMismatch { expected: String, actual: String },
    /// The binary could not be read for verification.
    BinaryUnreadable,
    /// The manifest exists but could not be read or parsed.
    ManifestUnreadable,
    /// The plugin rejected its configuration.
    InvalidConfiguration { errors: Vec<ValidationError> },
    /// The process could not be started or answered the handshake badly.
    HandshakeFailed,
}

/// Error when loading a plugin.
#[derive(Debug, Clone)]
pub struct PluginLoadError {
    /// Name of the plugin that failed.
    pub plugin_name: String,
    /// Category of the error.
    pub error_kind: PluginErrorKind,
    /// Human-readable error message.
    pub message: String,
}

impl PluginLoadError {
    fn new(plugin_name: &str, error_kind: PluginErrorKind, message: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.to_string(),
            error_kind,
            message: message.into(),
        }
    }

    fn not_registered(plugin_name: &str) -> Self {
        Self::new(
            plugin_name,
            PluginErrorKind::NotRegistered,
            format!("Plugin '{}' is not registered or not enabled", plugin_name),
        )
    }
}

impl fmt::Display for PluginLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for PluginLoadError {}

/// Host configuration for one plugin, as registered at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPluginConfig {
    pub name: String,
    pub path: PathBuf,
    pub config: ConfigMap,
    /// Explicit hook names. When set, the plugin's declared hooks are ignored.
    pub hooks: Option<Vec<String>>,
    pub timeout: Option<Duration>,
}

/// A started plugin that passed its handshake.
pub struct LoadedPlugin {
    pub name: String,
    pub handle: Arc<dyn PluginHandle>,
    /// What the plugin declared about itself.
    pub info: Info,
    pub timeout: Duration,
}

impl fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("name", &self.name)
            .field("info", &self.info)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Observable load state of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginLoadState {
    Pending,
    Loading,
    Loaded,
    Failed,
}

enum Slot {
    Pending,
    /// Closed when the load finishes or is abandoned.
    Loading(watch::Receiver<()>),
    Loaded(Arc<LoadedPlugin>),
    Failed(PluginLoadError),
}

impl Slot {
    fn state(&self) -> PluginLoadState {
        match self {
            Slot::Pending => PluginLoadState::Pending,
            Slot::Loading(_) => PluginLoadState::Loading,
            Slot::Loaded(_) => PluginLoadState::Loaded,
            Slot::Failed(_) => PluginLoadState::Failed,
        }
    }
}

#[derive(Default)]
struct HostState {
    /// Registration order, which is also dispatch order.
    order: Vec<String>,
    pending: HashMap<String, PendingPluginConfig>,
    slots: HashMap<String, Slot>,
}

enum Claim {
    Ready(Result<Arc<LoadedPlugin>, PluginLoadError>),
    Wait(watch::Receiver<()>),
    Load(PendingPluginConfig, watch::Sender<()>),
}

/// Candidate for a hook dispatch, decided under the state lock.
enum Candidate {
    Loaded(String, Arc<LoadedPlugin>),
    Load(String),
}

pub struct PluginHost {
    manifest_path: PathBuf,
    launcher: Arc<dyn PluginLauncher>,
    handshake_timeout: Duration,
    state: RwLock<HostState>,
}

impl PluginHost {
    pub fn new(manifest_path: impl Into<PathBuf>, launcher: Arc<dyn PluginLauncher>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            launcher,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            state: RwLock::new(HostState::default()),
        }
    }

    /// Host that runs plugins as child processes, with every enabled plugin
    /// from `config` registered.
    pub fn from_config(config: &HostConfig, paths: &PluginPaths) -> Self {
        let host = Self::new(&paths.manifest_path, Arc::new(ProcessLauncher));
        host.register_plugins(config.pending_plugins(paths));
        host
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Register plugins as pending, keeping their order. Names already
    /// registered are left untouched.
    pub fn register_plugins(&self, plugins: impl IntoIterator<Item = PendingPluginConfig>) {
        let mut state = self.state.write();
        for plugin in plugins {
            if state.pending.contains_key(&plugin.name) {
                warn!(plugin = %plugin.name, "Plugin registered twice, keeping the first entry");
                continue;
            }
            debug!(plugin = %plugin.name, path = %plugin.path.display(), "Registered plugin");
            state.order.push(plugin.name.clone());
            state.slots.insert(plugin.name.clone(), Slot::Pending);
            state.pending.insert(plugin.name.clone(), plugin);
        }
    }

    /// Load state of every registered plugin, in registration order.
    pub fn plugin_states(&self) -> Vec<(String, PluginLoadState)> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|name| Some((name.clone(), state.slots.get(name)?.state())))
            .collect()
    }

    /// Return the loaded plugin, starting it on first use.
    pub async fn ensure_plugin_loaded(&self, name: &str) -> Result<Arc<LoadedPlugin>, PluginLoadError> {
        loop {
            match self.claim(name) {
                Claim::Ready(result) => return result,
                Claim::Wait(mut done) => {
                    // Errs once the loader drops its sender; the slot is then settled.
                    let _ = done.changed().await;
                }
                Claim::Load(config, done) => {
                    let guard = LoadGuard {
                        state: &self.state,
                        name,
                        settled: false,
                        _done: done,
                    };
                    let result = self.load_plugin(&config).await.map(Arc::new);
                    guard.settle(&result);
                    return result;
                }
            }
        }
    }

    fn claim(&self, name: &str) -> Claim {
        {
            let state = self.state.read();
            match state.slots.get(name) {
                Some(Slot::Loaded(plugin)) => return Claim::Ready(Ok(plugin.clone())),
                Some(Slot::Failed(error)) => return Claim::Ready(Err(error.clone())),
                Some(Slot::Loading(done)) => return Claim::Wait(done.clone()),
                Some(Slot::Pending) => {}
                None => return Claim::Ready(Err(PluginLoadError::not_registered(name))),
            }
        }

        let mut state = self.state.write();
        match state.slots.get(name) {
            Some(Slot::Pending) => {}
            Some(Slot::Loaded(plugin)) => return Claim::Ready(Ok(plugin.clone())),
            Some(Slot::Failed(error)) => return Claim::Ready(Err(error.clone())),
            Some(Slot::Loading(done)) => return Claim::Wait(done.clone()),
            None => return Claim::Ready(Err(PluginLoadError::not_registered(name))),
        }
        let Some(config) = state.pending.get(name).cloned() else {
            return Claim::Ready(Err(PluginLoadError::not_registered(name)));
        };

        let (done_tx, done_rx) = watch::channel(());
        state.slots.insert(name.to_string(), Slot::Loading(done_rx));
        Claim::Load(config, done_tx)
    }

    async fn load_plugin(&self, config: &PendingPluginConfig) -> Result<LoadedPlugin, PluginLoadError> {
        let name = config.name.as_str();

        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(PluginLoadError::new(
                name,
                PluginErrorKind::InvalidName,
                format!("Invalid plugin name '{}': must not contain path separators", name),
            ));
        }

        self.verify_binary(config).await?;

        let result = tokio::time::timeout(self.handshake_timeout, self.handshake(config)).await;
        let loaded = match result {
            Ok(Ok(loaded)) => loaded,
            Ok(Err(e)) => {
                warn!(plugin = %name, error = %e, "Plugin failed to load");
                return Err(e);
            }
            Err(_) => {
                warn!(plugin = %name, "Plugin handshake timed out");
                return Err(PluginLoadError::new(
                    name,
                    PluginErrorKind::HandshakeFailed,
                    format!(
                        "Plugin '{}' handshake timed out after {:?}",
                        name, self.handshake_timeout
                    ),
                ));
            }
        };

        info!(
            plugin = %name,
            version = %loaded.info.version,
            hooks = ?loaded.info.hooks,
            "Loaded plugin"
        );
        Ok(loaded)
    }

    /// Check the binary against the manifest before it is ever executed.
    async fn verify_binary(&self, config: &PendingPluginConfig) -> Result<(), PluginLoadError> {
        let name = config.name.as_str();

        let manifest = Manifest::load(&self.manifest_path).map_err(|e| {
            PluginLoadError::new(
                name,
                PluginErrorKind::ManifestUnreadable,
                format!("Cannot verify plugin '{}': {}", name, e),
            )
        })?;

        let expected = match manifest.as_ref().and_then(|m| m.get(name)) {
            Some(entry) if !entry.checksum.trim().is_empty() => entry.checksum.clone(),
            Some(_) => {
                debug!(plugin = %name, "Manifest entry has no checksum, skipping verification");
                return Ok(());
            }
            None => {
                debug!(plugin = %name, "Plugin not in manifest, skipping verification");
                return Ok(());
            }
        };

        let path = config.path.clone();
        let actual = tokio::task::spawn_blocking(move || sha256_file(&path))
            .await
            .map_err(std::io::Error::other)
            .and_then(|hashed| hashed)
            .map_err(|e| {
                PluginLoadError::new(
                    name,
                    PluginErrorKind::BinaryUnreadable,
                    format!("Cannot read plugin binary {}: {}", config.path.display(), e),
                )
            })?;

        if !checksums_match(&expected, &actual) {
            warn!(plugin = %name, expected = %expected, actual = %actual, "Plugin checksum mismatch");
            return Err(PluginLoadError::new(
                name,
                PluginErrorKind::ChecksumMismatch {
                    expected: expected.clone(),
                    actual: actual.clone(),
                },
                format!(
                    "Plugin '{}' checksum mismatch: expected {}, got {}",
                    name, expected, actual
                ),
            ));
        }

        debug!(plugin = %name, "Plugin checksum verified");
        Ok(())
    }

    async fn handshake(&self, config: &PendingPluginConfig) -> Result<LoadedPlugin, PluginLoadError> {
        let name = config.name.as_str();
        let handshake_failed = |stage: &str, e: &dyn fmt::Display| {
            PluginLoadError::new(
                name,
                PluginErrorKind::HandshakeFailed,
                format!("Plugin '{}' {}: {}", name, stage, e),
            )
        };

        let handle = self
            .launcher
            .launch(name, &config.path)
            .await
            .map_err(|e| handshake_failed("failed to start", &e))?;

        let info = match handle.get_info().await {
            Ok(info) => info,
            Err(e) => {
                handle.shutdown().await;
                return Err(handshake_failed("did not describe itself", &e));
            }
        };
        if info.name != name {
            debug!(plugin = %name, declared = %info.name, "Plugin declares a different name");
        }

        let validation = match handle.validate(&config.config).await {
            Ok(validation) => validation,
            Err(e) => {
                handle.shutdown().await;
                return Err(PluginLoadError::new(
                    name,
                    PluginErrorKind::InvalidConfiguration { errors: Vec::new() },
                    format!("Plugin '{}' rejected its configuration: {}", name, e),
                ));
            }
        };
        if !validation.valid {
            handle.shutdown().await;
            let details = validation
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(PluginLoadError::new(
                name,
                PluginErrorKind::InvalidConfiguration {
                    errors: validation.errors,
                },
                format!("Plugin '{}' has invalid configuration: {}", name, details),
            ));
        }

        Ok(LoadedPlugin {
            name: name.to_string(),
            handle,
            info,
            timeout: config.timeout.unwrap_or(DEFAULT_PLUGIN_TIMEOUT),
        })
    }

    /// Plugins that should receive `hook`, in registration order.
    ///
    /// Loaded plugins are matched by `config_has_hook`. Pending plugins are
    /// started only when their explicit hook list names `hook`; a plugin that
    /// fails to start is left out. Failed plugins are never retried.
    pub async fn collect_plugins_for_hook(&self, hook: Hook) -> Vec<(String, Arc<LoadedPlugin>)> {
        let candidates: Vec<Candidate> = {
            let state = self.state.read();
            state
                .order
                .iter()
                .filter_map(|name| {
                    let config = state.pending.get(name)?;
                    match state.slots.get(name)? {
                        Slot::Loaded(plugin) => config_has_hook(config, hook, Some(plugin.as_ref()))
                            .then(|| Candidate::Loaded(name.clone(), plugin.clone())),
                        Slot::Pending | Slot::Loading(_) => config_has_hook(config, hook, None)
                            .then(|| Candidate::Load(name.clone())),
                        Slot::Failed(_) => None,
                    }
                })
                .collect()
        };

        let resolved = candidates.into_iter().map(|candidate| async move {
            match candidate {
                Candidate::Loaded(name, plugin) => Some((name, plugin)),
                Candidate::Load(name) => match self.ensure_plugin_loaded(&name).await {
                    Ok(plugin) => Some((name, plugin)),
                    Err(e) => {
                        warn!(plugin = %name, hook = %hook, error = %e, "Skipping plugin for hook");
                        None
                    }
                },
            }
        });

        join_all(resolved).await.into_iter().flatten().collect()
    }

    /// Configuration fragment registered for `name`.
    pub(crate) fn plugin_config(&self, name: &str) -> ConfigMap {
        self.state
            .read()
            .pending
            .get(name)
            .map(|p| p.config.clone())
            .unwrap_or_default()
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Stop every started plugin process.
    pub async fn shutdown(&self) {
        let loaded: Vec<Arc<LoadedPlugin>> = {
            let state = self.state.read();
            state
                .slots
                .values()
                .filter_map(|slot| match slot {
                    Slot::Loaded(plugin) => Some(plugin.clone()),
                    _ => None,
                })
                .collect()
        };

        join_all(loaded.iter().map(|plugin| plugin.handle.shutdown())).await;
        debug!(count = loaded.len(), "Plugins shut down");
    }
}

/// Settles a `Loading` slot. If the load future is dropped before
/// [`LoadGuard::settle`], the slot goes back to `Pending` so the next caller
/// retries instead of inheriting a cancellation.
struct LoadGuard<'a> {
    state: &'a RwLock<HostState>,
    name: &'a str,
    settled: bool,
    /// Dropped after the slot is updated, waking waiters.
    _done: watch::Sender<()>,
}

impl LoadGuard<'_> {
    fn settle(mut self, result: &Result<Arc<LoadedPlugin>, PluginLoadError>) {
        let slot = match result {
            Ok(plugin) => Slot::Loaded(plugin.clone()),
            Err(error) => Slot::Failed(error.clone()),
        };
        self.state.write().slots.insert(self.name.to_string(), slot);
        self.settled = true;
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(plugin = %self.name, "Plugin load abandoned");
            self.state
                .write()
                .slots
                .insert(self.name.to_string(), Slot::Pending);
        }
    }
}
