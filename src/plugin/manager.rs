//! Install, update and remove plugins from the merged registry catalog.
//!
//! The manager joins the catalog with the installed-plugin manifest. It is the
//! only writer of the manifest; concurrent mutating calls against the same
//! manifest path must be serialized by the caller.

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::HostConfig;
use crate::plugin::error::{PluginError, Result};
use crate::plugin::installer::Installer;
use crate::plugin::manifest::{InstalledPlugin, Manifest};
use crate::plugin::registry::{PluginInfo, Registry, RegistryEntry, RegistryService};
use crate::utils::paths::PluginPaths;

/// Installation state of a catalog plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginStatus {
    NotInstalled,
    /// Installed but disabled.
    Installed,
    Enabled,
    /// Enabled, and the catalog has a different version.
    UpdateAvailable,
}

impl PluginStatus {
    pub fn compute(installed: Option<&InstalledPlugin>, catalog_version: &str) -> Self {
        match installed {
            None => PluginStatus::NotInstalled,
            Some(plugin) if !plugin.enabled => PluginStatus::Installed,
            Some(plugin) if plugin.version != catalog_version => PluginStatus::UpdateAvailable,
            Some(_) => PluginStatus::Enabled,
        }
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PluginStatus::NotInstalled => "not installed",
            PluginStatus::Installed => "installed",
            PluginStatus::Enabled => "enabled",
            PluginStatus::UpdateAvailable => "update available",
        };
        f.write_str(label)
    }
}

/// A catalog entry joined with its manifest entry.
#[derive(Debug, Clone)]
pub struct PluginListEntry {
    pub info: PluginInfo,
    pub installed: Option<InstalledPlugin>,
    pub status: PluginStatus,
}

impl PluginListEntry {
    fn new(info: PluginInfo, installed: Option<InstalledPlugin>) -> Self {
        let status = PluginStatus::compute(installed.as_ref(), &info.version);
        Self {
            info,
            installed,
            status,
        }
    }
}

/// Outcome of updating one plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateResult {
    pub name: String,
    pub current_version: String,
    /// Empty when the catalog could not be consulted.
    pub latest_version: String,
    pub updated: bool,
    pub error: Option<String>,
}

pub struct PluginManager {
    installer: Installer,
    registry: RegistryService,
    manifest_path: PathBuf,
}

impl PluginManager {
    pub fn new(installer: Installer, registry: RegistryService, manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            installer,
            registry,
            manifest_path: manifest_path.into(),
        }
    }

    /// Manager over the standard directory layout.
    pub fn from_paths(paths: &PluginPaths, config: &HostConfig) -> Self {
        let installer = Installer::new(&paths.plugins_dir).with_token(config.github_token());
        let registry = RegistryService::new(&paths.registries_path, &paths.cache_dir);
        Self::new(installer, registry, &paths.manifest_path)
    }

    pub fn installer(&self) -> &Installer {
        &self.installer
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    fn load_manifest(&self) -> Result<Manifest> {
        Manifest::load_or_default(&self.manifest_path)
    }

    /// Every catalog plugin with its installation status.
    pub async fn list_available(&self, force_refresh: bool) -> Result<Vec<PluginListEntry>> {
        let catalog = self.registry.fetch(force_refresh).await;
        let manifest = self.load_manifest()?;

        Ok(catalog
            .plugins
            .into_iter()
            .map(|info| {
                let installed = manifest.get(&info.name).cloned();
                PluginListEntry::new(info, installed)
            })
            .collect())
    }

    /// Every installed plugin, including ones no registry lists any more.
    pub async fn list_installed(&self) -> Result<Vec<PluginListEntry>> {
        let manifest = self.load_manifest()?;
        if manifest.installed.is_empty() {
            return Ok(Vec::new());
        }
        let catalog = self.registry.fetch(false).await;

        Ok(manifest
            .installed
            .into_iter()
            .map(|installed| {
                let info = catalog
                    .get_plugin(&installed.name)
                    .cloned()
                    .unwrap_or_else(|| PluginInfo::delisted(&installed.name, &installed.version));
                PluginListEntry::new(info, Some(installed))
            })
            .collect())
    }

    /// Install the catalog version of `name`. The plugin starts disabled.
    pub async fn install(&self, name: &str) -> Result<InstalledPlugin> {
        let mut manifest = self.load_manifest()?;
        if let Some(existing) = manifest.get(name) {
            return Err(PluginError::AlreadyInstalled {
                name: existing.name.clone(),
                version: existing.version.clone(),
            });
        }

        let catalog = self.registry.fetch(false).await;
        let info = catalog
            .get_plugin(name)
            .ok_or_else(|| PluginError::PluginNotFound(name.to_string()))?;

        let installed = self.installer.install(info).await?;
        manifest.upsert(installed.clone());

        if let Err(e) = manifest.save(&self.manifest_path) {
            warn!(plugin = %installed.name, error = %e, "Failed to record install, removing binary");
            if let Err(cleanup) = self.installer.uninstall(&installed) {
                warn!(plugin = %installed.name, error = %cleanup, "Failed to remove orphaned binary");
            }
            return Err(e);
        }

        Ok(installed)
    }

    pub fn uninstall(&self, name: &str) -> Result<()> {
        let mut manifest = self.load_manifest()?;
        let installed = manifest
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotInstalled(name.to_string()))?;

        self.installer.uninstall(&installed)?;
        manifest.remove(name);
        manifest.save(&self.manifest_path)?;

        info!(plugin = %installed.name, version = %installed.version, "Uninstalled plugin");
        Ok(())
    }

    pub fn enable(&self, name: &str) -> Result<()> {
        self.set_enabled(name, true)
    }

    pub fn disable(&self, name: &str) -> Result<()> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut manifest = self.load_manifest()?;
        let plugin = manifest
            .get_mut(name)
            .ok_or_else(|| PluginError::NotInstalled(name.to_string()))?;
        plugin.enabled = enabled;
        manifest.save(&self.manifest_path)?;

        info!(plugin = %name, enabled, "Updated plugin");
        Ok(())
    }

    /// Reinstall `name` if the refreshed catalog has a different version.
    pub async fn update(&self, name: &str) -> Result<UpdateResult> {
        if self.load_manifest()?.get(name).is_none() {
            return Err(PluginError::NotInstalled(name.to_string()));
        }
        let catalog = self.registry.fetch(true).await;
        self.update_from(&catalog, name).await
    }

    /// Update every installed plugin against one catalog refresh.
    /// Failures are reported per plugin.
    pub async fn update_all(&self) -> Result<Vec<UpdateResult>> {
        let manifest = self.load_manifest()?;
        let catalog = self.registry.fetch(true).await;

        let mut results = Vec::with_capacity(manifest.installed.len());
        for plugin in &manifest.installed {
            let result = match self.update_from(&catalog, &plugin.name).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(plugin = %plugin.name, error = %e, "Update failed");
                    UpdateResult {
                        name: plugin.name.clone(),
                        current_version: plugin.version.clone(),
                        latest_version: catalog
                            .get_plugin(&plugin.name)
                            .map(|info| info.version.clone())
                            .unwrap_or_default(),
                        updated: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    async fn update_from(&self, catalog: &Registry, name: &str) -> Result<UpdateResult> {
        let mut manifest = self.load_manifest()?;
        let current = manifest
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotInstalled(name.to_string()))?;
        let info = catalog
            .get_plugin(name)
            .ok_or_else(|| PluginError::PluginNotFound(name.to_string()))?;

        let mut result = UpdateResult {
            name: current.name.clone(),
            current_version: current.version.clone(),
            latest_version: info.version.clone(),
            updated: false,
            error: None,
        };
        if current.version == info.version {
            return Ok(result);
        }

        self.installer.uninstall(&current)?;
        let mut installed = self.installer.install(info).await?;
        installed.enabled = current.enabled;
        manifest.upsert(installed);
        manifest.save(&self.manifest_path)?;

        info!(
            plugin = %current.name,
            from = %current.version,
            to = %info.version,
            "Updated plugin"
        );
        result.updated = true;
        Ok(result)
    }

    /// Case-insensitive search over catalog name, description and category.
    pub async fn search(&self, query: &str) -> Vec<PluginInfo> {
        let catalog = self.registry.fetch(false).await;
        catalog.search(query).into_iter().cloned().collect()
    }

    pub fn list_registries(&self) -> Vec<RegistryEntry> {
        self.registry.list_registries()
    }

    pub fn add_registry(&mut self, name: &str, url: &str, priority: i32) -> Result<()> {
        self.registry.add_registry(name, url, priority)
    }

    pub fn remove_registry(&mut self, name: &str) -> Result<()> {
        self.registry.remove_registry(name)
    }

    pub fn enable_registry(&mut self, name: &str, enabled: bool) -> Result<()> {
        self.registry.enable_registry(name, enabled)
    }
}
