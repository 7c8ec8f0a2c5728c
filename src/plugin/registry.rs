//! Plugin catalogs and the prioritized list of registries that serve them.
//!
//! A registry is a YAML catalog reachable by URL. The built-in `official`
//! registry is always present with the highest priority; users may add their
//! own at lower priorities. Fetched catalogs are cached per registry under
//! `cache/registry-<name>.yaml` and reused for [`DEFAULT_CACHE_TTL`]. When a
//! registry is unreachable the stale cache is used instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::plugin::error::{PluginError, Result};
use crate::plugin::platform::{Platform, normalize_platform_id};
use crate::plugin::store::{load_yaml, save_yaml};

/// Schema version written into registry config and catalog files.
pub const REGISTRY_SCHEMA_VERSION: u32 = 1;

pub const OFFICIAL_REGISTRY_NAME: &str = "official";
pub const OFFICIAL_REGISTRY_URL: &str =
    "https://raw.githubusercontent.com/shipwright-dev/plugins/main/registry.yaml";
/// Fixed priority of the official registry. User registries must stay below it.
pub const OFFICIAL_REGISTRY_PRIORITY: i32 = 1000;

/// How long a cached catalog is served without contacting the registry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A plugin entry in a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// GitHub `owner/repo` the releases are published under.
    #[serde(default)]
    pub repository: String,
    pub version: String,
    #[serde(default)]
    pub category: String,
    /// Hook names the plugin declares. Unknown names are kept as-is.
    #[serde(default)]
    pub hooks: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config_schema: serde_json::Value,
    /// Archive checksums keyed by platform id (`linux_x86_64`).
    #[serde(default)]
    pub checksums: HashMap<String, String>,
    #[serde(default)]
    pub min_sdk_version: u32,
    /// URL of the registry this entry was merged from.
    #[serde(skip)]
    pub source: String,
}

impl PluginInfo {
    /// Placeholder for an installed plugin that no registry lists any more.
    pub fn delisted(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            repository: String::new(),
            version: version.to_string(),
            category: String::new(),
            hooks: Vec::new(),
            config_schema: serde_json::Value::Null,
            checksums: HashMap::new(),
            min_sdk_version: 0,
            source: String::new(),
        }
    }

    /// Expected archive checksum for `platform`, if the catalog publishes one.
    pub fn checksum_for(&self, platform: &Platform) -> Option<&str> {
        let id = platform.id();
        self.checksums
            .iter()
            .find(|(key, value)| normalize_platform_id(key) == id && !value.trim().is_empty())
            .map(|(_, value)| value.as_str())
    }

    fn matches_query(&self, query: &str) -> bool {
        [&self.name, &self.description, &self.category]
            .iter()
            .any(|field| field.to_lowercase().contains(query))
    }
}

/// A catalog snapshot: one per registry (cached) or a merged view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default = "default_schema_version")]
    pub version: u32,
    #[serde(default)]
    pub plugins: Vec<PluginInfo>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            version: REGISTRY_SCHEMA_VERSION,
            plugins: Vec::new(),
            updated_at: None,
        }
    }
}

impl Registry {
    pub fn get_plugin(&self, name: &str) -> Option<&PluginInfo> {
        self.plugins
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn list_by_category(&self, category: &str) -> Vec<&PluginInfo> {
        self.plugins
            .iter()
            .filter(|p| p.category.eq_ignore_ascii_case(category))
            .collect()
    }

    /// Sorted, de-duplicated, non-empty categories.
    pub fn categories(&self) -> Vec<String> {
        self.plugins
            .iter()
            .filter(|p| !p.category.is_empty())
            .map(|p| p.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Case-insensitive substring search over name, description and category.
    pub fn search(&self, query: &str) -> Vec<&PluginInfo> {
        let query = query.to_lowercase();
        self.plugins
            .iter()
            .filter(|p| p.matches_query(&query))
            .collect()
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        let Some(updated_at) = self.updated_at else {
            return false;
        };
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => Utc::now().signed_duration_since(updated_at) < ttl,
            Err(_) => true,
        }
    }
}

fn default_schema_version() -> u32 {
    REGISTRY_SCHEMA_VERSION
}

fn default_enabled() -> bool {
    true
}

/// A configured registry source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl RegistryEntry {
    pub fn official() -> Self {
        Self {
            name: OFFICIAL_REGISTRY_NAME.to_string(),
            url: OFFICIAL_REGISTRY_URL.to_string(),
            priority: OFFICIAL_REGISTRY_PRIORITY,
            enabled: true,
        }
    }

    pub fn is_official(&self) -> bool {
        is_official_name(&self.name)
    }
}

fn is_official_name(name: &str) -> bool {
    name.eq_ignore_ascii_case(OFFICIAL_REGISTRY_NAME)
}

/// Registry names become cache file names.
fn is_valid_registry_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && !name.starts_with('.')
}

/// Persisted list of registries (`registries.yaml`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_schema_version")]
    pub version: u32,
    #[serde(default)]
    pub registries: Vec<RegistryEntry>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            version: REGISTRY_SCHEMA_VERSION,
            registries: vec![RegistryEntry::official()],
        }
    }
}

impl RegistryConfig {
    /// Put the official entry first with its fixed name, URL and priority.
    /// Its enabled flag is the only part users may change. Other entries are
    /// held below the official priority and entries with unusable names are
    /// dropped.
    fn ensure_official(&mut self) {
        let enabled = self
            .registries
            .iter()
            .find(|r| r.is_official())
            .map(|r| r.enabled)
            .unwrap_or(true);

        self.registries.retain(|r| {
            if r.is_official() {
                return false;
            }
            if !is_valid_registry_name(&r.name) {
                warn!(registry = %r.name, "Dropping registry with invalid name");
                return false;
            }
            true
        });
        for entry in &mut self.registries {
            if entry.priority >= OFFICIAL_REGISTRY_PRIORITY {
                warn!(
                    registry = %entry.name,
                    priority = entry.priority,
                    "Registry priority must be below the official registry, lowering it"
                );
                entry.priority = OFFICIAL_REGISTRY_PRIORITY - 1;
            }
        }
        self.registries.insert(
            0,
            RegistryEntry {
                enabled,
                ..RegistryEntry::official()
            },
        );
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut RegistryEntry> {
        self.registries
            .iter_mut()
            .find(|r| r.name.eq_ignore_ascii_case(name))
    }

    /// Entries by descending priority, configuration order breaking ties.
    fn by_priority(&self) -> Vec<RegistryEntry> {
        let mut entries = self.registries.clone();
        entries.sort_by(|a, b| b.priority.cmp(&a.priority));
        entries
    }
}

/// Manages registry sources and fetches their merged catalog.
pub struct RegistryService {
    config_path: PathBuf,
    cache_dir: PathBuf,
    config: RegistryConfig,
    client: reqwest::Client,
    cache_ttl: Duration,
}

impl RegistryService {
    /// Load `registries.yaml` from `config_path`. A missing or corrupt file
    /// yields the default config holding only the official registry.
    pub fn new(config_path: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        let config_path = config_path.into();

        let mut config = match load_yaml::<RegistryConfig>(&config_path) {
            Ok(Some(config)) => config,
            Ok(None) => RegistryConfig::default(),
            Err(e) => {
                warn!(path = %config_path.display(), error = %e, "Ignoring unreadable registry config");
                RegistryConfig::default()
            }
        };
        config.ensure_official();

        let client = reqwest::Client::builder()
            .user_agent(concat!("shipwright/", env!("CARGO_PKG_VERSION")))
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            config_path,
            cache_dir: cache_dir.into(),
            config,
            client,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Registries sorted by descending priority.
    pub fn list_registries(&self) -> Vec<RegistryEntry> {
        self.config.by_priority()
    }

    pub fn add_registry(&mut self, name: &str, url: &str, priority: i32) -> Result<()> {
        let name = name.trim();
        if is_official_name(name) {
            return Err(PluginError::ReservedRegistry(name.to_string()));
        }
        if !is_valid_registry_name(name) {
            return Err(PluginError::InvalidRegistry(format!(
                "invalid registry name '{}'",
                name
            )));
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(PluginError::InvalidRegistry(format!(
                "registry URL must be http(s): {}",
                url
            )));
        }
        if priority >= OFFICIAL_REGISTRY_PRIORITY {
            return Err(PluginError::InvalidRegistry(format!(
                "priority must be below {}",
                OFFICIAL_REGISTRY_PRIORITY
            )));
        }

        let mut config = self.config.clone();
        if config.find_mut(name).is_some() {
            return Err(PluginError::RegistryExists(name.to_string()));
        }
        config.registries.push(RegistryEntry {
            name: name.to_string(),
            url: url.to_string(),
            priority,
            enabled: true,
        });
        self.commit(config)?;

        info!(registry = %name, url = %url, priority, "Added registry");
        Ok(())
    }

    pub fn remove_registry(&mut self, name: &str) -> Result<()> {
        if is_official_name(name) {
            return Err(PluginError::ReservedRegistry(name.to_string()));
        }

        let mut config = self.config.clone();
        let before = config.registries.len();
        config
            .registries
            .retain(|r| !r.name.eq_ignore_ascii_case(name));
        if config.registries.len() == before {
            return Err(PluginError::RegistryNotFound(name.to_string()));
        }
        self.commit(config)?;

        if let Err(e) = std::fs::remove_file(self.cache_path(name)) {
            debug!(registry = %name, error = %e, "No registry cache to remove");
        }
        info!(registry = %name, "Removed registry");
        Ok(())
    }

    pub fn enable_registry(&mut self, name: &str, enabled: bool) -> Result<()> {
        let mut config = self.config.clone();
        let entry = config
            .find_mut(name)
            .ok_or_else(|| PluginError::RegistryNotFound(name.to_string()))?;
        entry.enabled = enabled;
        self.commit(config)?;

        info!(registry = %name, enabled, "Updated registry");
        Ok(())
    }

    fn commit(&mut self, config: RegistryConfig) -> Result<()> {
        save_yaml(&self.config_path, &config)?;
        self.config = config;
        Ok(())
    }

    /// Fetch and merge the catalogs of every enabled registry.
    ///
    /// Registries are visited by descending priority and the first entry seen
    /// for a plugin name wins. Registries that cannot be fetched are skipped.
    pub async fn fetch(&self, force_refresh: bool) -> Registry {
        let mut merged = Registry {
            updated_at: Some(Utc::now()),
            ..Registry::default()
        };
        let mut seen = HashSet::new();

        for entry in self.list_registries().into_iter().filter(|r| r.enabled) {
            let catalog = match self.fetch_registry(&entry, force_refresh).await {
                Ok(catalog) => catalog,
                Err(e) => {
                    warn!(registry = %entry.name, error = %e, "Skipping registry");
                    continue;
                }
            };

            for mut plugin in catalog.plugins {
                if seen.insert(plugin.name.to_lowercase()) {
                    plugin.source = entry.url.clone();
                    merged.plugins.push(plugin);
                } else {
                    debug!(
                        registry = %entry.name,
                        plugin = %plugin.name,
                        "Plugin already provided by a higher-priority registry"
                    );
                }
            }
        }

        merged
    }

    /// Catalog of one registry, served from cache while fresh.
    pub async fn fetch_registry(&self, entry: &RegistryEntry, force_refresh: bool) -> Result<Registry> {
        let cached = self.read_cache(&entry.name);

        if !force_refresh
            && let Some(cache) = &cached
            && cache.is_fresh(self.cache_ttl)
        {
            debug!(registry = %entry.name, "Using cached catalog");
            return Ok(cache.clone());
        }

        match self.fetch_remote(entry).await {
            Ok(mut catalog) => {
                catalog.updated_at = Some(Utc::now());
                if let Err(e) = save_yaml(&self.cache_path(&entry.name), &catalog) {
                    debug!(registry = %entry.name, error = %e, "Failed to write registry cache");
                }
                Ok(catalog)
            }
            Err(e) => match cached {
                Some(cache) => {
                    warn!(
                        registry = %entry.name,
                        error = %e,
                        cached_at = ?cache.updated_at,
                        "Registry unreachable, using cached catalog"
                    );
                    Ok(cache)
                }
                None => Err(e),
            },
        }
    }

    async fn fetch_remote(&self, entry: &RegistryEntry) -> Result<Registry> {
        let failed = |reason: String| PluginError::RegistryFetchFailed {
            name: entry.name.clone(),
            reason,
        };

        debug!(registry = %entry.name, url = %entry.url, "Fetching catalog");

        let response = self
            .client
            .get(&entry.url)
            .send()
            .await
            .map_err(|e| failed(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("HTTP {}", status)));
        }

        let content = response
            .text()
            .await
            .map_err(|e| failed(format!("failed to read body: {}", e)))?;

        let catalog: Registry = serde_yaml::from_str(&content).map_err(|e| {
            let preview: String = content.chars().take(200).collect();
            debug!(registry = %entry.name, content_preview = %preview, "Unparseable catalog");
            failed(format!("invalid catalog: {}", e))
        })?;

        debug!(registry = %entry.name, plugin_count = catalog.plugins.len(), "Fetched catalog");
        Ok(catalog)
    }

    fn cache_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("registry-{}.yaml", name.to_lowercase()))
    }

    fn read_cache(&self, name: &str) -> Option<Registry> {
        let path = self.cache_path(name);
        match load_yaml::<Registry>(&path) {
            Ok(cache) => cache,
            Err(e) => {
                debug!(registry = %name, error = %e, "Ignoring unreadable registry cache");
                None
            }
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}
