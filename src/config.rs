use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use shipwright_plugin_sdk::ConfigMap;

use crate::plugin::loader::PendingPluginConfig;
use crate::plugin::platform::{Platform, binary_name};
use crate::utils::paths::{PluginPaths, expand_home};

/// Environment variables consulted, in order, when no token is configured.
pub const TOKEN_ENV_VARS: &[&str] = &["SHIPWRIGHT_GITHUB_TOKEN", "GITHUB_TOKEN", "GH_TOKEN"];

/// One `[[plugins]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub name: String,
    /// Binary to run. Defaults to the installed binary in the plugins directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Hook names that replace the plugin's own declaration.
    #[serde(default)]
    pub hooks: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Passed to the plugin verbatim.
    #[serde(default)]
    pub config: ConfigMap,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub github_token: Option<String>,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

impl HostConfig {
    /// Load from `path`; a missing file is an empty configuration.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(HostConfig::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Token for GitHub downloads: the configured value, else the first
    /// non-empty variable from [`TOKEN_ENV_VARS`].
    pub fn github_token(&self) -> Option<String> {
        env_fallback(self.github_token.as_deref(), TOKEN_ENV_VARS)
    }

    /// Enabled plugins in configuration order, ready for registration.
    pub fn pending_plugins(&self, paths: &PluginPaths) -> Vec<PendingPluginConfig> {
        let platform = Platform::current();

        self.plugins
            .iter()
            .filter(|p| p.enabled)
            .map(|p| {
                let path = match &p.path {
                    Some(path) => {
                        let path = expand_home(path);
                        if path.is_relative() {
                            paths.base_dir.join(path)
                        } else {
                            path
                        }
                    }
                    None => paths.plugins_dir.join(binary_name(&p.name, &platform)),
                };

                PendingPluginConfig {
                    name: p.name.clone(),
                    path,
                    config: p.config.clone(),
                    hooks: (!p.hooks.is_empty()).then(|| p.hooks.clone()),
                    timeout: p.timeout_secs.map(Duration::from_secs),
                }
            })
            .collect()
    }
}

/// `value` if set and non-empty, otherwise the first non-empty variable.
pub fn env_fallback(value: Option<&str>, vars: &[&str]) -> Option<String> {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        return Some(value.to_string());
    }

    vars.iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}
