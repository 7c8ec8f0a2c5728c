use anyhow::{Result, anyhow};
use std::fs;
use std::path::{Path, PathBuf};

/// Overrides the base directory (`~/.shipwright`).
pub const HOME_ENV: &str = "SHIPWRIGHT_HOME";

pub fn get_shipwright_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(expand_home(Path::new(&dir)));
    }
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
    Ok(home.join(".shipwright"))
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Locations of everything the plugin system keeps on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginPaths {
    pub base_dir: PathBuf,
    pub config_path: PathBuf,
    pub plugins_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub registries_path: PathBuf,
    pub cache_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl PluginPaths {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            config_path: base_dir.join("config.toml"),
            plugins_dir: base_dir.join("plugins"),
            manifest_path: base_dir.join("manifest.yaml"),
            registries_path: base_dir.join("registries.yaml"),
            cache_dir: base_dir.join("cache"),
            logs_dir: base_dir.join("logs"),
            base_dir,
        }
    }

    /// Paths under `$SHIPWRIGHT_HOME` or `~/.shipwright`.
    pub fn discover() -> Result<Self> {
        Ok(Self::new(get_shipwright_dir()?))
    }

    pub fn ensure_dirs_exist(&self) -> Result<()> {
        for dir in [&self.plugins_dir, &self.cache_dir, &self.logs_dir] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
