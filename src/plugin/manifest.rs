//! Record of locally installed plugins (`manifest.yaml`).
//!
//! The manifest is the only durable source of truth for what is installed.
//! It is loaded on demand and rewritten wholesale on every mutation; callers
//! that mutate the same manifest path concurrently must serialize themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::plugin::error::Result;
use crate::plugin::store::{load_yaml, save_yaml};

/// Current manifest schema version.
pub const MANIFEST_VERSION: u32 = 1;

/// One installed plugin binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPlugin {
    pub name: String,
    pub version: String,
    pub installed_at: DateTime<Utc>,
    /// Absolute path of the installed binary.
    pub binary_path: PathBuf,
    /// SHA-256 of the binary (never of the release archive).
    pub checksum: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    #[serde(default)]
    pub installed: Vec<InstalledPlugin>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            installed: Vec::new(),
            updated_at: None,
        }
    }
}

impl Manifest {
    /// Load the manifest, `None` if it has never been written.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        load_yaml(path)
    }

    /// Load the manifest or start an empty one.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        Ok(Self::load(path)?.unwrap_or_default())
    }

    /// Stamp `updated_at` and write the whole manifest.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.updated_at = Some(Utc::now());
        save_yaml(path, self)
    }

    pub fn get(&self, name: &str) -> Option<&InstalledPlugin> {
        self.installed
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut InstalledPlugin> {
        self.installed
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Replace the entry with the same name in place, or append.
    pub fn upsert(&mut self, plugin: InstalledPlugin) {
        match self.get_mut(&plugin.name) {
            Some(existing) => *existing = plugin,
            None => self.installed.push(plugin),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<InstalledPlugin> {
        let index = self
            .installed
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))?;
        Some(self.installed.remove(index))
    }
}
