//! Download, verify and install plugin binaries from GitHub releases.
//!
//! Installation order matters: the downloaded archive is hashed and compared
//! with the catalog checksum before anything is extracted. The binary that
//! ends up in the plugin directory is hashed again and that digest is what the
//! manifest records.

use chrono::Utc;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use shipwright_plugin_sdk::{SDK_VERSION, is_sdk_compatible};

use crate::plugin::archive::{ArchiveFormat, MAX_EXTRACTED_FILE_SIZE, extract_archive};
use crate::plugin::checksum::{checksums_match, sha256_file};
use crate::plugin::error::{PluginError, Result};
use crate::plugin::manifest::InstalledPlugin;
use crate::plugin::platform::{
    DEFAULT_DOWNLOAD_BASE, Platform, archive_name, binary_candidates, binary_name, download_url,
};
use crate::plugin::registry::PluginInfo;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub struct Installer {
    plugin_dir: PathBuf,
    client: reqwest::Client,
    download_base: String,
    platform: Platform,
    sdk_version: u32,
    max_file_size: u64,
    token: Option<String>,
}

impl Installer {
    pub fn new(plugin_dir: impl Into<PathBuf>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("shipwright/", env!("CARGO_PKG_VERSION")))
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            plugin_dir: plugin_dir.into(),
            client,
            download_base: DEFAULT_DOWNLOAD_BASE.to_string(),
            platform: Platform::current(),
            sdk_version: SDK_VERSION,
            max_file_size: MAX_EXTRACTED_FILE_SIZE,
            token: None,
        }
    }

    /// Base URL release downloads are resolved against.
    pub fn with_download_base(mut self, base: impl Into<String>) -> Self {
        self.download_base = base.into();
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_sdk_version(mut self, version: u32) -> Self {
        self.sdk_version = version;
        self
    }

    pub fn with_max_file_size(mut self, limit: u64) -> Self {
        self.max_file_size = limit;
        self
    }

    /// Bearer token sent with downloads (for private repositories).
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Install the release described by `info` for the current platform.
    ///
    /// The returned entry is always disabled.
    pub async fn install(&self, info: &PluginInfo) -> Result<InstalledPlugin> {
        if !is_sdk_compatible(info.min_sdk_version, self.sdk_version) {
            return Err(PluginError::SdkIncompatible {
                name: info.name.clone(),
                required: info.min_sdk_version,
                current: self.sdk_version,
            });
        }

        let archive = archive_name(&info.name, &self.platform);
        let binary = binary_name(&info.name, &self.platform);
        let url = download_url(&self.download_base, &info.repository, &info.version, &archive);
        let format = ArchiveFormat::from_name(&archive)?;

        let scratch = tempdir()?;
        let archive_path = scratch.path().join(&archive);

        info!(plugin = %info.name, version = %info.version, url = %url, "Downloading plugin");
        self.download(&url, &archive_path).await?;

        match info.checksum_for(&self.platform) {
            Some(expected) => {
                let actual = sha256_file(&archive_path)?;
                if !checksums_match(expected, &actual) {
                    return Err(PluginError::ChecksumMismatch {
                        subject: format!("archive {}", archive),
                        expected: expected.to_string(),
                        actual,
                    });
                }
                debug!(plugin = %info.name, "Archive checksum verified");
            }
            None => {
                warn!(
                    plugin = %info.name,
                    platform = %self.platform,
                    "No published checksum for this platform, archive not verified"
                );
            }
        }

        let extract_dir = scratch.path().join("extracted");
        let target = self.plugin_dir.join(&binary);
        let job = InstallJob {
            name: info.name.clone(),
            archive_path,
            format,
            extract_dir,
            candidates: binary_candidates(&info.name, &info.repository, &self.platform),
            target: target.clone(),
            max_file_size: self.max_file_size,
        };

        let checksum = tokio::task::spawn_blocking(move || job.run())
            .await
            .map_err(std::io::Error::other)??;

        info!(
            plugin = %info.name,
            version = %info.version,
            path = %target.display(),
            "Installed plugin"
        );

        Ok(InstalledPlugin {
            name: info.name.clone(),
            version: info.version.clone(),
            installed_at: Utc::now(),
            binary_path: target,
            checksum,
            enabled: false,
        })
    }

    /// Remove an installed binary. A missing file is not an error.
    pub fn uninstall(&self, plugin: &InstalledPlugin) -> Result<()> {
        match fs::remove_file(&plugin.binary_path) {
            Ok(()) => {
                info!(plugin = %plugin.name, "Removed plugin binary");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(plugin = %plugin.name, "Plugin binary already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Re-hash the installed binary and compare it with the recorded checksum.
    pub fn verify_checksum(&self, plugin: &InstalledPlugin) -> Result<()> {
        let actual = sha256_file(&plugin.binary_path).map_err(|e| PluginError::BinaryUnreadable {
            path: plugin.binary_path.clone(),
            reason: e.to_string(),
        })?;

        if !checksums_match(&plugin.checksum, &actual) {
            return Err(PluginError::ChecksumMismatch {
                subject: format!("binary {}", plugin.binary_path.display()),
                expected: plugin.checksum.clone(),
                actual,
            });
        }
        Ok(())
    }

    async fn download(&self, url: &str, target: &Path) -> Result<()> {
        let failed = |reason: String| PluginError::DownloadFailed {
            url: url.to_string(),
            reason,
        };

        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, "application/octet-stream");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| failed(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!(
                "HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let mut file = tokio::fs::File::create(target).await?;
        let mut stream = response.bytes_stream();
        let mut total: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| failed(format!("stream interrupted: {}", e)))?;
            total += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!(url = %url, bytes = total, "Download complete");
        Ok(())
    }
}

/// Blocking half of an install: extract, locate, hash and copy the binary.
struct InstallJob {
    name: String,
    archive_path: PathBuf,
    format: ArchiveFormat,
    extract_dir: PathBuf,
    candidates: Vec<String>,
    target: PathBuf,
    max_file_size: u64,
}

impl InstallJob {
    /// Returns the checksum of the installed binary.
    fn run(self) -> Result<String> {
        fs::create_dir_all(&self.extract_dir)?;
        extract_archive(&self.archive_path, self.format, &self.extract_dir, self.max_file_size)?;

        let source = find_binary(&self.extract_dir, &self.candidates)?.ok_or_else(|| {
            PluginError::BinaryNotFound {
                name: self.name.clone(),
                candidates: self.candidates.join(", "),
            }
        })?;
        debug!(plugin = %self.name, binary = %source.display(), "Located plugin binary");

        let checksum = sha256_file(&source)?;

        if let Some(parent) = self.target.parent() {
            fs::create_dir_all(parent)?;
        }
        let file_name = self
            .target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staged = self.target.with_file_name(format!(".{}.partial", file_name));
        fs::copy(&source, &staged)?;
        set_executable(&staged)?;
        fs::rename(&staged, &self.target)?;

        Ok(checksum)
    }
}

/// Walk `root` in lexical order and return the first file named like a
/// candidate.
fn find_binary(root: &Path, candidates: &[String]) -> Result<Option<PathBuf>> {
    let mut entries: Vec<_> = fs::read_dir(root)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            if let Some(found) = find_binary(&path, candidates)? {
                return Ok(Some(found));
            }
        } else if file_type.is_file()
            && candidates
                .iter()
                .any(|c| entry.file_name().to_string_lossy() == c.as_str())
        {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
