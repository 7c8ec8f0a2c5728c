//! Platform identifiers and release asset naming.
//!
//! Release archives follow `<name>_<os>_<arch>.<ext>` with Go-style OS names
//! (`darwin`, not `macos`) and normalized architectures (`x86_64`, `aarch64`).

use std::fmt;

/// Base URL used to build release download links.
pub const DEFAULT_DOWNLOAD_BASE: &str = "https://github.com";

/// Operating system and CPU architecture of a release asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: &str, arch: &str) -> Self {
        Self {
            os: normalize_os(os),
            arch: normalize_arch(arch),
        }
    }

    /// The platform this host was compiled for.
    pub fn current() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }

    /// Identifier used as the key of catalog checksum maps (`linux_x86_64`).
    pub fn id(&self) -> String {
        format!("{}_{}", self.os, self.arch)
    }

    fn exe_suffix(&self) -> &'static str {
        if self.is_windows() { ".exe" } else { "" }
    }

    fn archive_ext(&self) -> &'static str {
        if self.is_windows() { "zip" } else { "tar.gz" }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.os, self.arch)
    }
}

pub fn normalize_arch(arch: &str) -> String {
    match arch {
        "amd64" | "x64" => "x86_64".to_string(),
        "arm64" => "aarch64".to_string(),
        other => other.to_string(),
    }
}

pub fn normalize_os(os: &str) -> String {
    match os {
        "macos" => "darwin".to_string(),
        other => other.to_string(),
    }
}

/// Normalize a catalog platform key such as `linux_amd64`.
pub fn normalize_platform_id(id: &str) -> String {
    match id.split_once('_') {
        Some((os, arch)) => format!("{}_{}", normalize_os(os), normalize_arch(arch)),
        None => id.to_string(),
    }
}

/// Installed file name of a plugin binary.
pub fn binary_name(name: &str, platform: &Platform) -> String {
    format!("{}{}", name, platform.exe_suffix())
}

/// Release asset name for a plugin on a platform.
pub fn archive_name(name: &str, platform: &Platform) -> String {
    format!(
        "{}_{}_{}.{}",
        name,
        platform.os,
        platform.arch,
        platform.archive_ext()
    )
}

/// Constructs the download URL for a plugin release.
///
/// URL format: {base}/{repository}/releases/download/{version}/{archive}
pub fn download_url(base: &str, repository: &str, version: &str, archive: &str) -> String {
    format!(
        "{}/{}/releases/download/{}/{}",
        base.trim_end_matches('/'),
        repository.trim_matches('/'),
        version,
        archive
    )
}

/// File names accepted as the plugin binary inside an extracted archive.
pub fn binary_candidates(name: &str, repository: &str, platform: &Platform) -> Vec<String> {
    let suffix = platform.exe_suffix();
    let mut candidates = vec![
        format!("{}{}", name, suffix),
        format!("{}_{}{}", name, platform.id(), suffix),
    ];

    if let Some(repo_name) = repository.rsplit('/').find(|s| !s.is_empty()) {
        let candidate = format!("{}_{}{}", repo_name, platform.id(), suffix);
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }

    candidates
}
