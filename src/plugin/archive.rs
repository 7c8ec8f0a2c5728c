//! Guarded extraction of release archives.
//!
//! Every entry path is cleaned lexically and must stay inside the destination
//! directory, and each regular file is copied through a byte cap so a
//! decompression bomb fails instead of filling the disk. Symlinks and other
//! special entries are skipped.

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tracing::debug;
use zip::ZipArchive;

use crate::plugin::error::{PluginError, Result};

/// Default per-file cap on extracted bytes (100 MiB).
pub const MAX_EXTRACTED_FILE_SIZE: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Zip,
}

impl ArchiveFormat {
    /// Detect the format from an archive file name.
    pub fn from_name(name: &str) -> Result<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Ok(ArchiveFormat::TarGz)
        } else if lower.ends_with(".zip") {
            Ok(ArchiveFormat::Zip)
        } else {
            Err(PluginError::UnsupportedArchive(name.to_string()))
        }
    }
}

/// Extract `archive_path` into `dest`, which must already exist.
pub fn extract_archive(
    archive_path: &Path,
    format: ArchiveFormat,
    dest: &Path,
    max_file_size: u64,
) -> Result<()> {
    match format {
        ArchiveFormat::TarGz => extract_tar_gz(archive_path, dest, max_file_size),
        ArchiveFormat::Zip => extract_zip(archive_path, dest, max_file_size),
    }
}

fn extract_tar_gz(archive_path: &Path, dest: &Path, max_file_size: u64) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let entries = archive
        .entries()
        .map_err(|e| PluginError::InvalidArchive(format!("failed to read tar entries: {}", e)))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| PluginError::InvalidArchive(format!("failed to read tar entry: {}", e)))?;

        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            let target = resolve_entry_path(dest, &name)?;
            fs::create_dir_all(&target)?;
        } else if entry_type.is_file() {
            let target = resolve_entry_path(dest, &name)?;
            if target == dest {
                continue;
            }
            write_capped(&mut entry, &target, &name, max_file_size)?;
        } else {
            debug!(entry = %name, kind = ?entry_type, "Skipping non-regular tar entry");
        }
    }

    Ok(())
}

fn extract_zip(archive_path: &Path, dest: &Path, max_file_size: u64) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| PluginError::InvalidArchive(format!("failed to open zip: {}", e)))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| PluginError::InvalidArchive(format!("failed to read zip entry: {}", e)))?;

        let name = file.name().to_string();
        let is_symlink = file
            .unix_mode()
            .is_some_and(|mode| mode & 0o170000 == 0o120000);

        if file.is_dir() {
            let target = resolve_entry_path(dest, &name)?;
            fs::create_dir_all(&target)?;
        } else if file.is_file() && !is_symlink {
            let target = resolve_entry_path(dest, &name)?;
            if target == dest {
                continue;
            }
            write_capped(&mut file, &target, &name, max_file_size)?;
        } else {
            debug!(entry = %name, "Skipping non-regular zip entry");
        }
    }

    Ok(())
}

/// Clean an archive entry name and join it onto `dest`.
///
/// Fails with `PathTraversal` when the cleaned path climbs above `dest`.
pub(crate) fn resolve_entry_path(dest: &Path, entry_name: &str) -> Result<PathBuf> {
    let normalized = entry_name.replace('\\', "/");
    let mut cleaned = PathBuf::new();

    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => cleaned.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    return Err(PluginError::PathTraversal {
                        entry: entry_name.to_string(),
                    });
                }
            }
        }
    }

    let target = dest.join(&cleaned);
    if !target.starts_with(dest) {
        return Err(PluginError::PathTraversal {
            entry: entry_name.to_string(),
        });
    }
    Ok(target)
}

fn write_capped<R: Read>(reader: &mut R, target: &Path, entry: &str, limit: u64) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut out = File::create(target)?;
    let written = io::copy(&mut reader.take(limit + 1), &mut out)?;
    drop(out);

    if written > limit {
        let _ = fs::remove_file(target);
        return Err(PluginError::FileTooLarge {
            entry: entry.to_string(),
            limit,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::test_support::{tar_gz_with_raw_entry, tar_gz_with_files, zip_with_files};
    use tempfile::TempDir;

    fn write_archive(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_format_from_name() {
        assert_eq!(ArchiveFormat::from_name("a_linux_x86_64.tar.gz").unwrap(), ArchiveFormat::TarGz);
        assert_eq!(ArchiveFormat::from_name("a.TGZ").unwrap(), ArchiveFormat::TarGz);
        assert_eq!(ArchiveFormat::from_name("a_windows_x86_64.zip").unwrap(), ArchiveFormat::Zip);
        assert!(matches!(
            ArchiveFormat::from_name("a.rar"),
            Err(PluginError::UnsupportedArchive(_))
        ));
    }

    #[test]
    fn test_resolve_entry_path() {
        let dest = Path::new("/scratch");
        assert_eq!(resolve_entry_path(dest, "bin/tool").unwrap(), dest.join("bin/tool"));
        assert_eq!(resolve_entry_path(dest, "./a/../b").unwrap(), dest.join("b"));
        assert_eq!(resolve_entry_path(dest, "/abs/file").unwrap(), dest.join("abs/file"));
        assert!(matches!(
            resolve_entry_path(dest, "../../../evil"),
            Err(PluginError::PathTraversal { .. })
        ));
        assert!(matches!(
            resolve_entry_path(dest, "a/../../evil"),
            Err(PluginError::PathTraversal { .. })
        ));
        assert!(matches!(
            resolve_entry_path(dest, "..\\..\\evil"),
            Err(PluginError::PathTraversal { .. })
        ));
    }

    #[test]
    fn test_extract_tar_gz() {
        let tmp = TempDir::new().unwrap();
        let bytes = tar_gz_with_files(&[("pkg/slack", &b"binary"[..]), ("README.md", &b"docs"[..])]);
        let archive = write_archive(tmp.path(), "a.tar.gz", &bytes);
        let dest = tmp.path().join("out");
        fs::create_dir_all(&dest).unwrap();

        extract_archive(&archive, ArchiveFormat::TarGz, &dest, MAX_EXTRACTED_FILE_SIZE).unwrap();

        assert_eq!(fs::read(dest.join("pkg/slack")).unwrap(), b"binary");
        assert_eq!(fs::read(dest.join("README.md")).unwrap(), b"docs");
    }

    #[test]
    fn test_extract_zip() {
        let tmp = TempDir::new().unwrap();
        let bytes = zip_with_files(&[("dir/", &b""[..]), ("dir/slack.exe", &b"mz"[..])]);
        let archive = write_archive(tmp.path(), "a.zip", &bytes);
        let dest = tmp.path().join("out");
        fs::create_dir_all(&dest).unwrap();

        extract_archive(&archive, ArchiveFormat::Zip, &dest, MAX_EXTRACTED_FILE_SIZE).unwrap();

        assert_eq!(fs::read(dest.join("dir/slack.exe")).unwrap(), b"mz");
    }

    #[test]
    fn test_tar_traversal_is_rejected_without_writing_outside() {
        let tmp = TempDir::new().unwrap();
        let bytes = tar_gz_with_raw_entry("../../../evil", b"pwned");
        let archive = write_archive(tmp.path(), "evil.tar.gz", &bytes);
        let dest = tmp.path().join("a").join("b").join("out");
        fs::create_dir_all(&dest).unwrap();

        let result = extract_archive(&archive, ArchiveFormat::TarGz, &dest, MAX_EXTRACTED_FILE_SIZE);

        assert!(matches!(result, Err(PluginError::PathTraversal { ref entry }) if entry == "../../../evil"));
        assert!(!tmp.path().join("evil").exists());
        assert!(fs::read_dir(&dest).unwrap().next().is_none());
    }

    #[test]
    fn test_zip_traversal_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let bytes = zip_with_files(&[("../../../evil", &b"pwned"[..])]);
        let archive = write_archive(tmp.path(), "evil.zip", &bytes);
        let dest = tmp.path().join("a").join("b").join("out");
        fs::create_dir_all(&dest).unwrap();

        let result = extract_archive(&archive, ArchiveFormat::Zip, &dest, MAX_EXTRACTED_FILE_SIZE);

        assert!(matches!(result, Err(PluginError::PathTraversal { .. })));
        assert!(!tmp.path().join("evil").exists());
    }

    #[test]
    fn test_oversized_entry_fails_and_is_removed() {
        let tmp = TempDir::new().unwrap();
        let big = vec![0u8; 64 * 1024];
        let bytes = tar_gz_with_files(&[("bomb", big.as_slice())]);
        let archive = write_archive(tmp.path(), "bomb.tar.gz", &bytes);
        let dest = tmp.path().join("out");
        fs::create_dir_all(&dest).unwrap();

        let result = extract_archive(&archive, ArchiveFormat::TarGz, &dest, 1024);

        assert!(matches!(result, Err(PluginError::FileTooLarge { limit: 1024, .. })));
        assert!(!dest.join("bomb").exists());
    }

    #[test]
    fn test_oversized_zip_entry_fails() {
        let tmp = TempDir::new().unwrap();
        let big = vec![7u8; 16 * 1024];
        let bytes = zip_with_files(&[("bomb", big.as_slice())]);
        let archive = write_archive(tmp.path(), "bomb.zip", &bytes);
        let dest = tmp.path().join("out");
        fs::create_dir_all(&dest).unwrap();

        let result = extract_archive(&archive, ArchiveFormat::Zip, &dest, 4096);
        assert!(matches!(result, Err(PluginError::FileTooLarge { .. })));
    }

    #[test]
    fn test_entry_exactly_at_limit_is_accepted() {
        let tmp = TempDir::new().unwrap();
        let data = vec![1u8; 2048];
        let bytes = tar_gz_with_files(&[("exact", data.as_slice())]);
        let archive = write_archive(tmp.path(), "a.tar.gz", &bytes);
        let dest = tmp.path().join("out");
        fs::create_dir_all(&dest).unwrap();

        extract_archive(&archive, ArchiveFormat::TarGz, &dest, 2048).unwrap();
        assert_eq!(fs::metadata(dest.join("exact")).unwrap().len(), 2048);
    }

    #[test]
    fn test_corrupt_archive_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let archive = write_archive(tmp.path(), "junk.zip", b"not a zip at all");
        let dest = tmp.path().join("out");
        fs::create_dir_all(&dest).unwrap();

        let result = extract_archive(&archive, ArchiveFormat::Zip, &dest, MAX_EXTRACTED_FILE_SIZE);
        assert!(matches!(result, Err(PluginError::InvalidArchive(_))));
    }
}
