//! YAML persistence shared by the manifest and registry files.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

use crate::plugin::error::{PluginError, Result};

/// Read a YAML document. A missing file is `Ok(None)`.
pub(crate) fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    serde_yaml::from_str(&content)
        .map(Some)
        .map_err(|source| PluginError::Yaml {
            path: path.to_path_buf(),
            source,
        })
}

/// Write a YAML document, replacing the file atomically.
pub(crate) fn save_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = serde_yaml::to_string(value).map_err(|source| PluginError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        version: u32,
        items: Vec<String>,
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let loaded: Option<Doc> = load_yaml(&dir.path().join("absent.yaml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_creates_parents_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("doc.yaml");
        let doc = Doc {
            version: 1,
            items: vec!["a".to_string()],
        };
        save_yaml(&path, &doc).unwrap();
        assert_eq!(load_yaml::<Doc>(&path).unwrap(), Some(doc));
        assert!(!dir.path().join("nested").join(".doc.yaml.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "version: [unclosed").unwrap();
        let err = load_yaml::<Doc>(&path).unwrap_err();
        assert!(matches!(err, PluginError::Yaml { .. }));
        assert!(err.to_string().contains("bad.yaml"));
    }
}
