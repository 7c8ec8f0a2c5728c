//! Capability payloads exchanged between the host and an extension.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hooks::Hook;

/// Free-form configuration fragment handed to one extension.
pub type ConfigMap = HashMap<String, Value>;

/// Self-declared description returned by `GetInfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Info {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Hooks the extension wants to receive. Unknown names are dropped.
    #[serde(default, deserialize_with = "crate::hooks::deserialize_known_hooks")]
    pub hooks: Vec<Hook>,
    /// JSON-schema-like description of the accepted configuration.
    #[serde(default)]
    pub config_schema: Value,
    /// SDK version the extension was built against (0 = undeclared).
    #[serde(default)]
    pub sdk_version: u32,
}

/// One field-level configuration problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Outcome of `Validate`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<ValidationError>,
}

impl ValidateResponse {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(errors: Vec<ValidationError>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

/// Shared state of the release run, passed to every `Execute` call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReleaseContext {
    pub version: String,
    #[serde(default)]
    pub previous_version: String,
    #[serde(default)]
    pub tag_name: String,
    #[serde(default)]
    pub release_notes: String,
    #[serde(default)]
    pub repository_owner: String,
    #[serde(default)]
    pub repository_name: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub changelog: String,
    /// Set on `on-error` dispatches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

/// Arguments of `Execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub hook: Hook,
    pub context: ReleaseContext,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub dry_run: bool,
}

/// A file or resource produced by an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub checksum: String,
}

/// Outcome of `Execute`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl ExecuteResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_info_parses() {
        let info: Info =
            serde_json::from_str(r#"{"name":"slack","version":"1.2.0","hooks":["post-publish"]}"#)
                .unwrap();
        assert_eq!(info.name, "slack");
        assert_eq!(info.hooks, vec![Hook::PostPublish]);
        assert!(info.description.is_empty());
        assert_eq!(info.sdk_version, 0);
    }

    #[test]
    fn test_info_from_newer_sdk_keeps_known_hooks() {
        let info: Info = serde_json::from_str(
            r#"{"name":"deployer","version":"2.0.0","hooks":["post-publish","pre-deploy"],"sdk_version":3}"#,
        )
        .unwrap();
        assert_eq!(info.hooks, vec![Hook::PostPublish]);
        assert_eq!(info.sdk_version, 3);
    }

    #[test]
    fn test_execute_response_failure_carries_error() {
        let response = ExecuteResponse::failure("token rejected");
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("token rejected"));
    }
}
