//! Release lifecycle hooks.
//!
//! A hook is both a capability an extension declares and the key the host
//! dispatches on. The wire form is the kebab-case name (`post-publish`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

/// A named lifecycle point in a release run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Hook {
    PreInit,
    PostInit,
    PrePlan,
    PostPlan,
    PreVersion,
    PostVersion,
    PreNotes,
    PostNotes,
    PreApprove,
    PostApprove,
    PrePublish,
    PostPublish,
    OnSuccess,
    OnError,
}

impl Hook {
    /// Every hook, in the order a successful run reaches them.
    pub const ALL: [Hook; 14] = [
        Hook::PreInit,
        Hook::PostInit,
        Hook::PrePlan,
        Hook::PostPlan,
        Hook::PreVersion,
        Hook::PostVersion,
        Hook::PreNotes,
        Hook::PostNotes,
        Hook::PreApprove,
        Hook::PostApprove,
        Hook::PrePublish,
        Hook::PostPublish,
        Hook::OnSuccess,
        Hook::OnError,
    ];

    /// Wire name of the hook.
    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::PreInit => "pre-init",
            Hook::PostInit => "post-init",
            Hook::PrePlan => "pre-plan",
            Hook::PostPlan => "post-plan",
            Hook::PreVersion => "pre-version",
            Hook::PostVersion => "post-version",
            Hook::PreNotes => "pre-notes",
            Hook::PostNotes => "post-notes",
            Hook::PreApprove => "pre-approve",
            Hook::PostApprove => "post-approve",
            Hook::PrePublish => "pre-publish",
            Hook::PostPublish => "post-publish",
            Hook::OnSuccess => "on-success",
            Hook::OnError => "on-error",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Hook {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hook::ALL
            .iter()
            .copied()
            .find(|hook| hook.as_str() == s)
            .ok_or_else(|| format!("unknown hook '{}'", s))
    }
}

/// Deserialize a list of hook names, dropping names this build does not
/// know. Extensions built against a newer SDK may declare extra hooks.
pub fn deserialize_known_hooks<'de, D>(deserializer: D) -> Result<Vec<Hook>, D::Error>
where
    D: Deserializer<'de>,
{
    let names = Vec::<String>::deserialize(deserializer)?;
    Ok(names
        .iter()
        .filter_map(|name| match name.parse::<Hook>() {
            Ok(hook) => Some(hook),
            Err(_) => {
                debug!(hook = %name, "Ignoring unknown hook");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_name_matches_serde() {
        for hook in Hook::ALL {
            let json = serde_json::to_string(&hook).unwrap();
            assert_eq!(json, format!("\"{}\"", hook.as_str()));
        }
    }

    #[test]
    fn test_parse_round_trip() {
        assert_eq!("post-publish".parse::<Hook>().unwrap(), Hook::PostPublish);
        assert_eq!("on-error".parse::<Hook>().unwrap(), Hook::OnError);
        assert!("post_publish".parse::<Hook>().is_err());
        assert!("".parse::<Hook>().is_err());
    }

    #[derive(Deserialize)]
    struct Declared {
        #[serde(deserialize_with = "deserialize_known_hooks")]
        hooks: Vec<Hook>,
    }

    #[test]
    fn test_unknown_hook_names_are_dropped() {
        let declared: Declared =
            serde_json::from_str(r#"{"hooks":["post-publish","pre-deploy","on-error"]}"#).unwrap();
        assert_eq!(declared.hooks, vec![Hook::PostPublish, Hook::OnError]);

        assert!(serde_json::from_str::<Declared>(r#"{"hooks":"post-publish"}"#).is_err());
    }
}
