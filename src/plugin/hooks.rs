//! Hook dispatch to loaded plugins.
//!
//! Every plugin collected for a hook runs concurrently and independently: a
//! plugin that times out or fails is reported in its own [`HookResult`] and
//! does not affect the others.

use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use shipwright_plugin_sdk::{ExecuteRequest, ExecuteResponse, Hook, ReleaseContext};

use crate::plugin::loader::{LoadedPlugin, PendingPluginConfig, PluginHost};

/// Result of a hook execution.
#[derive(Debug, Clone)]
pub struct HookResult {
    /// Name of the plugin that executed the hook.
    pub plugin_name: String,
    pub hook: Hook,
    /// The plugin's answer, if it produced one in time.
    pub response: Option<ExecuteResponse>,
    /// Error message if the hook failed (timeout, transport or plugin error).
    pub error: Option<String>,
    pub duration: Duration,
}

impl HookResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.response.as_ref().is_some_and(|r| r.success)
    }
}

/// Whether `hook` should be dispatched to this plugin.
///
/// A non-empty explicit hook list in the configuration is authoritative and
/// the plugin's declared hooks are ignored. Otherwise the declared hooks are
/// used, which needs the plugin to be loaded.
pub fn config_has_hook(config: &PendingPluginConfig, hook: Hook, loaded: Option<&LoadedPlugin>) -> bool {
    match &config.hooks {
        Some(hooks) if !hooks.is_empty() => hooks.iter().any(|h| h == hook.as_str()),
        _ => loaded.is_some_and(|plugin| plugin.info.hooks.contains(&hook)),
    }
}

impl PluginHost {
    /// Run `hook` on every interested plugin and collect one result each,
    /// in registration order.
    pub async fn execute_hook(&self, hook: Hook, context: &ReleaseContext, dry_run: bool) -> Vec<HookResult> {
        let plugins = self.collect_plugins_for_hook(hook).await;
        if plugins.is_empty() {
            debug!(hook = %hook, "No plugins for hook");
            return Vec::new();
        }

        info!(hook = %hook, count = plugins.len(), dry_run, "Executing hook");

        let runs = plugins.into_iter().map(|(name, plugin)| {
            let request = ExecuteRequest {
                hook,
                context: context.clone(),
                config: self.plugin_config(&name),
                dry_run,
            };
            async move { call_with_timeout(name, &plugin, request).await }
        });

        join_all(runs).await
    }
}

async fn call_with_timeout(plugin_name: String, plugin: &LoadedPlugin, request: ExecuteRequest) -> HookResult {
    let hook = request.hook;
    let started = Instant::now();

    let (response, error) =
        match tokio::time::timeout(plugin.timeout, plugin.handle.execute(request)).await {
            Ok(Ok(response)) if response.success => (Some(response), None),
            Ok(Ok(response)) => {
                let error = response
                    .error
                    .clone()
                    .unwrap_or_else(|| "plugin reported failure".to_string());
                (Some(response), Some(error))
            }
            Ok(Err(e)) => (None, Some(e.to_string())),
            Err(_) => (
                None,
                Some(format!("timed out after {:?}", plugin.timeout)),
            ),
        };

    let duration = started.elapsed();
    match &error {
        None => debug!(plugin = %plugin_name, hook = %hook, ?duration, "Hook succeeded"),
        Some(e) => warn!(plugin = %plugin_name, hook = %hook, error = %e, "Hook failed"),
    }

    HookResult {
        plugin_name,
        hook,
        response,
        error,
        duration,
    }
}
