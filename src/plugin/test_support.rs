//! Fixtures shared by the plugin tests: archive builders, a local HTTP server
//! that records how often each path is requested, and an in-memory plugin
//! launcher.

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use flate2::Compression;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use shipwright_plugin_sdk::{
    ConfigMap, ExecuteRequest, ExecuteResponse, Hook, Info, ProtocolError, ValidateResponse,
    ValidationError,
};

use crate::plugin::loader::PendingPluginConfig;
use crate::plugin::process::{PluginHandle, PluginLauncher};
use crate::plugin::registry::{PluginInfo, Registry};

pub fn tar_gz_with_files(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    {
        let mut builder = tar::Builder::new(&mut encoder);
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.finish().unwrap();
    }
    encoder.finish().unwrap()
}

/// A tar.gz with one entry whose name is written verbatim into the header,
/// bypassing the builder's own path validation.
pub fn tar_gz_with_raw_entry(name: &str, data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    {
        let mut builder = tar::Builder::new(&mut encoder);
        let mut header = tar::Header::new_old();
        header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, data).unwrap();
        builder.finish().unwrap();
    }
    encoder.finish().unwrap()
}

/// Names ending in `/` become directory entries.
pub fn zip_with_files(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o755);

    for (name, data) in files {
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

/// Minimal catalog entry published under `shipwright-dev/plugin-<name>`.
pub fn plugin_info(name: &str, version: &str) -> PluginInfo {
    PluginInfo {
        repository: format!("shipwright-dev/plugin-{}", name),
        ..PluginInfo::delisted(name, version)
    }
}

pub fn catalog_yaml(plugins: &[PluginInfo]) -> Vec<u8> {
    let registry = Registry {
        plugins: plugins.to_vec(),
        ..Registry::default()
    };
    serde_yaml::to_string(&registry).unwrap().into_bytes()
}

#[derive(Clone, Default)]
struct ServerState {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

/// Serves in-memory files on `127.0.0.1`; unknown paths return 404.
pub struct TestServer {
    base_url: String,
    state: ServerState,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let state = ServerState::default();
        let app = Router::new().fallback(serve_file).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
            handle,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn put(&self, path: &str, body: Vec<u8>) {
        self.state.files.lock().insert(path.to_string(), body);
    }

    pub fn hits(&self, path: &str) -> usize {
        self.state.hits.lock().get(path).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.state.hits.lock().values().sum()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_file(State(state): State<ServerState>, uri: Uri) -> (StatusCode, Vec<u8>) {
    let path = uri.path().to_string();
    *state.hits.lock().entry(path.clone()).or_insert(0) += 1;

    match state.files.lock().get(&path) {
        Some(body) => (StatusCode::OK, body.clone()),
        None => (StatusCode::NOT_FOUND, Vec::new()),
    }
}

/// Host configuration for a plugin whose binary would live in `dir`.
/// An empty `hooks` slice means no explicit override.
pub fn pending(dir: &TempDir, name: &str, hooks: &[&str]) -> PendingPluginConfig {
    PendingPluginConfig {
        name: name.to_string(),
        path: dir.path().join(name),
        config: ConfigMap::new(),
        hooks: (!hooks.is_empty()).then(|| hooks.iter().map(|h| h.to_string()).collect()),
        timeout: None,
    }
}

/// How a fake plugin answers.
#[derive(Debug, Clone, Default)]
pub struct FakeBehavior {
    pub hooks: Vec<Hook>,
    pub fail_launch: bool,
    pub validate_error: Option<String>,
    /// `(field, message)` pairs reported as invalid configuration.
    pub invalid_fields: Vec<(String, String)>,
    pub execute_delay: Duration,
    pub execute_error: Option<String>,
}

/// Launcher that starts in-memory plugins and counts launches and shutdowns.
#[derive(Default)]
pub struct FakeLauncher {
    behaviors: HashMap<String, FakeBehavior>,
    launch_delay: Duration,
    first_launch_delay: Duration,
    launches: AtomicUsize,
    shutdowns: Arc<AtomicUsize>,
}

impl FakeLauncher {
    pub fn with_behavior(mut self, name: &str, behavior: FakeBehavior) -> Self {
        self.behaviors.insert(name.to_string(), behavior);
        self
    }

    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    /// Delay only the very first launch.
    pub fn with_first_launch_delay(mut self, delay: Duration) -> Self {
        self.first_launch_delay = delay;
        self
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PluginLauncher for FakeLauncher {
    async fn launch(&self, name: &str, _binary: &Path) -> Result<Arc<dyn PluginHandle>, ProtocolError> {
        let previous = self.launches.fetch_add(1, Ordering::SeqCst);
        let delay = if previous == 0 {
            self.launch_delay.max(self.first_launch_delay)
        } else {
            self.launch_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let behavior = self.behaviors.get(name).cloned().unwrap_or_default();
        if behavior.fail_launch {
            return Err(ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such plugin binary",
            )));
        }

        Ok(Arc::new(FakeHandle {
            name: name.to_string(),
            behavior,
            shutdowns: self.shutdowns.clone(),
        }))
    }
}

struct FakeHandle {
    name: String,
    behavior: FakeBehavior,
    shutdowns: Arc<AtomicUsize>,
}

#[async_trait]
impl PluginHandle for FakeHandle {
    async fn get_info(&self) -> Result<Info, ProtocolError> {
        Ok(Info {
            name: self.name.clone(),
            version: "1.0.0".to_string(),
            description: String::new(),
            hooks: self.behavior.hooks.clone(),
            config_schema: serde_json::Value::Null,
            sdk_version: shipwright_plugin_sdk::SDK_VERSION,
        })
    }

    async fn validate(&self, _config: &ConfigMap) -> Result<ValidateResponse, ProtocolError> {
        if let Some(error) = &self.behavior.validate_error {
            return Err(ProtocolError::Remote(error.clone()));
        }
        if self.behavior.invalid_fields.is_empty() {
            return Ok(ValidateResponse::ok());
        }
        Ok(ValidateResponse::invalid(
            self.behavior
                .invalid_fields
                .iter()
                .map(|(field, message)| ValidationError::new(field.as_str(), message.as_str()))
                .collect(),
        ))
    }

    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, ProtocolError> {
        if !self.behavior.execute_delay.is_zero() {
            tokio::time::sleep(self.behavior.execute_delay).await;
        }
        if let Some(error) = &self.behavior.execute_error {
            return Ok(ExecuteResponse::failure(error.clone()));
        }

        let mut response = ExecuteResponse::success(format!(
            "{} handled {} for {}{}",
            self.name,
            request.hook,
            request.context.version,
            if request.dry_run { " (dry run)" } else { "" }
        ));
        response.outputs = request.config.into_iter().collect();
        Ok(response)
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}
