//! Out-of-process plugin transport.
//!
//! Each plugin runs as a child process speaking newline-delimited JSON on its
//! stdin/stdout (see `shipwright_plugin_sdk::protocol`). The host keeps one
//! request in flight per plugin. Whatever the plugin writes to stderr is
//! forwarded to the host log.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use shipwright_plugin_sdk::{
    Call, ConfigMap, ExecuteRequest, ExecuteResponse, Info, ProtocolError, Request, Response,
    ValidateResponse, read_message_into, write_message,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A started plugin, reachable through its three capabilities.
#[async_trait]
pub trait PluginHandle: Send + Sync {
    async fn get_info(&self) -> Result<Info, ProtocolError>;

    async fn validate(&self, config: &ConfigMap) -> Result<ValidateResponse, ProtocolError>;

    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, ProtocolError>;

    /// Ask the plugin to exit and release its resources. Never fails.
    async fn shutdown(&self);
}

/// Starts plugin binaries.
#[async_trait]
pub trait PluginLauncher: Send + Sync {
    async fn launch(&self, name: &str, binary: &Path) -> Result<Arc<dyn PluginHandle>, ProtocolError>;
}

/// Launches plugins as child processes talking over stdio.
#[derive(Debug, Default, Clone)]
pub struct ProcessLauncher;

#[async_trait]
impl PluginLauncher for ProcessLauncher {
    async fn launch(&self, name: &str, binary: &Path) -> Result<Arc<dyn PluginHandle>, ProtocolError> {
        let mut child = Command::new(binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or(ProtocolError::Closed)?;
        let stdout = child.stdout.take().ok_or(ProtocolError::Closed)?;

        if let Some(stderr) = child.stderr.take() {
            let plugin = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(plugin = %plugin, "{}", line);
                }
            });
        }

        debug!(plugin = %name, pid = ?child.id(), "Started plugin process");
        Ok(Arc::new(StdioClient::new(name, stdout, stdin).with_child(child)))
    }
}

struct Connection<R, W> {
    reader: BufReader<R>,
    /// Partial response line left by a call that was cancelled mid-read.
    pending: Vec<u8>,
    writer: W,
}

/// Request/response client over a pair of byte streams.
pub struct StdioClient<R, W> {
    name: String,
    conn: Mutex<Connection<R, W>>,
    next_id: AtomicU64,
    child: parking_lot::Mutex<Option<Child>>,
}

impl<R, W> StdioClient<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(name: &str, reader: R, writer: W) -> Self {
        Self {
            name: name.to_string(),
            conn: Mutex::new(Connection {
                reader: BufReader::new(reader),
                pending: Vec::new(),
                writer,
            }),
            next_id: AtomicU64::new(1),
            child: parking_lot::Mutex::new(None),
        }
    }

    fn with_child(self, child: Child) -> Self {
        *self.child.lock() = Some(child);
        self
    }

    async fn call<T: DeserializeOwned>(&self, call: Call) -> Result<T, ProtocolError> {
        self.round_trip(call).await?.into_result()
    }

    async fn round_trip(&self, call: Call) -> Result<Response, ProtocolError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let method = call.method();
        let mut guard = self.conn.lock().await;
        let conn = &mut *guard;

        write_message(&mut conn.writer, &Request { id, call }).await?;

        loop {
            let response: Response = read_message_into(&mut conn.reader, &mut conn.pending)
                .await?
                .ok_or(ProtocolError::Closed)?;

            // A caller that timed out leaves its answer behind in the pipe.
            if response.id < id {
                debug!(plugin = %self.name, stale_id = response.id, "Discarding stale response");
                continue;
            }
            if response.id != id {
                return Err(ProtocolError::UnexpectedResponse {
                    expected: id,
                    actual: response.id,
                });
            }

            debug!(plugin = %self.name, method, id, "Plugin call complete");
            return Ok(response);
        }
    }
}

#[async_trait]
impl<R, W> PluginHandle for StdioClient<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn get_info(&self) -> Result<Info, ProtocolError> {
        self.call(Call::GetInfo).await
    }

    async fn validate(&self, config: &ConfigMap) -> Result<ValidateResponse, ProtocolError> {
        self.call(Call::Validate {
            config: config.clone(),
        })
        .await
    }

    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, ProtocolError> {
        self.call(Call::Execute(request)).await
    }

    async fn shutdown(&self) {
        match tokio::time::timeout(SHUTDOWN_GRACE, self.round_trip(Call::Shutdown)).await {
            Ok(Ok(_)) => debug!(plugin = %self.name, "Plugin acknowledged shutdown"),
            Ok(Err(e)) => debug!(plugin = %self.name, error = %e, "Shutdown request failed"),
            Err(_) => warn!(plugin = %self.name, "Plugin did not acknowledge shutdown in time"),
        }

        let child = self.child.lock().take();
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                debug!(plugin = %self.name, error = %e, "Plugin process already gone");
            }
            let _ = child.wait().await;
        }
    }
}
