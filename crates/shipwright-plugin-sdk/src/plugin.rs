//! Extension-side trait and request loop.
//!
//! An extension binary implements [`Plugin`] and hands it to [`serve_stdio`]
//! from `main`. The loop answers requests until the host sends `shutdown` or
//! closes stdin.
//!
//! ```ignore
//! #[tokio::main]
//! async fn main() -> Result<(), shipwright_plugin_sdk::ProtocolError> {
//!     shipwright_plugin_sdk::serve_stdio(SlackNotifier::default()).await
//! }
//! ```

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use crate::protocol::{Call, ProtocolError, Request, Response, read_message, write_message};
use crate::types::{ConfigMap, ExecuteRequest, ExecuteResponse, Info, ValidateResponse};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The three capabilities every extension exposes.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn info(&self) -> Info;

    async fn validate(&self, config: &ConfigMap) -> Result<ValidateResponse, BoxError>;

    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, BoxError>;
}

/// Serve requests read from `reader`, writing responses to `writer`.
pub async fn serve<P, R, W>(plugin: P, reader: R, mut writer: W) -> Result<(), ProtocolError>
where
    P: Plugin,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);

    while let Some(request) = read_message::<_, Request>(&mut reader).await? {
        let id = request.id;
        let response = match request.call {
            Call::GetInfo => encode(id, &plugin.info()),
            Call::Validate { config } => match plugin.validate(&config).await {
                Ok(result) => encode(id, &result),
                Err(e) => Response::err(id, e.to_string()),
            },
            Call::Execute(execute) => match plugin.execute(execute).await {
                Ok(result) => encode(id, &result),
                Err(e) => Response::err(id, e.to_string()),
            },
            Call::Shutdown => {
                write_message(&mut writer, &Response::ok(id, serde_json::Value::Null)).await?;
                return Ok(());
            }
        };
        write_message(&mut writer, &response).await?;
    }

    Ok(())
}

/// Serve requests on the process's stdin/stdout.
pub async fn serve_stdio<P: Plugin>(plugin: P) -> Result<(), ProtocolError> {
    serve(plugin, tokio::io::stdin(), tokio::io::stdout()).await
}

fn encode<T: Serialize>(id: u64, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::ok(id, value),
        Err(e) => Response::err(id, format!("failed to encode response: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::Hook;
    use crate::types::{ReleaseContext, ValidationError};
    use tokio::io::{AsyncWriteExt, BufReader as TokioBufReader};

    struct Echo;

    #[async_trait]
    impl Plugin for Echo {
        fn info(&self) -> Info {
            Info {
                name: "echo".to_string(),
                version: "0.1.0".to_string(),
                description: String::new(),
                hooks: vec![Hook::PostPublish],
                config_schema: serde_json::Value::Null,
                sdk_version: crate::SDK_VERSION,
            }
        }

        async fn validate(&self, config: &ConfigMap) -> Result<ValidateResponse, BoxError> {
            if config.contains_key("channel") {
                Ok(ValidateResponse::ok())
            } else {
                Ok(ValidateResponse::invalid(vec![ValidationError::new(
                    "channel",
                    "required",
                )]))
            }
        }

        async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, BoxError> {
            if request.dry_run {
                return Err("dry run not supported".into());
            }
            Ok(ExecuteResponse::success(format!(
                "released {}",
                request.context.version
            )))
        }
    }

    #[tokio::test]
    async fn test_serve_answers_each_call_in_order() {
        let (host, extension) = tokio::io::duplex(4096);
        let (extension_read, extension_write) = tokio::io::split(extension);
        let server = tokio::spawn(serve(Echo, extension_read, extension_write));

        let (host_read, mut host_write) = tokio::io::split(host);
        let mut host_read = TokioBufReader::new(host_read);

        let calls = vec![
            Call::GetInfo,
            Call::Validate {
                config: ConfigMap::new(),
            },
            Call::Execute(ExecuteRequest {
                hook: Hook::PostPublish,
                context: ReleaseContext {
                    version: "2.0.0".to_string(),
                    ..Default::default()
                },
                config: ConfigMap::new(),
                dry_run: false,
            }),
        ];
        for (id, call) in calls.into_iter().enumerate() {
            write_message(&mut host_write, &Request { id: id as u64, call })
                .await
                .unwrap();
        }

        let info: Info = read_message::<_, Response>(&mut host_read)
            .await
            .unwrap()
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(info.name, "echo");

        let validation: ValidateResponse = read_message::<_, Response>(&mut host_read)
            .await
            .unwrap()
            .unwrap()
            .into_result()
            .unwrap();
        assert!(!validation.valid);
        assert_eq!(validation.errors[0].field, "channel");

        let executed: ExecuteResponse = read_message::<_, Response>(&mut host_read)
            .await
            .unwrap()
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(executed.message, "released 2.0.0");

        host_write.shutdown().await.unwrap();
        drop(host_write);
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_execute_error_becomes_remote_error() {
        let (host, extension) = tokio::io::duplex(4096);
        let (extension_read, extension_write) = tokio::io::split(extension);
        let server = tokio::spawn(serve(Echo, extension_read, extension_write));
        let (host_read, mut host_write) = tokio::io::split(host);
        let mut host_read = TokioBufReader::new(host_read);

        let request = Request {
            id: 9,
            call: Call::Execute(ExecuteRequest {
                hook: Hook::PostPublish,
                context: ReleaseContext::default(),
                config: ConfigMap::new(),
                dry_run: true,
            }),
        };
        write_message(&mut host_write, &request).await.unwrap();
        let response: Response = read_message(&mut host_read).await.unwrap().unwrap();
        assert_eq!(response.id, 9);
        assert_eq!(response.error.as_deref(), Some("dry run not supported"));

        write_message(
            &mut host_write,
            &Request {
                id: 10,
                call: Call::Shutdown,
            },
        )
        .await
        .unwrap();
        let ack: Response = read_message(&mut host_read).await.unwrap().unwrap();
        assert_eq!(ack.id, 10);
        server.await.unwrap().unwrap();
    }
}
