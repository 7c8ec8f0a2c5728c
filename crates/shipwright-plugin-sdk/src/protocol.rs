//! Wire protocol between the host and an extension process.
//!
//! Messages are single-line JSON documents. The host writes a [`Request`] to
//! the child's stdin and reads exactly one [`Response`] with the same id from
//! its stdout before sending the next request.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::types::{ConfigMap, ExecuteRequest};

/// Errors on either side of the process boundary.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("connection closed by peer")]
    Closed,

    #[error("extension returned an error: {0}")]
    Remote(String),

    #[error("unexpected response id {actual} (expected {expected})")]
    UnexpectedResponse { expected: u64, actual: u64 },

    #[error("response {0} carries neither result nor error")]
    EmptyResponse(u64),
}

/// A capability call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Call {
    GetInfo,
    Validate { config: ConfigMap },
    Execute(ExecuteRequest),
    Shutdown,
}

impl Call {
    pub fn method(&self) -> &'static str {
        match self {
            Call::GetInfo => "get_info",
            Call::Validate { .. } => "validate",
            Call::Execute(_) => "execute",
            Call::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub call: Call,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Decode the typed result, surfacing a remote error as [`ProtocolError::Remote`].
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, ProtocolError> {
        if let Some(error) = self.error {
            return Err(ProtocolError::Remote(error));
        }
        let value = self.result.ok_or(ProtocolError::EmptyResponse(self.id))?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Write one message followed by a newline and flush.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next non-blank line as a message. `Ok(None)` means end of stream.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    read_message_into(reader, &mut Vec::new()).await
}

/// Like [`read_message`], but keeps a partly read line in `buf`.
///
/// Cancel safe: if the future is dropped mid-line, the bytes read so far stay
/// in `buf` and the next call with the same buffer resumes the same line.
pub async fn read_message_into<R, T>(reader: &mut R, buf: &mut Vec<u8>) -> Result<Option<T>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    loop {
        let read = reader.read_until(b'\n', buf).await?;
        if read == 0 && buf.is_empty() {
            return Ok(None);
        }

        let line = std::mem::take(buf);
        let line = line.trim_ascii();
        if !line.is_empty() {
            return Ok(Some(serde_json::from_slice(line)?));
        }
        if read == 0 {
            return Ok(None);
        }
    }
}
