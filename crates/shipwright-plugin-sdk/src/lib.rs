//! Process-boundary contract for shipwright extensions.
//!
//! Extensions run as child processes of the release host. This crate holds
//! everything both sides must agree on: the SDK version, the lifecycle hook
//! names, the `GetInfo`/`Validate`/`Execute` payloads, and the line-delimited
//! JSON framing used on the child's stdin/stdout.

pub mod hooks;
pub mod plugin;
pub mod protocol;
pub mod types;
pub mod version;

pub use hooks::Hook;
pub use plugin::{BoxError, Plugin, serve, serve_stdio};
pub use protocol::{
    Call, ProtocolError, Request, Response, read_message, read_message_into, write_message,
};
pub use types::{
    Artifact, ConfigMap, ExecuteRequest, ExecuteResponse, Info, ReleaseContext, ValidateResponse,
    ValidationError,
};
pub use version::{SDK_VERSION, is_sdk_compatible};
