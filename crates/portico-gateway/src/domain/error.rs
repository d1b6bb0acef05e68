//! Gateway error types.
//!
//! `GatewayError` is what `Gateway::new`/`start` return. Upload failures carry their
//! own HTTP status mapping; RPC failures stay as `tonic::Status`.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tonic::Status;

use super::config::ConfigError;

/// Gateway-level errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// One of the three listeners could not be bound; none are left open
    #[error(transparent)]
    Bind(#[from] BindError),

    /// Prometheus collectors could not be registered or encoded
    #[error(transparent)]
    Telemetry(#[from] portico_telemetry::TelemetryError),

    /// `start` called on a running gateway
    #[error("gateway is already running")]
    AlreadyRunning,

    /// `start` called after `stop`
    #[error("gateway has been stopped")]
    Stopped,

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Listener identity, in bind order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerRole {
    Rpc,
    Bridge,
    Proxy,
}

impl fmt::Display for ListenerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ListenerRole::Rpc => "gRPC",
            ListenerRole::Bridge => "gRPC-web",
            ListenerRole::Proxy => "API proxy",
        })
    }
}

/// Why a bind failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindFailure {
    AddressInUse,
    PermissionDenied,
    InvalidAddress,
    Other,
}

impl BindFailure {
    pub fn classify(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse => BindFailure::AddressInUse,
            io::ErrorKind::PermissionDenied => BindFailure::PermissionDenied,
            io::ErrorKind::AddrNotAvailable | io::ErrorKind::InvalidInput => {
                BindFailure::InvalidAddress
            }
            _ => BindFailure::Other,
        }
    }
}

impl fmt::Display for BindFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BindFailure::AddressInUse => "address in use",
            BindFailure::PermissionDenied => "permission denied",
            BindFailure::InvalidAddress => "invalid address",
            BindFailure::Other => "bind failed",
        })
    }
}

/// A listener that could not be bound.
#[derive(Debug, thiserror::Error)]
#[error("failed to bind {role} listener on {addr}: {kind}")]
pub struct BindError {
    pub role: ListenerRole,
    pub addr: SocketAddr,
    pub kind: BindFailure,
    #[source]
    pub source: io::Error,
}

impl BindError {
    pub fn new(role: ListenerRole, addr: SocketAddr, source: io::Error) -> Self {
        Self {
            role,
            addr,
            kind: BindFailure::classify(&source),
            source,
        }
    }
}

/// A shutdown phase that did not complete cleanly.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("{server} did not stop within {after:?}")]
    TimedOut {
        server: &'static str,
        after: Duration,
    },

    #[error("{server} task failed: {reason}")]
    TaskFailed {
        server: &'static str,
        reason: String,
    },

    #[error("application shutdown returned an error: {0}")]
    Application(String),
}

/// Outcome of the service's authorization hook.
#[derive(Debug, thiserror::Error)]
pub enum AuthorizeError {
    /// The call is not allowed; returned to the caller as-is
    #[error("{}", .0.message())]
    Denied(Status),

    /// The hook itself failed; the call is rejected
    #[error("authorization hook failed: {0}")]
    Internal(String),
}

impl AuthorizeError {
    /// Denied with `PermissionDenied`.
    pub fn denied(message: impl Into<String>) -> Self {
        AuthorizeError::Denied(Status::permission_denied(message))
    }

    /// Status handed back to the RPC caller.
    pub fn into_status(self) -> Status {
        match self {
            AuthorizeError::Denied(status) => status,
            AuthorizeError::Internal(message) => {
                Status::internal(format!("authorization failed: {message}"))
            }
        }
    }
}

/// Stored credential lookup failures
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no session token found")]
    Missing,

    #[error("credential store unreadable: {0}")]
    Unreadable(#[source] io::Error),

    #[error("credential store malformed: {0}")]
    Malformed(String),
}

/// File upload bridge failures, each mapped to one HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Failed to parse form: {0}")]
    MalformedForm(String),

    #[error("space_id is required")]
    MissingSpaceId,

    #[error("file is required")]
    MissingFile,

    /// Detail stays in the server log; the client only sees the fixed message
    #[error("Failed to create temp file")]
    Staging(#[source] io::Error),

    #[error("Failed to get stored session token")]
    Credential(#[source] CredentialError),

    #[error("Failed to connect to gRPC server: {0}")]
    Connect(String),

    #[error("gRPC error: code = {:?} desc = {}", .0.code(), .0.message())]
    Transport(Status),

    #[error("Upload error: {description} (Token: {token_preview}, Space: {space_id})")]
    Application {
        description: String,
        token_preview: String,
        space_id: String,
    },
}

impl UploadError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            UploadError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            UploadError::MalformedForm(_)
            | UploadError::MissingSpaceId
            | UploadError::MissingFile
            | UploadError::Application { .. } => StatusCode::BAD_REQUEST,
            UploadError::Staging(_)
            | UploadError::Credential(_)
            | UploadError::Connect(_)
            | UploadError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        // Plain text, newline terminated
        (self.status_code(), format!("{self}\n")).into_response()
    }
}
