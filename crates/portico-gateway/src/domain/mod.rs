//! Domain types for the gateway.
//!
//! Configuration, the method registry, per-call context, the stored credential and
//! error types. Nothing here does I/O beyond reading a credential file.

pub mod config;
pub mod context;
pub mod credential;
pub mod error;
pub mod methods;

// Re-exports for convenience
pub use config::{ConfigError, GatewayConfig, GuardScope, LimitsConfig};
pub use context::{PeerProcess, RequestContext};
pub use credential::{
    CredentialSource, EnvCredential, FileCredential, SessionToken, StaticCredential,
};
pub use error::{
    AuthorizeError, BindError, BindFailure, CredentialError, GatewayError, ListenerRole,
    ShutdownError, UploadError,
};
pub use methods::{get_method_info, is_method_supported, MethodInfo};
