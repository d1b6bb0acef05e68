// Allow missing docs for internal items in development
#![allow(missing_docs)]

//! Portico Gateway - one application's command surface over three listeners.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              GATEWAY                                 │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐     ┌──────────────────┐     ┌──────────────────┐   │
//! │  │    gRPC     │     │  gRPC-web + WS   │     │    API proxy     │   │
//! │  │  Port 31007 │     │    Port 31008    │     │    Port 31009    │   │
//! │  └──────┬──────┘     └────────┬─────────┘     └───┬──────────┬───┘   │
//! │         │                     │                   │          │       │
//! │         │      tonic-web      │        POST /v1/file      anything   │
//! │         ◄─────────────────────┘        (loopback gRPC)     else      │
//! │         │◄────────────────────────────────────────┘          │       │
//! │  ┌──────┴──────────────────────────────────────┐             │       │
//! │  │             Interceptor Chain               │             │       │
//! │  │ Metrics → Tracing → Auth → Timeout → Peer   │             │       │
//! │  └──────┬──────────────────────────────────────┘             │       │
//! └─────────┼────────────────────────────────────────────────────┼───────┘
//!           ▼                                                    ▼
//!    ClientCommands (application)                     internal REST API
//! ```
//!
//! # Lifecycle
//!
//! - [`Gateway::start`] binds all three listeners or none of them.
//! - [`Gateway::stop`] drains RPC, then the bridge, then the proxy, then asks the
//!   application to shut down. It is safe to call more than once.
//!
//! # Usage
//!
//! ```ignore
//! use portico_gateway::{init_telemetry, EnvCredential, Gateway, GatewayConfig, TelemetryConfig};
//!
//! // Logging is the embedding process's choice; the gateway only emits `tracing` events
//! let _telemetry = init_telemetry(&TelemetryConfig::from_env())?;
//! let config = GatewayConfig::from_env();
//! let gateway = Gateway::new(config, Arc::new(app), Arc::new(EnvCredential::default()))?;
//! gateway.run_until(async { tokio::signal::ctrl_c().await.ok(); }).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod bridge;
pub mod domain;
pub mod interceptors;
pub mod listeners;
pub mod proxy;
pub mod rpc;
pub mod server;
pub mod service;

// Re-exports for public API
pub use domain::config::GatewayConfig;
pub use domain::context::RequestContext;
pub use domain::credential::{
    CredentialSource, EnvCredential, FileCredential, SessionToken, StaticCredential,
};
pub use domain::error::{
    AuthorizeError, BindError, CredentialError, GatewayError, ShutdownError, UploadError,
};
pub use domain::methods::{get_method_info, is_method_supported, MethodInfo};
pub use interceptors::{Interceptor, InterceptorChain, Next, RpcMetrics};
pub use listeners::GatewayAddrs;
pub use rpc::{ClientCommands, ClientCommandsClient, ClientCommandsServer};
pub use service::Gateway;
pub use portico_telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
