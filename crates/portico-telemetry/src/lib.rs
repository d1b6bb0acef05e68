//! # Portico Telemetry
//!
//! Logging and metrics shared by the Portico gateway crates.
//!
//! ## Components
//!
//! - **Logs**: `tracing-subscriber` with an env filter, pretty or JSON output on stderr
//! - **Metrics**: Prometheus collectors for the RPC server and the HTTP surfaces
//!
//! ## Usage
//!
//! ```rust,ignore
//! use portico_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! let _guard = init_telemetry(&config).expect("Failed to init telemetry");
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PORTICO_SERVICE_NAME` | `portico` | Service name in logs |
//! | `PORTICO_LOG_LEVEL` | `error` | Log level filter (`RUST_LOG` takes precedence) |
//! | `PORTICO_CONSOLE_OUTPUT` | `true` | Write logs to stderr |
//! | `PORTICO_JSON_LOGS` | `false` | JSON formatted logs |

#![warn(clippy::all)]
#![deny(unsafe_code)]

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{encode_metrics, observe_rpc, register_metrics, MetricsHandle};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and register the metric collectors.
///
/// Returns a guard that should be held for the lifetime of the application.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Metrics first: registration is synchronous and cannot conflict with logging
    let metrics = register_metrics()?;

    init_logging(config)?;

    Ok(TelemetryGuard { metrics })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    metrics: MetricsHandle,
}

impl TelemetryGuard {
    /// Metrics handle, for exposing the registry over HTTP.
    pub fn metrics(&self) -> &MetricsHandle {
        &self.metrics
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::debug!("Shutting down telemetry");
    }
}
