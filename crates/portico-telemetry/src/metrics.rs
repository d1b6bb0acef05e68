//! Prometheus metrics for the Portico gateway.
//!
//! All metrics follow the naming convention: `portico_<surface>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., grpc_server_started_total)
//! - **Histogram**: Distribution of values (e.g., grpc_server_handling_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, CounterVec, Encoder, HistogramVec, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // BINARY RPC SERVER
    // =========================================================================

    /// RPC calls that entered the interceptor chain
    pub static ref GRPC_SERVER_STARTED: IntCounterVec = IntCounterVec::new(
        Opts::new("portico_grpc_server_started_total", "Total RPCs started on the server"),
        &["grpc_method"]
    ).expect("metric creation failed");

    /// RPC calls completed, by status code
    pub static ref GRPC_SERVER_HANDLED: IntCounterVec = IntCounterVec::new(
        Opts::new("portico_grpc_server_handled_total", "Total RPCs completed on the server"),
        &["grpc_method", "grpc_code"]
    ).expect("metric creation failed");

    /// RPC handling latency
    pub static ref GRPC_SERVER_HANDLING_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "portico_grpc_server_handling_seconds",
            "Time spent handling RPCs, including interceptors"
        ).buckets(exponential_buckets(0.0005, 2.0, 16).expect("valid buckets")),
        &["grpc_method"]
    ).expect("metric creation failed");

    // =========================================================================
    // HTTP SURFACES
    // =========================================================================

    /// Requests forwarded to the internal origin
    pub static ref PROXY_REQUESTS: CounterVec = CounterVec::new(
        Opts::new("portico_proxy_requests_total", "Requests forwarded to the internal API"),
        &["outcome"]  // outcome: forwarded/origin_error
    ).expect("metric creation failed");

    /// Upload bridge requests by result
    pub static ref UPLOADS: IntCounterVec = IntCounterVec::new(
        Opts::new("portico_upload_requests_total", "File upload bridge requests"),
        &["status"]  // HTTP status class: 2xx/4xx/5xx
    ).expect("metric creation failed");

    /// WebSocket bridge sessions opened
    pub static ref WEBSOCKET_SESSIONS: IntCounter = IntCounter::new(
        "portico_bridge_websocket_sessions_total",
        "WebSocket-framed bridge sessions accepted"
    ).expect("metric creation failed");
}

/// Handle proving the collectors are registered.
pub struct MetricsHandle {
    registry: Arc<Registry>,
}

impl MetricsHandle {
    /// Registry holding every gateway collector.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once; collectors that are already registered are skipped.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // RPC
        Box::new(GRPC_SERVER_STARTED.clone()),
        Box::new(GRPC_SERVER_HANDLED.clone()),
        Box::new(GRPC_SERVER_HANDLING_SECONDS.clone()),
        // HTTP
        Box::new(PROXY_REQUESTS.clone()),
        Box::new(UPLOADS.clone()),
        Box::new(WEBSOCKET_SESSIONS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Record a finished RPC: status code label and latency in seconds.
pub fn observe_rpc(method: &str, code: &str, seconds: f64) {
    GRPC_SERVER_HANDLED
        .with_label_values(&[method, code])
        .inc();
    GRPC_SERVER_HANDLING_SECONDS
        .with_label_values(&[method])
        .observe(seconds);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics_twice() {
        assert!(register_metrics().is_ok());
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn test_observe_rpc() {
        let before = GRPC_SERVER_HANDLED
            .with_label_values(&["TestMethod", "Ok"])
            .get();
        observe_rpc("TestMethod", "Ok", 0.002);
        let after = GRPC_SERVER_HANDLED
            .with_label_values(&["TestMethod", "Ok"])
            .get();
        assert_eq!(after, before + 1);
    }

    #[test]
    fn test_encode_contains_rpc_metrics() {
        register_metrics().unwrap();
        GRPC_SERVER_STARTED.with_label_values(&["Encode"]).inc();
        let text = encode_metrics().unwrap();
        assert!(text.contains("portico_grpc_server_started_total"));
    }
}
