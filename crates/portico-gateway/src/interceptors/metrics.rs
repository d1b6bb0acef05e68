//! Call metrics stage.
//!
//! Outermost stage, enabled by `PORTICO_GRPC_METRICS=1`. Counts every call that
//! reaches the chain, including ones rejected by later stages, and feeds the
//! Prometheus collectors in `portico-telemetry`.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tonic::{Code, Status};

use portico_telemetry::metrics::GRPC_SERVER_STARTED;
use portico_telemetry::observe_rpc;

use super::{Interceptor, Next};
use crate::domain::context::RequestContext;

/// In-process RPC counters
#[derive(Default)]
pub struct RpcMetrics {
    pub calls_total: AtomicU64,
    pub calls_ok: AtomicU64,
    pub calls_error: AtomicU64,
    pub permission_denied: AtomicU64,
    pub deadline_exceeded: AtomicU64,

    // Latency tracking
    pub total_latency_us: AtomicU64,

    per_method: DashMap<&'static str, MethodCounters>,
}

#[derive(Debug, Default, Clone, Copy)]
struct MethodCounters {
    calls: u64,
    errors: u64,
}

impl RpcMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished call
    pub fn record_call(&self, method: &'static str, code: Code, latency_us: u64) {
        self.calls_total.fetch_add(1, Ordering::Relaxed);
        match code {
            Code::Ok => {
                self.calls_ok.fetch_add(1, Ordering::Relaxed);
            }
            Code::PermissionDenied | Code::Unauthenticated => {
                self.calls_error.fetch_add(1, Ordering::Relaxed);
                self.permission_denied.fetch_add(1, Ordering::Relaxed);
            }
            Code::DeadlineExceeded => {
                self.calls_error.fetch_add(1, Ordering::Relaxed);
                self.deadline_exceeded.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.calls_error.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);

        let mut entry = self.per_method.entry(method).or_default();
        entry.calls += 1;
        if code != Code::Ok {
            entry.errors += 1;
        }
    }

    /// Calls recorded for one method
    pub fn method_calls(&self, method: &str) -> u64 {
        self.per_method.get(method).map(|c| c.calls).unwrap_or(0)
    }

    /// Get average latency in ms
    pub fn average_latency_ms(&self) -> f64 {
        let total = self.total_latency_us.load(Ordering::Relaxed);
        let count = self.calls_total.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64 / 1000.0
        }
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        let methods: serde_json::Map<String, serde_json::Value> = self
            .per_method
            .iter()
            .map(|entry| {
                (
                    entry.key().to_string(),
                    serde_json::json!({
                        "calls": entry.calls,
                        "errors": entry.errors,
                    }),
                )
            })
            .collect();

        serde_json::json!({
            "calls": {
                "total": self.calls_total.load(Ordering::Relaxed),
                "ok": self.calls_ok.load(Ordering::Relaxed),
                "error": self.calls_error.load(Ordering::Relaxed),
                "permission_denied": self.permission_denied.load(Ordering::Relaxed),
                "deadline_exceeded": self.deadline_exceeded.load(Ordering::Relaxed),
            },
            "methods": methods,
            "latency": {
                "average_ms": self.average_latency_ms(),
            }
        })
    }
}

impl std::fmt::Debug for RpcMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcMetrics")
            .field("calls_total", &self.calls_total.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Metrics stage
pub struct MetricsInterceptor {
    metrics: Arc<RpcMetrics>,
}

impl MetricsInterceptor {
    pub fn new(metrics: Arc<RpcMetrics>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl Interceptor for MetricsInterceptor {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn intercept(&self, ctx: RequestContext, next: Next) -> Result<(), Status> {
        let method = ctx.method.name;
        GRPC_SERVER_STARTED.with_label_values(&[method]).inc();
        let start = Instant::now();

        let result = next.run(ctx).await;

        let elapsed = start.elapsed();
        let code = match &result {
            Ok(()) => Code::Ok,
            Err(status) => status.code(),
        };
        self.metrics
            .record_call(method, code, elapsed.as_micros() as u64);
        observe_rpc(method, &format!("{code:?}"), elapsed.as_secs_f64());

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::methods::{APP_GET_VERSION, FILE_UPLOAD};
    use crate::interceptors::InterceptorChain;

    #[test]
    fn test_metrics_recording() {
        let metrics = RpcMetrics::new();

        metrics.record_call("AppGetVersion", Code::Ok, 100);
        metrics.record_call("AppGetVersion", Code::Ok, 200);
        metrics.record_call("FileUpload", Code::PermissionDenied, 50);

        assert_eq!(metrics.calls_total.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.calls_ok.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.calls_error.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.permission_denied.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.method_calls("AppGetVersion"), 2);
        assert_eq!(metrics.method_calls("WalletCreateSession"), 0);
    }

    #[test]
    fn test_json_export() {
        let metrics = RpcMetrics::new();
        metrics.record_call("FileUpload", Code::DeadlineExceeded, 1_000);

        let json = metrics.to_json();
        assert_eq!(json["calls"]["total"], 1);
        assert_eq!(json["calls"]["deadline_exceeded"], 1);
        assert_eq!(json["methods"]["FileUpload"]["errors"], 1);
        assert!((metrics.average_latency_ms() - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_stage_counts_success_and_failure() {
        let metrics = Arc::new(RpcMetrics::new());
        let chain = InterceptorChain::new(vec![Arc::new(MetricsInterceptor::new(Arc::clone(
            &metrics,
        )))]);

        chain
            .invoke(RequestContext::internal(&APP_GET_VERSION), |_ctx| async {
                Ok::<_, Status>(())
            })
            .await
            .unwrap();
        let _ = chain
            .invoke(RequestContext::internal(&FILE_UPLOAD), |_ctx| async {
                Err::<(), _>(Status::invalid_argument("bad"))
            })
            .await;

        assert_eq!(metrics.calls_ok.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.calls_error.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.method_calls("FileUpload"), 1);
    }
}
