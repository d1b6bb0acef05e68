//! Latency tracing stage.
//!
//! Opens one span per call and logs how long the call took, including the stages
//! inside it. Callers that send a W3C `traceparent` get it attached to the span.

use async_trait::async_trait;
use std::time::Instant;
use tonic::metadata::MetadataMap;
use tonic::Status;
use tracing::{debug, info_span, Instrument, Span};

use super::{Interceptor, Next};
use crate::domain::context::RequestContext;

/// Tracing stage
#[derive(Clone, Default)]
pub struct TracingInterceptor;

impl TracingInterceptor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Interceptor for TracingInterceptor {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn intercept(&self, ctx: RequestContext, next: Next) -> Result<(), Status> {
        let span = info_span!(
            "rpc_call",
            rpc.method = ctx.method.name,
            request_id = %ctx.request_id,
            otel.kind = "server",
            otel.status_code = tracing::field::Empty,
            trace_id = tracing::field::Empty,
        );
        if let Some((trace_id, _parent)) = extract_trace_context(&ctx.metadata) {
            span.record("trace_id", trace_id.as_str());
        }

        async move {
            let start = Instant::now();
            let result = next.run(ctx).await;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

            match &result {
                Ok(()) => {
                    Span::current().record("otel.status_code", "OK");
                    debug!(elapsed_ms, "RPC completed");
                }
                Err(status) => {
                    Span::current().record("otel.status_code", "ERROR");
                    debug!(
                        elapsed_ms,
                        code = ?status.code(),
                        grpc_message = status.message(),
                        "RPC failed"
                    );
                }
            }
            result
        }
        .instrument(span)
        .await
    }
}

/// Trace and parent span ids from a `traceparent` entry
/// (`version-trace_id-parent_id-flags`).
fn extract_trace_context(metadata: &MetadataMap) -> Option<(String, String)> {
    let traceparent = metadata.get("traceparent")?.to_str().ok()?;
    let parts: Vec<&str> = traceparent.split('-').collect();
    if parts.len() != 4 || parts[1].len() != 32 || parts[2].len() != 16 {
        return None;
    }
    Some((parts[1].to_string(), parts[2].to_string()))
}
