//! Timeout guard for long calls.
//!
//! Enabled unless `PORTICO_GRPC_NO_DEBUG_TIMEOUT=1`. The rest of the chain runs on
//! its own task; when the limit (or the client deadline, whichever is sooner) passes
//! first, the caller gets `DEADLINE_EXCEEDED` and the task is left to finish on its
//! own. The handler is not cancelled.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::timeout;
use tonic::Status;
use tracing::warn;

use super::{Interceptor, Next};
use crate::domain::config::{GuardScope, TimeoutGuardConfig};
use crate::domain::context::RequestContext;
use crate::domain::methods::MethodInfo;

/// Timeout guard stage
pub struct TimeoutGuardInterceptor {
    config: TimeoutGuardConfig,
}

impl TimeoutGuardInterceptor {
    pub fn new(config: TimeoutGuardConfig) -> Self {
        Self { config }
    }

    fn applies_to(&self, method: &MethodInfo) -> bool {
        match self.config.scope {
            GuardScope::All => true,
            GuardScope::LongRunning => method.is_long_running(),
        }
    }

    /// Effective limit for one call.
    fn limit_for(&self, ctx: &RequestContext) -> Duration {
        match ctx.remaining() {
            Some(remaining) => remaining.min(self.config.limit),
            None => self.config.limit,
        }
    }
}

#[async_trait]
impl Interceptor for TimeoutGuardInterceptor {
    fn name(&self) -> &'static str {
        "timeout_guard"
    }

    async fn intercept(&self, ctx: RequestContext, next: Next) -> Result<(), Status> {
        if !self.applies_to(ctx.method) {
            return next.run(ctx).await;
        }

        let limit = self.limit_for(&ctx);
        let method = ctx.method.name;
        let task = tokio::spawn(next.run(ctx));

        match timeout(limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                warn!(method, error = %join_err, "Guarded call task failed");
                Err(Status::internal("call task failed"))
            }
            Err(_) => {
                warn!(
                    method,
                    timeout_ms = limit.as_millis() as u64,
                    "Call exceeded timeout guard; handler left running"
                );
                Err(Status::deadline_exceeded(format!(
                    "{method} did not finish within {}ms",
                    limit.as_millis()
                )))
            }
        }
    }
}
