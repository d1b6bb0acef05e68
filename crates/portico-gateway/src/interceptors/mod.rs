//! Interceptor chain for the RPC server.
//!
//! Stage order: Metrics (optional) → Tracing → Auth → Timeout guard (optional) →
//! Process info → Handler
//!
//! Every stage receives the call context and a [`Next`] continuation. A stage that
//! returns without running `next` short-circuits the call: the handler is never
//! invoked and the stage's status goes back to the client. The chain runs after the
//! message has been decoded, so size limits are enforced before any stage sees it.

pub mod auth;
pub mod metrics;
pub mod process_info;
pub mod timeout;
pub mod tracing;

pub use auth::AuthInterceptor;
pub use metrics::{MetricsInterceptor, RpcMetrics};
pub use process_info::ProcessInfoInterceptor;
pub use timeout::TimeoutGuardInterceptor;
pub use tracing::TracingInterceptor;

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tonic::Status;

use crate::domain::config::InterceptorConfig;
use crate::domain::context::RequestContext;
use crate::rpc::ClientCommands;

/// One stage of the chain.
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    /// Stage name, for logs and tests.
    fn name(&self) -> &'static str;

    /// Run the stage. Call `next.run(ctx)` to continue the chain.
    async fn intercept(&self, ctx: RequestContext, next: Next) -> Result<(), Status>;
}

type Terminal = Box<dyn FnOnce(RequestContext) -> BoxFuture<'static, Result<(), Status>> + Send>;

/// Continuation for the rest of the chain.
pub struct Next {
    stages: Arc<[Arc<dyn Interceptor>]>,
    position: usize,
    terminal: Terminal,
}

impl Next {
    /// Run the remaining stages and then the handler.
    pub fn run(self, ctx: RequestContext) -> BoxFuture<'static, Result<(), Status>> {
        match self.stages.get(self.position).cloned() {
            Some(stage) => {
                let next = Next {
                    stages: self.stages,
                    position: self.position + 1,
                    terminal: self.terminal,
                };
                Box::pin(async move { stage.intercept(ctx, next).await })
            }
            None => (self.terminal)(ctx),
        }
    }
}

/// Ordered, shareable set of stages.
#[derive(Clone)]
pub struct InterceptorChain {
    stages: Arc<[Arc<dyn Interceptor>]>,
}

impl InterceptorChain {
    pub fn new(stages: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            stages: stages.into(),
        }
    }

    /// Build the gateway's chain.
    ///
    /// `metrics` is only used when `config.metrics_enabled` is set.
    pub fn from_config(
        config: &InterceptorConfig,
        service: Arc<dyn ClientCommands>,
        metrics: Arc<RpcMetrics>,
    ) -> Self {
        let mut stages: Vec<Arc<dyn Interceptor>> = Vec::with_capacity(5);

        if config.metrics_enabled {
            stages.push(Arc::new(MetricsInterceptor::new(metrics)));
        }
        stages.push(Arc::new(TracingInterceptor::new()));
        stages.push(Arc::new(AuthInterceptor::new(service)));
        if config.timeout_guard.enabled {
            stages.push(Arc::new(TimeoutGuardInterceptor::new(
                config.timeout_guard.clone(),
            )));
        }
        if !config.process_info_methods.is_empty() {
            stages.push(Arc::new(ProcessInfoInterceptor::new(
                config.process_info_methods.iter().cloned(),
            )));
        }

        Self::new(stages)
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Run the chain around `handler` and return the handler's reply.
    pub async fn invoke<Resp, F, Fut>(&self, ctx: RequestContext, handler: F) -> Result<Resp, Status>
    where
        Resp: Send + 'static,
        F: FnOnce(RequestContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let terminal: Terminal = Box::new(move |ctx| {
            Box::pin(async move {
                let reply = handler(ctx).await?;
                // Receiver is gone when the timeout guard already answered
                let _ = reply_tx.send(reply);
                Ok(())
            })
        });

        let next = Next {
            stages: Arc::clone(&self.stages),
            position: 0,
            terminal,
        };
        next.run(ctx).await?;

        reply_rx
            .await
            .map_err(|_| Status::internal("handler finished without a reply"))
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("stages", &self.stage_names())
            .finish()
    }
}
