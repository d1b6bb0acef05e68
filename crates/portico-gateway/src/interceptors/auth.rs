//! Authorization stage.
//!
//! Delegates to the service's own `authorize` hook. Fail-closed: a denial or a
//! failing hook ends the call before the handler runs.

use async_trait::async_trait;
use std::sync::Arc;
use tonic::Status;
use tracing::{debug, error, warn};

use super::{Interceptor, Next};
use crate::domain::context::RequestContext;
use crate::domain::error::AuthorizeError;
use crate::rpc::ClientCommands;

/// Authorization stage
pub struct AuthInterceptor {
    service: Arc<dyn ClientCommands>,
}

impl AuthInterceptor {
    pub fn new(service: Arc<dyn ClientCommands>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Interceptor for AuthInterceptor {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn intercept(&self, ctx: RequestContext, next: Next) -> Result<(), Status> {
        match self.service.authorize(&ctx).await {
            Ok(()) => {
                debug!(method = ctx.method.name, "Call authorized");
                next.run(ctx).await
            }
            Err(AuthorizeError::Denied(status)) => {
                warn!(
                    method = ctx.method.name,
                    code = ?status.code(),
                    "Call rejected by authorization hook"
                );
                Err(status)
            }
            Err(err @ AuthorizeError::Internal(_)) => {
                error!(method = ctx.method.name, error = %err, "Authorization hook failed");
                Err(err.into_status())
            }
        }
    }
}
