//! In-crate test double for [`ClientCommands`].

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tonic::Status;

use super::pb::*;
use super::ClientCommands;
use crate::domain::context::RequestContext;
use crate::domain::error::AuthorizeError;

#[derive(Default)]
pub(crate) struct StubCommands {
    deny: Option<Status>,
    hook_failure: Option<String>,
    pub shutdowns: AtomicUsize,
    pub handled: AtomicUsize,
}

impl StubCommands {
    pub fn deny_with(mut self, status: Status) -> Self {
        self.deny = Some(status);
        self
    }

    pub fn authorize_fails(mut self, reason: &str) -> Self {
        self.hook_failure = Some(reason.to_string());
        self
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientCommands for StubCommands {
    async fn authorize(&self, _ctx: &RequestContext) -> Result<(), AuthorizeError> {
        if let Some(reason) = &self.hook_failure {
            return Err(AuthorizeError::Internal(reason.clone()));
        }
        match &self.deny {
            Some(status) => Err(AuthorizeError::Denied(status.clone())),
            None => Ok(()),
        }
    }

    async fn app_get_version(
        &self,
        _ctx: RequestContext,
        _request: AppGetVersionRequest,
    ) -> Result<AppGetVersionResponse, Status> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(AppGetVersionResponse {
            error: None,
            version: "0.0.0-test".into(),
            details: String::new(),
        })
    }

    async fn app_shutdown(
        &self,
        _ctx: RequestContext,
        _request: AppShutdownRequest,
    ) -> Result<AppShutdownResponse, Status> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(AppShutdownResponse { error: None })
    }
}
