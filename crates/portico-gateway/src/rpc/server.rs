//! Server side of `portico.ClientCommands`.
//!
//! [`ClientCommands`] is what the embedding application implements. The gateway
//! wraps it in [`ClientCommandsServer`], which decodes each call with the
//! configured size limits and runs it through the interceptor chain.

use async_trait::async_trait;
use std::convert::Infallible;
use std::marker::PhantomData;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::body::BoxBody;
use tonic::codec::ProstCodec;
use tonic::codegen::{empty_body, http, Body, BoxFuture, Service, StdError};
use tonic::server::{Grpc, NamedService, UnaryService};
use tonic::Status;

use super::pb::*;
use crate::domain::context::RequestContext;
use crate::domain::error::AuthorizeError;
use crate::domain::methods::{self, paths, MethodInfo};
use crate::interceptors::InterceptorChain;

/// Application service behind the gateway.
///
/// `authorize` is consulted by the chain before every call. Methods the
/// application does not serve can be left to the default, which answers
/// `UNIMPLEMENTED`.
#[async_trait]
pub trait ClientCommands: Send + Sync + 'static {
    /// Decide whether the call may proceed.
    async fn authorize(&self, ctx: &RequestContext) -> Result<(), AuthorizeError>;

    async fn app_get_version(
        &self,
        _ctx: RequestContext,
        _request: AppGetVersionRequest,
    ) -> Result<AppGetVersionResponse, Status> {
        Err(Status::unimplemented("AppGetVersion is not implemented"))
    }

    async fn app_shutdown(
        &self,
        _ctx: RequestContext,
        _request: AppShutdownRequest,
    ) -> Result<AppShutdownResponse, Status> {
        Err(Status::unimplemented("AppShutdown is not implemented"))
    }

    async fn wallet_create_session(
        &self,
        _ctx: RequestContext,
        _request: WalletCreateSessionRequest,
    ) -> Result<WalletCreateSessionResponse, Status> {
        Err(Status::unimplemented("WalletCreateSession is not implemented"))
    }

    async fn account_local_link_new_challenge(
        &self,
        _ctx: RequestContext,
        _request: AccountLocalLinkNewChallengeRequest,
    ) -> Result<AccountLocalLinkNewChallengeResponse, Status> {
        Err(Status::unimplemented(
            "AccountLocalLinkNewChallenge is not implemented",
        ))
    }

    async fn account_local_link_solve_challenge(
        &self,
        _ctx: RequestContext,
        _request: AccountLocalLinkSolveChallengeRequest,
    ) -> Result<AccountLocalLinkSolveChallengeResponse, Status> {
        Err(Status::unimplemented(
            "AccountLocalLinkSolveChallenge is not implemented",
        ))
    }

    async fn file_upload(
        &self,
        _ctx: RequestContext,
        _request: FileUploadRequest,
    ) -> Result<FileUploadResponse, Status> {
        Err(Status::unimplemented("FileUpload is not implemented"))
    }
}

type Handler<Req, Resp> = fn(
    Arc<dyn ClientCommands>,
    RequestContext,
    Req,
) -> futures::future::BoxFuture<'static, Result<Resp, Status>>;

/// Unary method routed through the interceptor chain.
struct InterceptedUnary<Req, Resp> {
    method: &'static MethodInfo,
    chain: InterceptorChain,
    service: Arc<dyn ClientCommands>,
    handler: Handler<Req, Resp>,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> UnaryService<Req> for InterceptedUnary<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    type Response = Resp;
    type Future = BoxFuture<tonic::Response<Resp>, Status>;

    fn call(&mut self, request: tonic::Request<Req>) -> Self::Future {
        let ctx = RequestContext::from_request(self.method, &request);
        let message = request.into_inner();
        let chain = self.chain.clone();
        let service = Arc::clone(&self.service);
        let handler = self.handler;

        Box::pin(async move {
            let reply = chain
                .invoke(ctx, move |ctx| handler(service, ctx, message))
                .await?;
            Ok(tonic::Response::new(reply))
        })
    }
}

/// tonic service for `portico.ClientCommands`.
#[derive(Clone)]
pub struct ClientCommandsServer {
    inner: Arc<dyn ClientCommands>,
    chain: InterceptorChain,
    max_decoding_message_size: usize,
    max_encoding_message_size: usize,
}

impl ClientCommandsServer {
    pub fn new(inner: Arc<dyn ClientCommands>, chain: InterceptorChain) -> Self {
        Self {
            inner,
            chain,
            max_decoding_message_size: crate::domain::config::DEFAULT_MAX_RECV_MESSAGE_SIZE,
            max_encoding_message_size: usize::MAX,
        }
    }

    /// Limits the maximum size of a decoded message.
    #[must_use]
    pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
        self.max_decoding_message_size = limit;
        self
    }

    /// Limits the maximum size of an encoded message.
    #[must_use]
    pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
        self.max_encoding_message_size = limit;
        self
    }

    fn unary<Req, Resp, B>(
        &self,
        method: &'static MethodInfo,
        handler: Handler<Req, Resp>,
        req: http::Request<B>,
    ) -> BoxFuture<http::Response<BoxBody>, Infallible>
    where
        Req: prost::Message + Default + Send + 'static,
        Resp: prost::Message + Send + 'static,
        B: Body + Send + 'static,
        B::Error: Into<StdError> + Send + 'static,
    {
        let svc = InterceptedUnary {
            method,
            chain: self.chain.clone(),
            service: Arc::clone(&self.inner),
            handler,
            _marker: PhantomData,
        };
        let max_decoding = self.max_decoding_message_size;
        let max_encoding = self.max_encoding_message_size;

        Box::pin(async move {
            let codec = ProstCodec::<Resp, Req>::default();
            let mut grpc = Grpc::new(codec)
                .apply_max_message_size_config(Some(max_decoding), Some(max_encoding));
            Ok(grpc.unary(svc, req).await)
        })
    }
}

impl std::fmt::Debug for ClientCommandsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCommandsServer")
            .field("chain", &self.chain)
            .field("max_decoding_message_size", &self.max_decoding_message_size)
            .finish_non_exhaustive()
    }
}

impl<B> Service<http::Request<B>> for ClientCommandsServer
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let Some(method) = methods::get_method_info(req.uri().path()) else {
            return Box::pin(async { Ok(unimplemented_response()) });
        };

        match method.path {
            paths::APP_GET_VERSION => self.unary(method, handlers::app_get_version, req),
            paths::APP_SHUTDOWN => self.unary(method, handlers::app_shutdown, req),
            paths::WALLET_CREATE_SESSION => {
                self.unary(method, handlers::wallet_create_session, req)
            }
            paths::ACCOUNT_LOCAL_LINK_NEW_CHALLENGE => {
                self.unary(method, handlers::account_local_link_new_challenge, req)
            }
            paths::ACCOUNT_LOCAL_LINK_SOLVE_CHALLENGE => {
                self.unary(method, handlers::account_local_link_solve_challenge, req)
            }
            paths::FILE_UPLOAD => self.unary(method, handlers::file_upload, req),
            _ => Box::pin(async { Ok(unimplemented_response()) }),
        }
    }
}

/// Trailers-only `UNIMPLEMENTED` reply for paths outside the registry.
fn unimplemented_response() -> http::Response<BoxBody> {
    let mut response = http::Response::new(empty_body());
    let headers = response.headers_mut();
    headers.insert(
        tonic::Status::GRPC_STATUS,
        (tonic::Code::Unimplemented as i32).into(),
    );
    headers.insert(
        http::header::CONTENT_TYPE,
        tonic::metadata::GRPC_CONTENT_TYPE,
    );
    response
}

impl NamedService for ClientCommandsServer {
    const NAME: &'static str = methods::SERVICE_NAME;
}

/// Adapters from the trait methods to [`Handler`] function pointers.
mod handlers {
    use super::*;
    use futures::future::BoxFuture;

    type Reply<T> = BoxFuture<'static, Result<T, Status>>;

    pub(super) fn app_get_version(
        svc: Arc<dyn ClientCommands>,
        ctx: RequestContext,
        msg: AppGetVersionRequest,
    ) -> Reply<AppGetVersionResponse> {
        Box::pin(async move { svc.app_get_version(ctx, msg).await })
    }

    pub(super) fn app_shutdown(
        svc: Arc<dyn ClientCommands>,
        ctx: RequestContext,
        msg: AppShutdownRequest,
    ) -> Reply<AppShutdownResponse> {
        Box::pin(async move { svc.app_shutdown(ctx, msg).await })
    }

    pub(super) fn wallet_create_session(
        svc: Arc<dyn ClientCommands>,
        ctx: RequestContext,
        msg: WalletCreateSessionRequest,
    ) -> Reply<WalletCreateSessionResponse> {
        Box::pin(async move { svc.wallet_create_session(ctx, msg).await })
    }

    pub(super) fn account_local_link_new_challenge(
        svc: Arc<dyn ClientCommands>,
        ctx: RequestContext,
        msg: AccountLocalLinkNewChallengeRequest,
    ) -> Reply<AccountLocalLinkNewChallengeResponse> {
        Box::pin(async move { svc.account_local_link_new_challenge(ctx, msg).await })
    }

    pub(super) fn account_local_link_solve_challenge(
        svc: Arc<dyn ClientCommands>,
        ctx: RequestContext,
        msg: AccountLocalLinkSolveChallengeRequest,
    ) -> Reply<AccountLocalLinkSolveChallengeResponse> {
        Box::pin(async move { svc.account_local_link_solve_challenge(ctx, msg).await })
    }

    pub(super) fn file_upload(
        svc: Arc<dyn ClientCommands>,
        ctx: RequestContext,
        msg: FileUploadRequest,
    ) -> Reply<FileUploadResponse> {
        Box::pin(async move { svc.file_upload(ctx, msg).await })
    }
}
