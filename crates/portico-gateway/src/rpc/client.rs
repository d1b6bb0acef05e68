//! Client side of `portico.ClientCommands`.
//!
//! Used by the upload bridge to call back into the gateway's own RPC listener, and
//! by tests.

use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tonic::{IntoRequest, Status};

use super::pb::*;
use crate::domain::methods::paths;

/// Typed client for `portico.ClientCommands`.
#[derive(Debug, Clone)]
pub struct ClientCommandsClient {
    inner: tonic::client::Grpc<Channel>,
}

impl ClientCommandsClient {
    /// Connect to `endpoint`.
    pub async fn connect(endpoint: Endpoint) -> Result<Self, tonic::transport::Error> {
        let channel = endpoint.connect().await?;
        Ok(Self::new(channel))
    }

    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    /// Limits the maximum size of a decoded message.
    #[must_use]
    pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
        self.inner = self.inner.max_decoding_message_size(limit);
        self
    }

    async fn unary<Req, Resp>(
        &mut self,
        request: tonic::Request<Req>,
        path: &'static str,
    ) -> Result<tonic::Response<Resp>, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("Service was not ready: {e}")))?;
        let codec = ProstCodec::<Req, Resp>::default();
        self.inner
            .unary(request, PathAndQuery::from_static(path), codec)
            .await
    }

    pub async fn app_get_version(
        &mut self,
        request: impl IntoRequest<AppGetVersionRequest>,
    ) -> Result<tonic::Response<AppGetVersionResponse>, Status> {
        self.unary(request.into_request(), paths::APP_GET_VERSION)
            .await
    }

    pub async fn app_shutdown(
        &mut self,
        request: impl IntoRequest<AppShutdownRequest>,
    ) -> Result<tonic::Response<AppShutdownResponse>, Status> {
        self.unary(request.into_request(), paths::APP_SHUTDOWN).await
    }

    pub async fn wallet_create_session(
        &mut self,
        request: impl IntoRequest<WalletCreateSessionRequest>,
    ) -> Result<tonic::Response<WalletCreateSessionResponse>, Status> {
        self.unary(request.into_request(), paths::WALLET_CREATE_SESSION)
            .await
    }

    pub async fn account_local_link_new_challenge(
        &mut self,
        request: impl IntoRequest<AccountLocalLinkNewChallengeRequest>,
    ) -> Result<tonic::Response<AccountLocalLinkNewChallengeResponse>, Status> {
        self.unary(
            request.into_request(),
            paths::ACCOUNT_LOCAL_LINK_NEW_CHALLENGE,
        )
        .await
    }

    pub async fn account_local_link_solve_challenge(
        &mut self,
        request: impl IntoRequest<AccountLocalLinkSolveChallengeRequest>,
    ) -> Result<tonic::Response<AccountLocalLinkSolveChallengeResponse>, Status> {
        self.unary(
            request.into_request(),
            paths::ACCOUNT_LOCAL_LINK_SOLVE_CHALLENGE,
        )
        .await
    }

    pub async fn file_upload(
        &mut self,
        request: impl IntoRequest<FileUploadRequest>,
    ) -> Result<tonic::Response<FileUploadResponse>, Status> {
        self.unary(request.into_request(), paths::FILE_UPLOAD).await
    }
}
