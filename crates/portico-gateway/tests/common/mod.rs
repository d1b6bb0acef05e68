//! Shared fixtures for the gateway integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tonic::transport::Endpoint;
use tonic::Status;

use portico_gateway::domain::credential::CredentialSource;
use portico_gateway::rpc::pb::*;
use portico_gateway::{
    AuthorizeError, ClientCommands, ClientCommandsClient, Gateway, GatewayAddrs, GatewayConfig,
    RequestContext,
};

/// What the application saw for one `FileUpload` call.
#[derive(Debug, Clone)]
pub struct ReceivedUpload {
    pub space_id: String,
    pub local_path: PathBuf,
    pub token: Option<String>,
    pub contents: Vec<u8>,
}

/// Application double: counts handler calls and records uploads.
#[derive(Default)]
pub struct TestApp {
    deny: Option<Status>,
    upload_failure: Option<String>,
    upload_delay: Option<Duration>,
    pub handled: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub uploads: Mutex<Vec<ReceivedUpload>>,
}

impl TestApp {
    pub fn denying(status: Status) -> Self {
        Self {
            deny: Some(status),
            ..Self::default()
        }
    }

    pub fn failing_uploads(description: &str) -> Self {
        Self {
            upload_failure: Some(description.to_string()),
            ..Self::default()
        }
    }

    pub fn slow_uploads(delay: Duration) -> Self {
        Self {
            upload_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> Vec<ReceivedUpload> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClientCommands for TestApp {
    async fn authorize(&self, _ctx: &RequestContext) -> Result<(), AuthorizeError> {
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
            version: "1.2.3".into(),
            details: "integration".into(),
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

    async fn wallet_create_session(
        &self,
        _ctx: RequestContext,
        request: WalletCreateSessionRequest,
    ) -> Result<WalletCreateSessionResponse, Status> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(WalletCreateSessionResponse {
            error: None,
            token: format!("session-for-{}", request.mnemonic.len()),
            account_id: "account".into(),
        })
    }

    async fn file_upload(
        &self,
        ctx: RequestContext,
        request: FileUploadRequest,
    ) -> Result<FileUploadResponse, Status> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }
        let local_path = PathBuf::from(&request.local_path);
        let contents = tokio::fs::read(&local_path)
            .await
            .map_err(|e| Status::internal(format!("read staged file: {e}")))?;

        self.uploads.lock().unwrap().push(ReceivedUpload {
            space_id: request.space_id.clone(),
            local_path,
            token: ctx.token.map(|t| t.expose_secret().to_string()),
            contents,
        });

        if let Some(description) = &self.upload_failure {
            return Ok(FileUploadResponse {
                error: Some(ResponseError::new(error_code::BAD_INPUT, description.clone())),
                object_id: String::new(),
            });
        }
        Ok(FileUploadResponse {
            error: None,
            object_id: format!("obj-{}", request.space_id),
        })
    }
}

/// Echo origin standing in for the internal REST API.
///
/// `/teapot` answers 418 with an `x-origin` header; everything else echoes the
/// request back as JSON.
pub async fn spawn_origin() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = Router::new()
        .route(
            "/teapot",
            any(|| async { (StatusCode::IM_A_TEAPOT, [("x-origin", "yes")], "short and stout") }),
        )
        .fallback(echo);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let headers: serde_json::Map<String, serde_json::Value> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                serde_json::Value::String(value.to_str().unwrap_or_default().to_string()),
            )
        })
        .collect();
    Json(serde_json::json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "headers": headers,
        "body": String::from_utf8_lossy(&body),
    }))
}

/// Address with nothing listening on it.
pub fn closed_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Loopback config with OS-assigned ports and a private staging directory.
pub fn test_config(origin: SocketAddr, staging: &TempDir) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listen.rpc = "127.0.0.1:0".parse().unwrap();
    config.listen.bridge = "127.0.0.1:0".parse().unwrap();
    config.listen.proxy = "127.0.0.1:0".parse().unwrap();
    config.origin.internal_api_addr = origin.to_string();
    config.upload.staging_dir = staging.path().to_path_buf();
    config
}

/// A started gateway plus everything the tests poke at.
pub struct Harness {
    pub gateway: Gateway,
    pub addrs: GatewayAddrs,
    pub app: Arc<TestApp>,
    pub staging: TempDir,
}

impl Harness {
    pub async fn start(app: TestApp, credentials: impl CredentialSource + 'static) -> Self {
        Self::start_with(app, credentials, |_| {}).await
    }

    pub async fn start_with(
        app: TestApp,
        credentials: impl CredentialSource + 'static,
        configure: impl FnOnce(&mut GatewayConfig),
    ) -> Self {
        let origin = spawn_origin().await;
        let staging = tempfile::tempdir().unwrap();
        let mut config = test_config(origin, &staging);
        configure(&mut config);

        let app = Arc::new(app);
        let gateway = Gateway::new(config, app.clone(), Arc::new(credentials)).unwrap();
        let addrs = gateway.start().await.unwrap();
        Self {
            gateway,
            addrs,
            app,
            staging,
        }
    }

    pub async fn rpc_client(&self) -> ClientCommandsClient {
        let endpoint = Endpoint::from_shared(format!("http://{}", self.addrs.rpc)).unwrap();
        ClientCommandsClient::connect(endpoint).await.unwrap()
    }

    pub fn bridge_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addrs.bridge, path)
    }

    pub fn proxy_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addrs.proxy, path)
    }

    /// Files left in the staging directory.
    pub fn staged_files(&self) -> usize {
        std::fs::read_dir(self.staging.path()).unwrap().count()
    }
}

/// One gRPC-web frame: flag byte, big-endian length, payload.
pub fn grpc_web_frame(flag: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + payload.len());
    frame.push(flag);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Split a gRPC-web body into `(flag, payload)` frames.
pub fn split_grpc_web_frames(mut body: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut frames = Vec::new();
    while body.len() >= 5 {
        let flag = body[0];
        let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
        let payload = body[5..5 + len].to_vec();
        frames.push((flag, payload));
        body = &body[5 + len..];
    }
    frames
}
