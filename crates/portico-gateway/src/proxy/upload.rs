//! Multipart file upload bridged to the `FileUpload` RPC.
//!
//! `POST /v1/file` with a `space_id` text field and a `file` part. The file is
//! streamed into a staging file (keeping its extension), the application is called
//! over loopback gRPC with the stored session token, and the staging file is
//! removed whatever the outcome.

use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tonic::metadata::MetadataValue;
use tonic::transport::Endpoint;
use tonic::Status;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use portico_telemetry::metrics::UPLOADS;

use crate::domain::config::UploadConfig;
use crate::domain::credential::{CredentialSource, TOKEN_METADATA_KEY};
use crate::domain::error::{CredentialError, UploadError};
use crate::rpc::pb::FileUploadRequest;
use crate::rpc::ClientCommandsClient;

const SPACE_ID_FIELD: &str = "space_id";
const FILE_FIELD: &str = "file";
const STAGING_PREFIX: &str = "portico-upload-";

/// A received upload waiting to be handed to the application.
#[derive(Debug)]
pub struct UploadJob {
    pub id: Uuid,
    pub space_id: String,
    pub file_name: Option<String>,
    pub size: u64,
    staged: TempPath,
}

impl UploadJob {
    /// Path of the staged copy.
    pub fn local_path(&self) -> &Path {
        &self.staged
    }

    /// Remove the staged copy.
    pub fn finish(self) {
        let id = self.id;
        if let Err(e) = self.staged.close() {
            warn!(upload_id = %id, error = %e, "Failed to remove staged upload");
        }
    }
}

/// Upload bridge state.
pub struct UploadBridge {
    rpc_addr: SocketAddr,
    credentials: Arc<dyn CredentialSource>,
    staging_dir: PathBuf,
    rpc_timeout: Duration,
}

impl UploadBridge {
    /// `rpc_addr` is the address the RPC listener actually bound.
    pub fn new(
        rpc_addr: SocketAddr,
        credentials: Arc<dyn CredentialSource>,
        config: &UploadConfig,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            rpc_addr,
            credentials,
            staging_dir: config.staging_dir.clone(),
            rpc_timeout,
        }
    }

    /// Loopback URI of the RPC listener. Wildcard binds are reached via loopback.
    pub fn endpoint_uri(&self) -> String {
        let ip = match self.rpc_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        format!("http://{}", SocketAddr::new(ip, self.rpc_addr.port()))
    }

    /// Read the form, staging the file part as it streams in.
    pub async fn receive(&self, mut multipart: Multipart) -> Result<UploadJob, UploadError> {
        let mut space_id: Option<String> = None;
        let mut staged: Option<(TempPath, Option<String>, u64)> = None;

        while let Some(mut field) = multipart.next_field().await.map_err(form_error)? {
            match field.name() {
                Some(SPACE_ID_FIELD) => {
                    space_id = Some(field.text().await.map_err(form_error)?);
                }
                // Only a file part counts; a plain text field named `file` does not
                Some(FILE_FIELD) if staged.is_none() && field.file_name().is_some() => {
                    let file_name = field.file_name().map(str::to_owned);
                    let (path, size) = self.stage(&mut field, file_name.as_deref()).await?;
                    staged = Some((path, file_name, size));
                }
                _ => {}
            }
        }

        let space_id = space_id
            .filter(|id| !id.is_empty())
            .ok_or(UploadError::MissingSpaceId)?;
        let (staged, file_name, size) = staged.ok_or(UploadError::MissingFile)?;

        Ok(UploadJob {
            id: Uuid::now_v7(),
            space_id,
            file_name,
            size,
            staged,
        })
    }

    async fn stage(
        &self,
        field: &mut Field<'_>,
        file_name: Option<&str>,
    ) -> Result<(TempPath, u64), UploadError> {
        let suffix = staging_suffix(file_name);
        let named = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(&suffix)
            .tempfile_in(&self.staging_dir)
            .map_err(|e| self.staging_failed(e))?;
        let (file, path) = named.into_parts();
        let mut file = tokio::fs::File::from_std(file);

        // `path` removes the file on drop, so early returns leave nothing behind
        let mut size = 0u64;
        while let Some(chunk) = field.chunk().await.map_err(form_error)? {
            file.write_all(&chunk)
                .await
                .map_err(|e| self.staging_failed(e))?;
            size += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| self.staging_failed(e))?;

        Ok((path, size))
    }

    fn staging_failed(&self, e: std::io::Error) -> UploadError {
        error!(staging_dir = %self.staging_dir.display(), error = %e, "Failed to stage upload");
        UploadError::Staging(e)
    }

    /// Call `FileUpload` on the loopback RPC listener and return the object id.
    pub async fn forward(&self, job: &UploadJob) -> Result<String, UploadError> {
        let token = self.credentials.stored_token().map_err(|e| {
            error!(upload_id = %job.id, error = %e, "Failed to get stored session token");
            UploadError::Credential(e)
        })?;

        let mut request = tonic::Request::new(FileUploadRequest {
            space_id: job.space_id.clone(),
            local_path: job.local_path().to_string_lossy().into_owned(),
        });
        if !token.is_empty() {
            let value = MetadataValue::try_from(token.expose_secret()).map_err(|_| {
                UploadError::Credential(CredentialError::Malformed(
                    "session token is not valid metadata".into(),
                ))
            })?;
            request.metadata_mut().insert(TOKEN_METADATA_KEY, value);
        }
        request.set_timeout(self.rpc_timeout);

        let call = async {
            let endpoint = Endpoint::from_shared(self.endpoint_uri())
                .map_err(|e| UploadError::Connect(e.to_string()))?
                .connect_timeout(self.rpc_timeout);
            let mut client = ClientCommandsClient::connect(endpoint)
                .await
                .map_err(|e| UploadError::Connect(e.to_string()))?;
            client
                .file_upload(request)
                .await
                .map_err(UploadError::Transport)
        };

        let response = match tokio::time::timeout(self.rpc_timeout, call).await {
            Ok(result) => result?.into_inner(),
            Err(_) => return Err(UploadError::Transport(no_reply(self.rpc_timeout))),
        };

        if let Some(failure) = response.failure() {
            return Err(UploadError::Application {
                description: failure.description.clone(),
                token_preview: token.preview(),
                space_id: job.space_id.clone(),
            });
        }

        Ok(response.object_id)
    }
}

fn no_reply(after: Duration) -> Status {
    Status::deadline_exceeded(format!("no reply within {after:?}"))
}

fn form_error(e: MultipartError) -> UploadError {
    UploadError::MalformedForm(e.body_text())
}

/// `.ext` of the client's file name, or empty.
fn staging_suffix(file_name: Option<&str>) -> String {
    file_name
        .map(Path::new)
        .and_then(Path::file_name)
        .map(Path::new)
        .and_then(Path::extension)
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

/// Handler for the upload path on the proxy listener.
pub async fn handle_upload(
    State(bridge): State<Arc<UploadBridge>>,
    method: Method,
    form: Result<Multipart, MultipartRejection>,
) -> Response {
    let result = process_upload(&bridge, method, form).await;

    let response = match result {
        Ok(object_id) => Json(serde_json::json!({ "object_id": object_id })).into_response(),
        Err(e) => {
            debug!(error = %e, "Upload rejected");
            e.into_response()
        }
    };
    UPLOADS
        .with_label_values(&[status_class(response.status())])
        .inc();
    response
}

async fn process_upload(
    bridge: &UploadBridge,
    method: Method,
    form: Result<Multipart, MultipartRejection>,
) -> Result<String, UploadError> {
    if method != Method::POST {
        return Err(UploadError::MethodNotAllowed);
    }
    let multipart = form.map_err(|e| UploadError::MalformedForm(e.body_text()))?;

    let job = bridge.receive(multipart).await?;
    info!(
        upload_id = %job.id,
        space_id = %job.space_id,
        size = job.size,
        "Forwarding upload"
    );

    let outcome = bridge.forward(&job).await;
    job.finish();
    outcome
}

fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        200..=299 => "2xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}
