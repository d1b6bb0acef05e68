//! Reverse proxy to the internal REST API.
//!
//! Every request is forwarded to the configured origin with its method, path,
//! query, headers and body intact (hop-by-hop headers excepted). The upload path
//! is the one exception: it is answered locally by [`upload`].

pub mod upload;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, FromRef, Request, State};
use axum::http::uri::{Authority, Scheme};
use axum::http::{header, HeaderMap, HeaderName, StatusCode, Uri, Version};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use portico_telemetry::metrics::PROXY_REQUESTS;

use crate::domain::config::ConfigError;
pub use upload::{handle_upload, UploadBridge, UploadJob};

/// Headers that describe a single connection and are never forwarded.
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("proxy-connection"),
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

/// Forwarding client for one origin.
#[derive(Clone)]
pub struct ReverseProxy {
    client: Client<HttpConnector, Body>,
    origin: Authority,
}

impl ReverseProxy {
    /// `origin` is `host:port` of the internal API.
    pub fn new(origin: &str) -> Result<Self, ConfigError> {
        let origin =
            Authority::from_str(origin).map_err(|_| ConfigError::InvalidAddress(origin.into()))?;
        let client = Client::builder(TokioExecutor::new()).build_http();
        Ok(Self { client, origin })
    }

    pub fn origin(&self) -> &Authority {
        &self.origin
    }

    /// Forward `request` and return the origin's response, or 502 when the origin
    /// cannot be reached.
    pub async fn forward(&self, request: Request) -> Response {
        let (mut parts, body) = request.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| axum::http::uri::PathAndQuery::from_static("/"));
        let uri = match Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.origin.clone())
            .path_and_query(path_and_query)
            .build()
        {
            Ok(uri) => uri,
            Err(e) => {
                warn!(error = %e, "Could not build origin URI");
                return StatusCode::BAD_REQUEST.into_response();
            }
        };

        debug!(method = %parts.method, uri = %uri, "Proxying request");
        parts.uri = uri;
        parts.version = Version::HTTP_11;
        strip_hop_by_hop(&mut parts.headers);

        match self.client.request(Request::from_parts(parts, body)).await {
            Ok(response) => {
                PROXY_REQUESTS.with_label_values(&["forwarded"]).inc();
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Response::from_parts(parts, Body::new(body))
            }
            Err(e) => {
                PROXY_REQUESTS.with_label_values(&["origin_error"]).inc();
                warn!(origin = %self.origin, error = %e, "Origin request failed");
                (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
            }
        }
    }
}

/// Remove hop-by-hop headers, including any named in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_str(name.trim()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    // Upgrade is only meaningful together with Connection: upgrade
    headers.remove(header::UPGRADE);
}

/// Shared state of the proxy listener.
#[derive(Clone)]
pub struct ProxyState {
    pub proxy: ReverseProxy,
    pub upload: Arc<UploadBridge>,
}

impl FromRef<ProxyState> for ReverseProxy {
    fn from_ref(state: &ProxyState) -> Self {
        state.proxy.clone()
    }
}

impl FromRef<ProxyState> for Arc<UploadBridge> {
    fn from_ref(state: &ProxyState) -> Self {
        Arc::clone(&state.upload)
    }
}

/// Router for the proxy listener.
pub fn router(state: ProxyState, upload_path: &str, max_upload_size: usize) -> Router {
    Router::new()
        .route(
            upload_path,
            any(handle_upload).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .fallback(forward)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn forward(State(proxy): State<ReverseProxy>, request: Request) -> Response {
    proxy.forward(request).await
}
