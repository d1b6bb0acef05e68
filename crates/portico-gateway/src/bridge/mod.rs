//! Browser bridge: gRPC-web and gRPC-over-WebSocket in front of the RPC service.
//!
//! Every path is handled by one fallback:
//! - a WebSocket upgrade offering `grpc-websockets` is served by [`websocket`]
//! - anything else goes through `tonic-web`, which translates gRPC-web and passes
//!   native HTTP/2 gRPC straight through
//!
//! CORS is permissive by default so browser apps on any origin can call in.

pub mod cors;
pub mod websocket;

pub use cors::create_cors_layer;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::time::Duration;
use tonic_web::{GrpcWebLayer, GrpcWebService};
use tower_http::trace::TraceLayer;
use tower::{Layer, ServiceExt};
use tracing::debug;

use crate::domain::config::CorsConfig;
use crate::rpc::ClientCommandsServer;
use crate::server::UpgradeShutdown;
use websocket::{offers_grpc_websockets, GRPC_WEBSOCKETS_PROTOCOL};

/// gRPC-web translating service around the RPC server.
pub type GrpcWeb = GrpcWebService<ClientCommandsServer>;

#[derive(Clone)]
struct BridgeState {
    grpc_web: GrpcWeb,
    header_timeout: Duration,
    sessions: UpgradeShutdown,
}

/// Router for the bridge listener.
///
/// WebSocket sessions must send their header block within `header_timeout` and are
/// closed when `sessions` is triggered.
pub fn router(
    server: ClientCommandsServer,
    cors: &CorsConfig,
    header_timeout: Duration,
    sessions: &UpgradeShutdown,
) -> Router {
    let state = BridgeState {
        grpc_web: GrpcWebLayer::new().layer(server),
        header_timeout,
        sessions: sessions.clone(),
    };

    Router::new()
        .fallback(handle_bridge)
        .with_state(state)
        .layer(create_cors_layer(cors))
        .layer(TraceLayer::new_for_http())
}

async fn handle_bridge(
    State(state): State<BridgeState>,
    ws: Option<WebSocketUpgrade>,
    request: Request,
) -> Response {
    if let Some(ws) = ws {
        if !offers_grpc_websockets(request.headers()) {
            debug!(path = %request.uri().path(), "WebSocket upgrade without grpc-websockets");
            return (
                StatusCode::BAD_REQUEST,
                "unsupported WebSocket subprotocol",
            )
                .into_response();
        }
        let session = websocket::Session {
            uri: request.uri().clone(),
            grpc_web: state.grpc_web.clone(),
            header_timeout: state.header_timeout,
            shutdown: state.sessions.subscribe(),
        };
        return ws
            .protocols([GRPC_WEBSOCKETS_PROTOCOL])
            .on_upgrade(move |socket| websocket::serve_socket(socket, session));
    }

    match state.grpc_web.oneshot(request.map(tonic::body::boxed)).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    }
}
